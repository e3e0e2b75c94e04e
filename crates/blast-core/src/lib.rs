//! Foundational low-level utilities shared across Blastline crates.
//!
//! Provides unix-timestamp helpers and the validity-window check used by
//! the session manager for pairing-artifact expiry and by the delivery
//! log store for entry timestamps.

pub mod time_utils;

pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_within_window_ms};
