//! Delivery attempt log: entry model, the status-derivation write contract,
//! and an append-only JSONL store with filtered, paginated queries.
//!
//! The store is a collaborator boundary: the dispatch pipeline only depends
//! on the [`DeliveryLogStore`] trait and on the derivation invariant applied
//! at append time.

pub mod entry;
pub mod store;

pub use entry::{DeliveryStatus, LogEntry, MessageKind, NewLogEntry};
pub use store::{DeliveryLogStore, JsonlDeliveryLog, LogPage, LogQuery, MAX_LOG_PAGE_SIZE};
