//! Chat-transport capability contract and the session lifecycle manager.
//!
//! The transport itself (pairing, encryption, multi-device sync) is an
//! external library behind the [`ChatTransport`] trait; this crate owns the
//! single connection per process and the state machine that tracks it.

pub mod contract;
pub mod session;

pub use contract::{ChatTransport, MediaHandle, TransportError, TransportEvent};
pub use session::{
    PairingArtifact, SessionConfig, SessionError, SessionManager, SessionPhase, SessionStatus,
    PAIRING_ARTIFACT_TTL_MS,
};
