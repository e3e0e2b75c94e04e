//! Session lifecycle manager for the single chat-transport connection.
//!
//! One manager owns one transport per process. Transport callbacks are
//! funneled through an mpsc channel into a single dispatcher task, so state
//! transitions never race; the current phase is broadcast over a `watch`
//! channel that every readiness waiter subscribes to.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{info, warn};

use blast_core::{current_unix_timestamp_ms, is_within_window_ms};

use crate::contract::{ChatTransport, MediaHandle, TransportError, TransportEvent};

/// How long a pairing artifact stays valid before the operator must request
/// a fresh one.
pub const PAIRING_ARTIFACT_TTL_MS: u64 = 5 * 60 * 1_000;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// `None` while a connection attempt is still in flight; `Some` once the
/// attempt's `initialize` call settled.
type AttemptOutcome = Option<Result<(), TransportError>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `SessionPhase` values. Exactly one is active at a
/// time; `Connected` is the only phase in which sends may proceed.
pub enum SessionPhase {
    Disconnected,
    Initializing,
    Connecting,
    AwaitingPairing,
    Authenticated,
    Connected,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Authenticated => "authenticated",
            Self::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Cached pairing challenge, base64-encoded, stamped at capture time.
pub struct PairingArtifact {
    pub encoded: String,
    pub captured_unix_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Non-blocking snapshot of the session for status surfaces.
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub connected: bool,
    pub connected_identity: Option<String>,
}

#[derive(Debug, Error)]
/// Enumerates supported `SessionError` values.
pub enum SessionError {
    /// The session did not reach `Connected` in time. Retryable; callers
    /// decide whether to wait, retry, or surface unavailability.
    #[error("session not ready (phase {})", phase.as_str())]
    NotReady { phase: SessionPhase },
    /// A reset is already tearing the session down.
    #[error("a session reset is already in progress")]
    ResetInProgress,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to clear credential material: {0}")]
    CredentialClear(String),
}

#[derive(Debug, Clone)]
/// Public struct `SessionConfig` used across Blastline components.
pub struct SessionConfig {
    /// Directory holding the transport's persisted credential material.
    /// Emptied during a reset so the next connect pairs fresh.
    pub credential_dir: std::path::PathBuf,
    pub pairing_artifact_ttl_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credential_dir: std::path::PathBuf::from("tokens"),
            pairing_artifact_ttl_ms: PAIRING_ARTIFACT_TTL_MS,
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    phase: SessionPhase,
    pairing: Option<PairingArtifact>,
    identity: Option<String>,
    init_in_flight: bool,
    attempt_rx: Option<watch::Receiver<AttemptOutcome>>,
}

struct SessionShared {
    inner: Mutex<SessionInner>,
    phase_tx: watch::Sender<SessionPhase>,
    pairing_artifact_ttl_ms: u64,
}

impl SessionShared {
    fn lock_inner(&self) -> MutexGuard<'_, SessionInner> {
        // The guarded state is plain data; recover it if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, inner: &mut SessionInner, next: SessionPhase) {
        if inner.phase == next {
            return;
        }
        info!(
            from = inner.phase.as_str(),
            to = next.as_str(),
            "session phase transition"
        );
        // Invariant: the artifact never outlives AwaitingPairing.
        if inner.phase == SessionPhase::AwaitingPairing || next != SessionPhase::AwaitingPairing {
            inner.pairing = None;
        }
        inner.phase = next;
        self.phase_tx.send_replace(next);
    }

    fn apply_event(&self, event: TransportEvent) {
        let mut inner = self.lock_inner();
        match event {
            TransportEvent::Loading => {
                self.set_phase(&mut inner, SessionPhase::Connecting);
            }
            TransportEvent::PairingChallenge { payload } => {
                self.set_phase(&mut inner, SessionPhase::AwaitingPairing);
                inner.pairing = Some(PairingArtifact {
                    encoded: BASE64.encode(payload.as_bytes()),
                    captured_unix_ms: current_unix_timestamp_ms(),
                });
            }
            TransportEvent::Authenticated => {
                self.set_phase(&mut inner, SessionPhase::Authenticated);
            }
            TransportEvent::Ready { identity } => {
                inner.identity = Some(identity);
                inner.init_in_flight = false;
                self.set_phase(&mut inner, SessionPhase::Connected);
            }
            TransportEvent::AuthFailure { reason } => {
                warn!(reason = %reason, "transport reported auth failure");
                inner.identity = None;
                inner.init_in_flight = false;
                self.set_phase(&mut inner, SessionPhase::Disconnected);
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "transport disconnected");
                inner.identity = None;
                inner.init_in_flight = false;
                self.set_phase(&mut inner, SessionPhase::Disconnected);
            }
        }
    }
}

/// Owns the single transport connection and its state machine.
///
/// Created once at process start and injected into collaborators; every
/// clone of the surrounding `Arc` observes the same session.
pub struct SessionManager {
    transport: Arc<dyn ChatTransport>,
    config: SessionConfig,
    shared: Arc<SessionShared>,
    reset_gate: AsyncMutex<()>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn ChatTransport>, config: SessionConfig) -> Self {
        let (phase_tx, _phase_rx) = watch::channel(SessionPhase::Disconnected);
        let shared = Arc::new(SessionShared {
            inner: Mutex::new(SessionInner {
                phase: SessionPhase::Disconnected,
                pairing: None,
                identity: None,
                init_in_flight: false,
                attempt_rx: None,
            }),
            phase_tx,
            pairing_artifact_ttl_ms: config.pairing_artifact_ttl_ms,
        });
        Self {
            transport,
            config,
            shared,
            reset_gate: AsyncMutex::new(()),
        }
    }

    /// Starts a connection attempt. Concurrent calls while one attempt is in
    /// flight (or a session is already established) share that attempt
    /// instead of launching parallel transport instances, and resolve to the
    /// same outcome the attempt itself produced.
    pub async fn connect(&self) -> Result<(), SessionError> {
        // The guard must be fully out of scope before any await so the
        // returned future stays `Send`.
        let started = {
            let mut inner = self.shared.lock_inner();
            if inner.init_in_flight || inner.phase != SessionPhase::Disconnected {
                Err(inner.attempt_rx.clone())
            } else {
                inner.init_in_flight = true;
                self.shared.set_phase(&mut inner, SessionPhase::Initializing);
                let (attempt_tx, attempt_rx) = watch::channel(None);
                inner.attempt_rx = Some(attempt_rx);
                Ok(attempt_tx)
            }
        };
        let attempt_tx = match started {
            Ok(attempt_tx) => attempt_tx,
            Err(pending) => return join_attempt(pending).await,
        };

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            // Single dispatcher per attempt: transitions are applied in the
            // order the transport emitted them.
            while let Some(event) = events_rx.recv().await {
                shared.apply_event(event);
            }
        });

        if let Err(error) = self.transport.initialize(events_tx).await {
            warn!(error = %error, "transport initialize failed");
            {
                let mut inner = self.shared.lock_inner();
                inner.init_in_flight = false;
                self.shared.set_phase(&mut inner, SessionPhase::Disconnected);
            }
            attempt_tx.send_replace(Some(Err(error.clone())));
            return Err(SessionError::Transport(error));
        }
        attempt_tx.send_replace(Some(Ok(())));
        Ok(())
    }

    /// Tears the session down, clears credential material and the cached
    /// pairing artifact, then reconnects so a fresh artifact becomes
    /// available quickly. Mutually exclusive: a reset already in progress
    /// fails the new call immediately with [`SessionError::ResetInProgress`].
    pub async fn reset(&self) -> Result<(), SessionError> {
        let _gate = self
            .reset_gate
            .try_lock()
            .map_err(|_| SessionError::ResetInProgress)?;

        info!(
            credential_dir = %self.config.credential_dir.display(),
            "session reset: tearing down transport"
        );
        let teardown = self.transport.destroy().await;
        {
            let mut inner = self.shared.lock_inner();
            inner.identity = None;
            inner.init_in_flight = false;
            self.shared.set_phase(&mut inner, SessionPhase::Disconnected);
        }
        // Teardown failure is surfaced, but only after the state machine has
        // been parked in Disconnected rather than mid-transition.
        teardown?;

        empty_dir(&self.config.credential_dir)
            .map_err(|error| SessionError::CredentialClear(error.to_string()))?;

        self.connect().await
    }

    /// Never blocks; safe to call from any surface at any time.
    pub fn status(&self) -> SessionStatus {
        let inner = self.shared.lock_inner();
        SessionStatus {
            phase: inner.phase,
            connected: inner.phase == SessionPhase::Connected,
            connected_identity: inner.identity.clone(),
        }
    }

    /// Returns the cached pairing artifact while the session is awaiting
    /// pairing and the artifact is inside its validity window. `None` is an
    /// expected transient condition, not an error.
    pub fn pairing_artifact(&self) -> Option<PairingArtifact> {
        let mut inner = self.shared.lock_inner();
        if inner.phase != SessionPhase::AwaitingPairing {
            return None;
        }
        let artifact = inner.pairing.clone()?;
        if !is_within_window_ms(
            artifact.captured_unix_ms,
            self.shared.pairing_artifact_ttl_ms,
            current_unix_timestamp_ms(),
        ) {
            inner.pairing = None;
            return None;
        }
        Some(artifact)
    }

    /// Waits up to `timeout` for the session to reach `Connected`. No lock
    /// is held while suspended; every waiter resolves from the same watch
    /// broadcast.
    pub async fn ensure_ready(&self, timeout: Duration) -> Result<(), SessionError> {
        let mut phase_rx = self.shared.phase_tx.subscribe();
        let wait = phase_rx.wait_for(|phase| *phase == SessionPhase::Connected);
        let outcome = tokio::time::timeout(timeout, wait)
            .await
            .map(|ready| ready.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            // Closed watch channel cannot happen while the manager is alive,
            // but a timeout-shaped answer is still the honest one.
            Ok(Err(_)) | Err(_) => Err(SessionError::NotReady {
                phase: self.shared.lock_inner().phase,
            }),
        }
    }

    /// Resolves whether `canonical` has an account on the chat network.
    pub async fn resolve_account(&self, canonical: &str) -> Result<Option<String>, SessionError> {
        self.require_connected()?;
        Ok(self.transport.resolve_account(canonical).await?)
    }

    /// Sends a text message through the owned transport.
    pub async fn send_text(&self, canonical: &str, text: &str) -> Result<String, SessionError> {
        self.require_connected()?;
        Ok(self.transport.send_text(canonical, text).await?)
    }

    /// Sends a media message with a caption through the owned transport.
    pub async fn send_media(
        &self,
        canonical: &str,
        media: &MediaHandle,
        caption: &str,
    ) -> Result<String, SessionError> {
        self.require_connected()?;
        Ok(self.transport.send_media(canonical, media, caption).await?)
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        let phase = self.shared.lock_inner().phase;
        if phase == SessionPhase::Connected {
            Ok(())
        } else {
            Err(SessionError::NotReady { phase })
        }
    }
}

/// Resolves a follower `connect()` against the in-flight (or most recent)
/// attempt so every caller observes the same outcome.
async fn join_attempt(
    rx: Option<watch::Receiver<AttemptOutcome>>,
) -> Result<(), SessionError> {
    let Some(mut rx) = rx else {
        return Ok(());
    };
    let outcome = rx
        .wait_for(|outcome| outcome.is_some())
        .await
        .map(|published| (*published).clone());
    match outcome {
        Ok(Some(Ok(()))) => Ok(()),
        Ok(Some(Err(error))) => Err(SessionError::Transport(error)),
        // The attempt vanished without publishing; nothing left to share.
        Ok(None) | Err(_) => Ok(()),
    }
}

/// Removes every entry under `dir`, creating it first when absent.
fn empty_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        let removed = if entry
            .file_type()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .is_dir()
        {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}
