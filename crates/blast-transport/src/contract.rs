//! Transport capability contract.
//!
//! Defines the seam between the session manager and the external chat-client
//! library. The transport reports lifecycle changes as [`TransportEvent`]s
//! over a channel handed to it at initialization; all outbound operations go
//! through the async trait so tests can script a transport end to end.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "event")]
/// Lifecycle events emitted by the transport while a connection attempt is
/// in flight or an established session changes state.
pub enum TransportEvent {
    /// The transport started loading its connection machinery.
    Loading,
    /// A pairing challenge the operator must complete (e.g. a QR payload).
    PairingChallenge { payload: String },
    /// Credential material was accepted by the chat network.
    Authenticated,
    /// The connection can accept send operations.
    Ready { identity: String },
    /// Stored credentials were rejected.
    AuthFailure { reason: String },
    /// The connection dropped.
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Error)]
/// Enumerates supported `TransportError` values.
pub enum TransportError {
    #[error("transport initialize failed: {0}")]
    InitializeFailed(String),
    #[error("account resolution failed: {0}")]
    ResolveFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("transport teardown failed: {0}")]
    TeardownFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// A resolved, re-fetchable reference to an uploaded media file.
///
/// Delivery logs persist `locator`, never the file bytes, so an entry can be
/// re-fetched long after the attempt through the media-serving collaborator.
pub struct MediaHandle {
    pub path: PathBuf,
    pub file_name: String,
    pub locator: String,
}

impl MediaHandle {
    /// Resolves an on-disk file into a handle the dispatch pipeline can send.
    pub fn resolve(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("failed to stat media file {}", path.display()))?;
        if !metadata.is_file() {
            bail!("media path {} is not a regular file", path.display());
        }
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .with_context(|| format!("media path {} has no usable file name", path.display()))?
            .to_string();
        Ok(Self {
            path: path.to_path_buf(),
            locator: format!("/media/{file_name}"),
            file_name,
        })
    }

    /// Returns true while the backing file is still present and readable.
    pub fn is_available(&self) -> bool {
        self.path.is_file()
    }
}

#[async_trait]
/// Trait contract for `ChatTransport` behavior.
///
/// Implementations own the actual chat-network client. `initialize` must be
/// non-blocking with respect to the connection attempt itself: it starts the
/// attempt and reports progress through the event channel.
pub trait ChatTransport: Send + Sync {
    async fn initialize(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError>;

    /// Resolves whether `canonical` has an account on the chat network,
    /// returning the network-side id when it does.
    async fn resolve_account(&self, canonical: &str) -> Result<Option<String>, TransportError>;

    /// Sends a text message and returns the transport-assigned message id.
    async fn send_text(&self, canonical: &str, text: &str) -> Result<String, TransportError>;

    /// Sends a media file with a caption and returns the message id.
    async fn send_media(
        &self,
        canonical: &str,
        media: &MediaHandle,
        caption: &str,
    ) -> Result<String, TransportError>;

    /// Tears the connection down and releases the underlying client.
    async fn destroy(&self) -> Result<(), TransportError>;
}
