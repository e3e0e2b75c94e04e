//! Log entry model and the status-derivation write contract.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageKind` values.
pub enum MessageKind {
    Text,
    Image,
    Document,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `DeliveryStatus` values.
pub enum DeliveryStatus {
    Queued,
    Sent,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// The `succeeded` flag implied by a status when the caller left the
    /// flag unset. `Queued` implies nothing.
    pub fn derived_succeeded(self) -> Option<bool> {
        match self {
            Self::Sent | Self::Success => Some(true),
            Self::Failed => Some(false),
            Self::Queued => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One persisted delivery attempt.
pub struct LogEntry {
    pub id: String,
    pub recipient: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub message: String,
    pub kind: MessageKind,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_reference: Option<String>,
    pub created_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
/// A delivery attempt handed to the store for persistence. The store
/// assigns the id and timestamp and applies the derivation contract.
pub struct NewLogEntry {
    pub recipient: String,
    pub display_name: String,
    pub message: String,
    pub kind: MessageKind,
    pub status: DeliveryStatus,
    pub succeeded: Option<bool>,
    pub failure_text: Option<String>,
    pub transport_message_id: Option<String>,
    pub media_reference: Option<String>,
}

impl Default for NewLogEntry {
    fn default() -> Self {
        Self {
            recipient: "unknown".to_string(),
            display_name: String::new(),
            message: String::new(),
            kind: MessageKind::Text,
            // Safe default for partially populated writes.
            status: DeliveryStatus::Failed,
            succeeded: None,
            failure_text: None,
            transport_message_id: None,
            media_reference: None,
        }
    }
}

impl NewLogEntry {
    /// Applies the write contract and stamps identity: an explicit caller
    /// `succeeded` always wins; otherwise it is derived from `status`. The
    /// status itself is never invented retroactively.
    pub fn into_entry(self, id: String, created_unix_ms: u64) -> LogEntry {
        let succeeded = self.succeeded.or_else(|| self.status.derived_succeeded());
        LogEntry {
            id,
            recipient: self.recipient,
            display_name: self.display_name,
            message: self.message,
            kind: self.kind,
            status: self.status,
            succeeded,
            failure_text: self.failure_text,
            transport_message_id: self.transport_message_id,
            media_reference: self.media_reference,
            created_unix_ms,
        }
    }
}
