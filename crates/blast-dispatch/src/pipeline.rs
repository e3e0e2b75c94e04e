//! Dispatch pipeline: single and batch sends through a ready session.
//!
//! Every row yields exactly one result, in row order; a row's failure never
//! aborts its batch. Log persistence is fire-and-forget: the send outcome
//! and the logging outcome are independent failure domains.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use blast_log::{DeliveryLogStore, DeliveryStatus, MessageKind, NewLogEntry};
use blast_transport::{MediaHandle, SessionError, SessionManager};

use crate::normalize::{normalize_recipient, DEFAULT_COUNTRY_CODE};
use crate::rows::{pick_display_name, pick_phone_field, RowRecord};
use crate::template::render_template;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported per-row `FailureReason` values.
pub enum FailureReason {
    /// The recipient field did not normalize into a canonical identifier.
    BadNumber,
    /// The canonical identifier has no account on the chat network.
    NotRegistered,
    /// The session was not `Connected` when the row was attempted.
    NotReady,
    /// The transport rejected or failed the send.
    SendFailed,
    /// The resolved media file disappeared before the send.
    MediaUnavailable,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadNumber => "bad_number",
            Self::NotRegistered => "not_registered",
            Self::NotReady => "not_ready",
            Self::SendFailed => "send_failed",
            Self::MediaUnavailable => "media_unavailable",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Reason plus the raw transport detail when one exists.
pub struct DeliveryFailure {
    pub reason: FailureReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DeliveryFailure {
    fn new(reason: FailureReason) -> Self {
        Self {
            reason,
            detail: None,
        }
    }

    fn with_detail(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Outcome of one delivery attempt. Exactly one per row, never dropped.
pub struct DeliveryAttemptResult {
    pub row_index: usize,
    pub raw_recipient: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<DeliveryFailure>,
}

impl DeliveryAttemptResult {
    fn sent(row_index: usize, raw_recipient: String, message_id: String) -> Self {
        Self {
            row_index,
            raw_recipient,
            ok: true,
            transport_message_id: Some(message_id),
            failure: None,
        }
    }

    fn failed(row_index: usize, raw_recipient: String, failure: DeliveryFailure) -> Self {
        Self {
            row_index,
            raw_recipient,
            ok: false,
            transport_message_id: None,
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Aggregated outcome of a batch.
pub struct BatchDispatchReport {
    pub overall_ok: bool,
    pub succeeded: usize,
    pub total: usize,
    pub results: Vec<DeliveryAttemptResult>,
}

#[derive(Debug, Clone)]
/// One batch: a shared template, recipient rows, and the anti-burst delay
/// applied between consecutive sends.
pub struct BatchRequest {
    pub template: String,
    pub rows: Vec<RowRecord>,
    pub inter_message_delay: Duration,
    pub kind: MessageKind,
    pub media: Option<MediaHandle>,
}

#[derive(Debug, Error)]
/// Enumerates supported `DispatchError` values.
pub enum DispatchError {
    #[error("message template cannot be empty")]
    EmptyMessage,
    #[error("batch rows cannot be empty")]
    EmptyBatch,
    #[error("media sends require an image or document kind and a media handle")]
    MissingMedia,
    /// Distinct, retryable: the session never reached `Connected`. The
    /// pipeline does not retry on its own; backoff policy belongs to the
    /// caller.
    #[error("session not ready")]
    NotReady(#[source] SessionError),
}

#[derive(Debug, Clone)]
/// Public struct `DispatchConfig` used across Blastline components.
pub struct DispatchConfig {
    pub default_country_code: String,
    /// How long a send waits for the session to reach `Connected`.
    pub ready_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            ready_timeout: Duration::from_secs(15),
        }
    }
}

/// Turns send requests into validated, logged delivery attempts against a
/// ready session. Cheap to share; batch processing is strictly sequential
/// within one call but independent calls may run concurrently.
pub struct DispatchPipeline {
    session: Arc<SessionManager>,
    log: Arc<dyn DeliveryLogStore>,
    config: DispatchConfig,
}

impl DispatchPipeline {
    pub fn new(
        session: Arc<SessionManager>,
        log: Arc<dyn DeliveryLogStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            session,
            log,
            config,
        }
    }

    /// Sends one text message. Readiness failures surface as
    /// [`DispatchError::NotReady`] without a log entry; every other failure
    /// is logged and reported in the returned result.
    pub async fn send_text(
        &self,
        raw_recipient: &str,
        message: &str,
        display_name: &str,
    ) -> Result<DeliveryAttemptResult, DispatchError> {
        self.attempt(
            0,
            raw_recipient,
            message,
            display_name,
            MessageKind::Text,
            None,
        )
        .await
    }

    /// Sends one media message (image or document) with a caption.
    pub async fn send_media(
        &self,
        raw_recipient: &str,
        caption: &str,
        display_name: &str,
        kind: MessageKind,
        media: &MediaHandle,
    ) -> Result<DeliveryAttemptResult, DispatchError> {
        if kind == MessageKind::Text {
            return Err(DispatchError::MissingMedia);
        }
        self.attempt(0, raw_recipient, caption, display_name, kind, Some(media))
            .await
    }

    /// Processes rows strictly in order with the configured inter-message
    /// delay between consecutive rows. One result per row, always.
    pub async fn send_batch(
        &self,
        request: &BatchRequest,
    ) -> Result<BatchDispatchReport, DispatchError> {
        let template = request.template.trim();
        if template.is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        if request.rows.is_empty() {
            return Err(DispatchError::EmptyBatch);
        }
        if request.kind != MessageKind::Text && request.media.is_none() {
            return Err(DispatchError::MissingMedia);
        }
        // Fail fast before touching any row; a batch against a session that
        // never connected should not burn its rows into failure results.
        self.session
            .ensure_ready(self.config.ready_timeout)
            .await
            .map_err(DispatchError::NotReady)?;

        let total = request.rows.len();
        let mut results = Vec::with_capacity(total);
        for (row_index, row) in request.rows.iter().enumerate() {
            let text = render_template(template, row);
            let display_name = pick_display_name(row).unwrap_or_default();
            let raw_recipient = pick_phone_field(row).unwrap_or_default();

            let result = match self
                .attempt(
                    row_index,
                    &raw_recipient,
                    &text,
                    &display_name,
                    request.kind,
                    request.media.as_ref(),
                )
                .await
            {
                Ok(result) => result,
                // Session dropped mid-batch: this row degrades to a
                // not-ready failure (unlogged) and the loop continues.
                Err(DispatchError::NotReady(_)) => DeliveryAttemptResult::failed(
                    row_index,
                    raw_recipient,
                    DeliveryFailure::new(FailureReason::NotReady),
                ),
                Err(other) => return Err(other),
            };
            results.push(result);

            if row_index + 1 < total && !request.inter_message_delay.is_zero() {
                sleep(request.inter_message_delay).await;
            }
        }

        let succeeded = results.iter().filter(|result| result.ok).count();
        Ok(BatchDispatchReport {
            overall_ok: succeeded == total,
            succeeded,
            total,
            results,
        })
    }

    /// The four-step single-send logic shared by every entry point.
    async fn attempt(
        &self,
        row_index: usize,
        raw_recipient: &str,
        message: &str,
        display_name: &str,
        kind: MessageKind,
        media: Option<&MediaHandle>,
    ) -> Result<DeliveryAttemptResult, DispatchError> {
        // Step 1: normalize. Rejections are logged and never reach the
        // transport.
        let Some(canonical) =
            normalize_recipient(raw_recipient, &self.config.default_country_code)
        else {
            let failure = DeliveryFailure::new(FailureReason::BadNumber);
            self.log_safe(NewLogEntry {
                recipient: if raw_recipient.trim().is_empty() {
                    "unknown".to_string()
                } else {
                    raw_recipient.trim().to_string()
                },
                display_name: display_name.to_string(),
                message: message.to_string(),
                kind,
                status: DeliveryStatus::Failed,
                failure_text: Some(failure.reason.as_str().to_string()),
                ..NewLogEntry::default()
            });
            return Ok(DeliveryAttemptResult::failed(
                row_index,
                raw_recipient.to_string(),
                failure,
            ));
        };

        // Step 2: readiness. Reported distinctly, never logged, never
        // retried here.
        self.session
            .ensure_ready(self.config.ready_timeout)
            .await
            .map_err(DispatchError::NotReady)?;

        // Step 3: the recipient must exist on the chat network.
        match self.session.resolve_account(&canonical).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let failure = DeliveryFailure::new(FailureReason::NotRegistered);
                self.log_failed(&canonical, display_name, message, kind, &failure);
                return Ok(DeliveryAttemptResult::failed(
                    row_index,
                    raw_recipient.to_string(),
                    failure,
                ));
            }
            Err(SessionError::NotReady { .. }) => {
                return Ok(DeliveryAttemptResult::failed(
                    row_index,
                    raw_recipient.to_string(),
                    DeliveryFailure::new(FailureReason::NotReady),
                ));
            }
            Err(error) => {
                let failure =
                    DeliveryFailure::with_detail(FailureReason::SendFailed, error.to_string());
                self.log_failed(&canonical, display_name, message, kind, &failure);
                return Ok(DeliveryAttemptResult::failed(
                    row_index,
                    raw_recipient.to_string(),
                    failure,
                ));
            }
        }

        // Media must be resolved and still present before the send step.
        if let Some(media) = media {
            if !media.is_available() {
                let failure = DeliveryFailure::with_detail(
                    FailureReason::MediaUnavailable,
                    media.locator.clone(),
                );
                self.log_failed(&canonical, display_name, message, kind, &failure);
                return Ok(DeliveryAttemptResult::failed(
                    row_index,
                    raw_recipient.to_string(),
                    failure,
                ));
            }
        }

        // Step 4: the send itself.
        let sent = match media {
            Some(media) => self.session.send_media(&canonical, media, message).await,
            None => self.session.send_text(&canonical, message).await,
        };
        match sent {
            Ok(message_id) => {
                self.log_safe(NewLogEntry {
                    recipient: canonical,
                    display_name: display_name.to_string(),
                    message: message.to_string(),
                    kind,
                    status: DeliveryStatus::Sent,
                    transport_message_id: Some(message_id.clone()),
                    media_reference: media.map(|handle| handle.locator.clone()),
                    ..NewLogEntry::default()
                });
                Ok(DeliveryAttemptResult::sent(
                    row_index,
                    raw_recipient.to_string(),
                    message_id,
                ))
            }
            Err(SessionError::NotReady { .. }) => Ok(DeliveryAttemptResult::failed(
                row_index,
                raw_recipient.to_string(),
                DeliveryFailure::new(FailureReason::NotReady),
            )),
            Err(error) => {
                let failure =
                    DeliveryFailure::with_detail(FailureReason::SendFailed, error.to_string());
                self.log_failed(&canonical, display_name, message, kind, &failure);
                Ok(DeliveryAttemptResult::failed(
                    row_index,
                    raw_recipient.to_string(),
                    failure,
                ))
            }
        }
    }

    fn log_failed(
        &self,
        recipient: &str,
        display_name: &str,
        message: &str,
        kind: MessageKind,
        failure: &DeliveryFailure,
    ) {
        self.log_safe(NewLogEntry {
            recipient: recipient.to_string(),
            display_name: display_name.to_string(),
            message: message.to_string(),
            kind,
            status: DeliveryStatus::Failed,
            failure_text: Some(match failure.detail.as_deref() {
                Some(detail) => detail.to_string(),
                None => failure.reason.as_str().to_string(),
            }),
            ..NewLogEntry::default()
        });
    }

    /// A failed log write warns and moves on; it never alters the delivery
    /// outcome reported to the caller.
    fn log_safe(&self, entry: NewLogEntry) {
        if let Err(error) = self.log.append(entry) {
            warn!(error = %error, "failed to persist delivery log entry");
        }
    }
}
