use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use blast_dispatch::{
    BatchRequest, DispatchConfig, DispatchPipeline, FailureReason, RowRecord,
};
use blast_log::{
    DeliveryLogStore, DeliveryStatus, JsonlDeliveryLog, LogQuery, MessageKind,
    MAX_LOG_PAGE_SIZE,
};
use blast_transport::{
    ChatTransport, MediaHandle, SessionConfig, SessionError, SessionManager, SessionPhase,
    TransportError, TransportEvent,
};

/// Transport double that walks the full pairing handshake on initialize and
/// scripts per-recipient behavior for the dispatch steps.
struct ScriptedTransport {
    unregistered: Vec<String>,
    failing: Vec<String>,
    sent_texts: AtomicUsize,
    destroy_delay: Option<Duration>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            unregistered: Vec::new(),
            failing: Vec::new(),
            sent_texts: AtomicUsize::new(0),
            destroy_delay: None,
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn initialize(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        for event in [
            TransportEvent::Loading,
            TransportEvent::PairingChallenge {
                payload: "pairing-payload".to_string(),
            },
            TransportEvent::Authenticated,
            TransportEvent::Ready {
                identity: "628000111222".to_string(),
            },
        ] {
            let _ = events.send(event).await;
        }
        Ok(())
    }

    async fn resolve_account(&self, canonical: &str) -> Result<Option<String>, TransportError> {
        if self.unregistered.iter().any(|number| number == canonical) {
            return Ok(None);
        }
        Ok(Some(format!("{canonical}@c.us")))
    }

    async fn send_text(&self, canonical: &str, _text: &str) -> Result<String, TransportError> {
        if self.failing.iter().any(|number| number == canonical) {
            return Err(TransportError::SendFailed("socket closed".to_string()));
        }
        let n = self.sent_texts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("wa-{n}"))
    }

    async fn send_media(
        &self,
        _canonical: &str,
        media: &MediaHandle,
        _caption: &str,
    ) -> Result<String, TransportError> {
        Ok(format!("wa-media-{}", media.file_name))
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        if let Some(delay) = self.destroy_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

struct Stack {
    session: Arc<SessionManager>,
    pipeline: DispatchPipeline,
    store: Arc<JsonlDeliveryLog>,
    dir: tempfile::TempDir,
}

async fn connected_stack(transport: ScriptedTransport) -> Stack {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = Arc::new(SessionManager::new(
        Arc::new(transport),
        SessionConfig {
            credential_dir: dir.path().join("tokens"),
            ..SessionConfig::default()
        },
    ));
    session.connect().await.expect("connect");
    session
        .ensure_ready(Duration::from_secs(2))
        .await
        .expect("session must reach connected");
    let store = Arc::new(
        JsonlDeliveryLog::open(dir.path().join("delivery-log.jsonl")).expect("open store"),
    );
    let pipeline = DispatchPipeline::new(
        Arc::clone(&session),
        Arc::clone(&store) as Arc<dyn DeliveryLogStore>,
        DispatchConfig::default(),
    );
    Stack {
        session,
        pipeline,
        store,
        dir,
    }
}

fn row(number: &str, name: &str) -> RowRecord {
    let mut record = BTreeMap::new();
    record.insert("Number".to_string(), json!(number));
    record.insert("Full Name".to_string(), json!(name));
    record
}

#[tokio::test]
async fn batch_of_five_with_mixed_failures_yields_five_ordered_results() {
    let stack = connected_stack(ScriptedTransport {
        unregistered: vec!["6282222222222".to_string()],
        failing: vec!["6285555555555".to_string()],
        ..ScriptedTransport::new()
    })
    .await;

    let request = BatchRequest {
        template: "Hi [fullname], your spot is confirmed".to_string(),
        rows: vec![
            row("081111111111", "Ayu"),
            row("082222222222", "Budi"),
            row("not-a-number", "Cici"),
            row("084444444444", "Dewi"),
            row("085555555555", "Eko"),
        ],
        inter_message_delay: Duration::from_millis(5),
        kind: MessageKind::Text,
        media: None,
    };
    let report = stack.pipeline.send_batch(&request).await.expect("batch");

    assert_eq!(report.total, 5);
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.succeeded, 2);
    assert!(!report.overall_ok);

    let reasons: Vec<Option<FailureReason>> = report
        .results
        .iter()
        .map(|result| result.failure.as_ref().map(|failure| failure.reason))
        .collect();
    assert_eq!(reasons[0], None);
    assert_eq!(reasons[1], Some(FailureReason::NotRegistered));
    assert_eq!(reasons[2], Some(FailureReason::BadNumber));
    assert_eq!(reasons[3], None);
    assert_eq!(reasons[4], Some(FailureReason::SendFailed));
    for (index, result) in report.results.iter().enumerate() {
        assert_eq!(result.row_index, index);
    }

    // Every row produced exactly one log entry; readiness was never the
    // failure here so nothing is missing.
    let page = stack
        .store
        .query(&LogQuery {
            page_size: MAX_LOG_PAGE_SIZE,
            ..LogQuery::default()
        })
        .expect("query");
    assert_eq!(page.total, 5);
    let sent = stack
        .store
        .query(&LogQuery {
            status: Some(DeliveryStatus::Sent),
            ..LogQuery::default()
        })
        .expect("query");
    assert_eq!(sent.total, 2);
    for entry in &sent.items {
        assert_eq!(entry.succeeded, Some(true));
        assert!(entry.transport_message_id.is_some());
        assert!(entry.message.ends_with("your spot is confirmed"));
    }
}

#[tokio::test]
async fn media_batch_records_refetchable_locator() {
    let stack = connected_stack(ScriptedTransport::new()).await;
    let media_path = stack.dir.path().join("invite.pdf");
    std::fs::write(&media_path, b"%PDF-").expect("write media");
    let media = MediaHandle::resolve(&media_path).expect("resolve media");

    let request = BatchRequest {
        template: "Invitation for [fullname]".to_string(),
        rows: vec![row("081111111111", "Ayu")],
        inter_message_delay: Duration::ZERO,
        kind: MessageKind::Document,
        media: Some(media),
    };
    let report = stack.pipeline.send_batch(&request).await.expect("batch");
    assert!(report.overall_ok);

    let page = stack.store.query(&LogQuery::default()).expect("query");
    assert_eq!(page.items[0].kind, MessageKind::Document);
    assert_eq!(
        page.items[0].media_reference.as_deref(),
        Some("/media/invite.pdf")
    );
}

#[tokio::test]
async fn status_and_pairing_artifact_follow_the_session() {
    let stack = connected_stack(ScriptedTransport::new()).await;
    let status = stack.session.status();
    assert_eq!(status.phase, SessionPhase::Connected);
    assert!(status.connected);
    assert_eq!(status.connected_identity.as_deref(), Some("628000111222"));
    // Already connected: the artifact endpoint has nothing to offer.
    assert!(stack.session.pairing_artifact().is_none());
}

#[tokio::test]
async fn overlapping_resets_surface_busy_to_the_second_caller() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = Arc::new(SessionManager::new(
        Arc::new(ScriptedTransport {
            destroy_delay: Some(Duration::from_millis(100)),
            ..ScriptedTransport::new()
        }),
        SessionConfig {
            credential_dir: dir.path().join("tokens"),
            ..SessionConfig::default()
        },
    ));
    session.connect().await.expect("connect");
    session
        .ensure_ready(Duration::from_secs(2))
        .await
        .expect("ready");

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.reset().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = session.reset().await;
    assert!(matches!(second, Err(SessionError::ResetInProgress)));

    first.await.expect("join").expect("first reset completes");
    // The reset reconnects on its own; readiness comes back without another
    // explicit connect call.
    session
        .ensure_ready(Duration::from_secs(2))
        .await
        .expect("ready again after reset");
}
