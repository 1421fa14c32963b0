use std::time::SystemTime;

use super::*;
use crate::crypto::RawDataKey;
use crate::event::{CanonicalEvent, EventType};
use crate::store::Store;

fn sample_event(user: &str) -> CanonicalEvent {
    CanonicalEvent {
        event_id: None,
        external_user_id: user.into(),
        timestamp: SystemTime::now(),
        event_type: EventType::Entry,
        is_simulated: true,
        device_id: "device-1".into(),
        raw_data: None,
    }
}

async fn queue_with_events(n: usize) -> QueueManager {
    let store = Store::open_in_memory(RawDataKey::derive("k"), 5).await.expect("open store");
    let queue = QueueManager::new(store, crate::event::PerformanceTier::Lite);
    for i in 0..n {
        queue.enqueue(&sample_event(&format!("user-{i}"))).await.expect("enqueue");
    }
    queue
}

#[tokio::test]
async fn submit_once_with_empty_queue_is_a_noop() -> anyhow::Result<()> {
    let queue = queue_with_events(0).await;
    let client = CloudClient::new("http://127.0.0.1:1", None)?.with_max_attempts(1);
    let shutdown = CancellationToken::new();
    submit_once(&queue, &client, &SubmissionConfig::default(), &shutdown).await?;
    Ok(())
}

#[tokio::test]
async fn submit_once_against_unreachable_cloud_marks_rows_failed_not_lost() -> anyhow::Result<()> {
    let queue = queue_with_events(2).await;
    // Port 1 is reserved and never accepts, so every attempt is a transport error.
    let client = CloudClient::new("http://127.0.0.1:1", Some(crate::event::DevicePairing {
        device_id: "device-1".into(),
        device_key: "key".into(),
    }))?
    .with_max_attempts(1);
    let shutdown = CancellationToken::new();

    submit_once(&queue, &client, &SubmissionConfig::default(), &shutdown).await?;

    // Neither event was dropped: still present, pending, with a bumped retry count.
    assert_eq!(queue.depth().await?, 2);
    let page = queue
        .query(&crate::store::QueryFilter { limit: 10, ..Default::default() })
        .await?;
    assert!(page.rows.iter().all(|r| r.retry_count >= 1));
    Ok(())
}

#[test]
fn to_checkin_event_formats_timestamp_as_rfc3339() {
    let stored = StoredEvent {
        row_id: 1,
        event: sample_event("user-1"),
        retry_count: 0,
        last_error: None,
        sent_at: None,
        created_at: SystemTime::now(),
    };
    let checkin = to_checkin_event(&stored, "evt_abc");
    assert_eq!(checkin.event_id, "evt_abc");
    assert_eq!(checkin.external_user_id, "user-1");
    assert!(chrono::DateTime::parse_from_rfc3339(&checkin.timestamp).is_ok());
}

/// S3 — partial failure: the cloud accepts some events and rejects others
/// with an `errorMessage`, which must land in `last_error` verbatim.
#[tokio::test]
async fn submit_once_with_partial_failure_records_cloud_error_message() -> anyhow::Result<()> {
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc as StdArc;
    use tokio::net::TcpListener;

    let queue = queue_with_events(2).await;
    let rejected_user: String = {
        let page = queue.query(&crate::store::QueryFilter { limit: 10, ..Default::default() }).await?;
        page.rows[0].event.external_user_id.clone()
    };

    #[derive(Clone)]
    struct MockState {
        rejected_user: StdArc<String>,
    }

    async fn handle_checkin(
        State(state): State<MockState>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        let events = body["events"].as_array().cloned().unwrap_or_default();
        let mut processed = Vec::new();
        let mut failed = Vec::new();
        for e in events {
            let id = e["event_id"].as_str().unwrap_or_default().to_string();
            if e["external_user_id"].as_str() == Some(state.rejected_user.as_str()) {
                failed.push(id);
            } else {
                processed.push(id);
            }
        }
        Json(serde_json::json!({
            "processedIds": processed,
            "failedIds": failed,
            "errorMessage": "user_unknown",
        }))
    }

    let state = MockState { rejected_user: StdArc::new(rejected_user.clone()) };
    let router = Router::new().route("/api/v1/checkin", post(handle_checkin)).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let client = CloudClient::new(
        format!("http://{addr}"),
        Some(crate::event::DevicePairing { device_id: "device-1".into(), device_key: "key".into() }),
    )?
    .with_max_attempts(1);
    let shutdown = CancellationToken::new();

    submit_once(&queue, &client, &SubmissionConfig::default(), &shutdown).await?;

    let page = queue.query(&crate::store::QueryFilter { limit: 10, ..Default::default() }).await?;
    let rejected_row =
        page.rows.iter().find(|r| r.event.external_user_id == rejected_user).expect("rejected row present");
    assert_eq!(rejected_row.last_error.as_deref(), Some("user_unknown"));
    let accepted_row =
        page.rows.iter().find(|r| r.event.external_user_id != rejected_user).expect("accepted row present");
    assert!(accepted_row.sent_at.is_some());
    Ok(())
}
