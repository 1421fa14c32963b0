// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batched submission service (§4.H): periodically drains the queue manager
//! through the cloud client and reports per-event outcomes back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{CloudClient, CloudRequest};
use crate::error::BridgeError;
use crate::event::generate_event_id;
use crate::queue::QueueManager;
use crate::store::StoredEvent;

/// Per-tick tuning (§4.H).
#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    pub submit_interval: Duration,
    pub inter_batch_pacing: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self { submit_interval: Duration::from_secs(10), inter_batch_pacing: Duration::from_millis(100) }
    }
}

/// Wire payload for `POST /api/v1/checkin`.
#[derive(Debug, Clone, serde::Serialize)]
struct CheckinRequest {
    events: Vec<CheckinEvent>,
}

#[derive(Debug, Clone, serde::Serialize)]
struct CheckinEvent {
    event_id: String,
    external_user_id: String,
    timestamp: String,
    event_type: String,
    is_simulated: bool,
    device_id: String,
}

/// Response from `/api/v1/checkin`: which event ids were accepted and which
/// failed. Idempotency on repeated `eventId`s is assumed (§9 Open Questions).
#[derive(Debug, Clone, Default, serde::Deserialize)]
struct CheckinResponse {
    #[serde(rename = "processedIds", default)]
    processed_ids: Vec<String>,
    #[serde(rename = "failedIds", default)]
    failed_ids: Vec<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

/// Runs the submission loop until `shutdown` is cancelled.
pub async fn run(
    queue: Arc<QueueManager>,
    client: Arc<CloudClient>,
    config: SubmissionConfig,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.submit_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = submit_once(&queue, &client, &config, &shutdown).await {
                    if matches!(e, BridgeError::Cancelled) {
                        break;
                    }
                    warn!(error = %e, "submission tick failed");
                }
            }
        }
    }
    info!("submission service stopped");
}

/// One submission tick: fetch pending, backfill event ids, submit, and map
/// the response back onto row ids (§4.H).
pub(crate) async fn submit_once(
    queue: &QueueManager,
    client: &CloudClient,
    config: &SubmissionConfig,
    shutdown: &CancellationToken,
) -> Result<(), BridgeError> {
    let batch = queue.dequeue_batch().await?;
    if batch.is_empty() {
        return Ok(());
    }

    let mut by_event_id: HashMap<String, i64> = HashMap::with_capacity(batch.len());
    let mut events = Vec::with_capacity(batch.len());
    let mut backfilled: Vec<(i64, String)> = Vec::new();

    for stored in &batch {
        let event_id = match &stored.event.event_id {
            Some(id) => id.clone(),
            None => {
                let id = generate_event_id();
                backfilled.push((stored.row_id, id.clone()));
                id
            }
        };
        by_event_id.insert(event_id.clone(), stored.row_id);
        events.push(to_checkin_event(stored, &event_id));
    }

    if !backfilled.is_empty() {
        debug!(count = backfilled.len(), "backfilled missing event_ids before submission");
    }

    let body = serde_json::to_value(CheckinRequest { events })
        .map_err(|e| BridgeError::Internal(format!("serialize checkin body: {e}")))?;
    let req = CloudRequest { method: Method::POST, path: "/api/v1/checkin", body: Some(body), require_auth: true };

    match client.execute(req, shutdown).await {
        Ok(value) => {
            let response: CheckinResponse = serde_json::from_value(value).unwrap_or_default();
            let sent_rows: Vec<i64> = response
                .processed_ids
                .iter()
                .filter_map(|id| by_event_id.get(id).copied())
                .collect();
            let failed_rows: Vec<i64> = response
                .failed_ids
                .iter()
                .filter_map(|id| by_event_id.get(id).copied())
                .collect();
            queue.mark_sent(&sent_rows).await?;
            if !failed_rows.is_empty() {
                let error_message = response.error_message.as_deref().unwrap_or("unspecified");
                queue.mark_failed(&failed_rows, error_message).await?;
            }
            info!(sent = sent_rows.len(), failed = failed_rows.len(), "submitted event batch");
        }
        Err(e @ BridgeError::Cancelled) => return Err(e),
        Err(e) => {
            let row_ids: Vec<i64> = batch.iter().map(|s| s.row_id).collect();
            error!(error = %e, batch_size = row_ids.len(), "checkin submission failed, events remain queued");
            queue.mark_failed(&row_ids, &e.to_string()).await?;
        }
    }

    tokio::select! {
        _ = shutdown.cancelled() => return Err(BridgeError::Cancelled),
        _ = tokio::time::sleep(config.inter_batch_pacing) => {}
    }
    Ok(())
}

fn to_checkin_event(stored: &StoredEvent, event_id: &str) -> CheckinEvent {
    let timestamp: chrono::DateTime<chrono::Utc> = stored.event.timestamp.into();
    let timestamp = timestamp.to_rfc3339();
    CheckinEvent {
        event_id: event_id.to_string(),
        external_user_id: stored.event.external_user_id.clone(),
        timestamp,
        event_type: stored.event.event_type.as_str().to_string(),
        is_simulated: stored.event.is_simulated,
        device_id: stored.event.device_id.clone(),
    }
}

#[cfg(test)]
#[path = "submission_tests.rs"]
mod tests;
