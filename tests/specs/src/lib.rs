// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario tests.
//!
//! Spawns the real orchestrator (`bridge::run_with_shutdown`) against an
//! in-process mock cloud, the same "drive the real binary's entrypoint
//! against a stand-in backend" shape the teacher's own `tests/specs` crate
//! uses, swapped from a subprocess-and-real-transports harness to an
//! in-process one since the Bridge has a single HTTP-shaped surface.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use bridge::auth;
use bridge::config::BridgeConfig;
use bridge::event::DevicePairing;

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[derive(Default)]
struct MockCloudState {
    checkin_batches: Vec<Value>,
    heartbeats: Vec<Value>,
    alerts: Vec<Value>,
    security_events: Vec<Value>,
}

/// A stand-in for the cloud platform's HTTP API (§6), recording every call
/// so scenario tests can assert on what the Bridge sent.
pub struct MockCloud {
    addr: SocketAddr,
    state: Arc<Mutex<MockCloudState>>,
    shutdown: CancellationToken,
}

impl MockCloud {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(Mutex::new(MockCloudState::default()));
        let router = Router::new()
            .route("/api/v1/devices/pair", post(handle_pair))
            .route("/api/v1/checkin", post(handle_checkin))
            .route("/api/v1/events", post(handle_checkin))
            .route("/api/v1/devices/heartbeat", post(handle_empty_ok))
            .route("/api/v1/devices/heartbeat/trigger", post(handle_empty_ok))
            .route("/api/v1/devices/status", post(handle_empty_ok))
            .route("/api/v1/devices/metrics", post(handle_empty_ok))
            .route("/api/v1/devices/alerts", post(handle_alerts))
            .route("/api/v1/devices/security-events", post(handle_security_events))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).with_graceful_shutdown(server_shutdown.cancelled_owned()).await;
        });

        Ok(Self { addr, state, shutdown })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockCloudState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Total number of individual events seen across every `/checkin` POST.
    pub fn total_checked_in(&self) -> usize {
        self.lock().checkin_batches.iter().filter_map(|b| b["events"].as_array()).map(|e| e.len()).sum()
    }

    pub fn checkin_batch_count(&self) -> usize {
        self.lock().checkin_batches.len()
    }

    pub fn has_security_alert(&self) -> bool {
        self.lock().alerts.iter().any(|a| a["type"] == "security_event")
    }

    /// The most recent `security_event`-kind alert's `metadata` field, if any.
    pub fn security_alert_metadata(&self) -> Option<Value> {
        self.lock().alerts.iter().rev().find(|a| a["type"] == "security_event").map(|a| a["metadata"].clone())
    }

    pub fn security_event_count(&self) -> usize {
        self.lock().security_events.len()
    }

    pub fn alert_count(&self) -> usize {
        self.lock().alerts.len()
    }

    pub fn stop(self) {
        self.shutdown.cancel();
    }
}

async fn handle_pair() -> impl IntoResponse {
    Json(serde_json::json!({
        "device_id": "test-device",
        "device_key": "test-secret",
        "config": {},
    }))
}

async fn handle_checkin(State(state): State<Arc<Mutex<MockCloudState>>>, Json(body): Json<Value>) -> impl IntoResponse {
    let processed_ids: Vec<String> = body["events"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|e| e["event_id"].as_str().map(str::to_string))
        .collect();
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).checkin_batches.push(body);
    Json(serde_json::json!({ "processedIds": processed_ids, "failedIds": [] }))
}

async fn handle_empty_ok() -> impl IntoResponse {
    Json(serde_json::json!({}))
}

async fn handle_alerts(State(state): State<Arc<Mutex<MockCloudState>>>, Json(body): Json<Value>) -> impl IntoResponse {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).alerts.push(body);
    Json(serde_json::json!({}))
}

async fn handle_security_events(
    State(state): State<Arc<Mutex<MockCloudState>>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).security_events.push(body);
    Json(serde_json::json!({}))
}

/// A running Bridge orchestrator, pre-paired against a [`MockCloud`], driven
/// by an externally-owned shutdown token rather than process signals.
pub struct BridgeHarness {
    pub state_dir: tempfile::TempDir,
    pub webhook_port: u16,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl BridgeHarness {
    /// Start the orchestrator with a pre-seeded pairing record and fast
    /// intervals so scenario tests converge in well under a minute.
    pub async fn start(cloud_base_url: &str, adapter_config_path: Option<&Path>) -> anyhow::Result<Self> {
        Self::start_with_webhook_token(cloud_base_url, adapter_config_path, None).await
    }

    /// Like [`start`](Self::start), additionally configuring the inbound
    /// webhook's bearer-token requirement.
    pub async fn start_with_webhook_token(
        cloud_base_url: &str,
        adapter_config_path: Option<&Path>,
        webhook_token: Option<&str>,
    ) -> anyhow::Result<Self> {
        let state_dir = tempfile::tempdir()?;
        let pairing = DevicePairing { device_id: "test-device".to_string(), device_key: "test-secret".to_string() };
        auth::save_pairing(&auth::pairing_path(state_dir.path()), &pairing)?;

        let webhook_port = free_port()?;
        let mut args = vec![
            "bridge".to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            webhook_port.to_string(),
            "--cloud-url".to_string(),
            cloud_base_url.to_string(),
            "--state-dir".to_string(),
            state_dir.path().display().to_string(),
            "--submit-interval-ms".to_string(),
            "200".to_string(),
            "--metrics-interval-ms".to_string(),
            "500".to_string(),
            "--alert-interval-ms".to_string(),
            "300".to_string(),
            "--heartbeat-interval-ms".to_string(),
            "5000".to_string(),
            "--graceful-stop-ms".to_string(),
            "2000".to_string(),
        ];
        if let Some(path) = adapter_config_path {
            args.push("--adapter-config".to_string());
            args.push(path.display().to_string());
        }
        if let Some(token) = webhook_token {
            args.push("--webhook-token".to_string());
            args.push(token.to_string());
        }
        let config = BridgeConfig::parse_from(args);

        let shutdown = CancellationToken::new();
        let run_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move { bridge::run_with_shutdown(config, run_shutdown).await });

        Ok(Self { state_dir, webhook_port, shutdown, handle })
    }

    pub fn webhook_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.webhook_port)
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.handle.await??;
        Ok(())
    }
}
