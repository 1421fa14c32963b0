// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge: an edge agent that forwards biometric/RFID/webhook access events
//! to the cloud platform (§4.J). `run` wires the durable store, queue, cloud
//! client, configured adapters, and the submission/monitoring/heartbeat/
//! webhook loops into one supervised lifetime, the same shape as the
//! teacher's `mux::run`.

pub mod adapter;
pub mod auth;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event;
pub mod monitoring;
pub mod queue;
pub mod store;
pub mod submission;
pub mod webhook_server;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::biometric::{BiometricAdapter, VendorBiometricDriver, DEFAULT_SYNC_INTERVAL};
use crate::adapter::rfid::{RfidAdapter, UnimplementedRfidReader};
use crate::adapter::simulator::SimulatorAdapter;
use crate::adapter::webhook::WebhookAdapter;
use crate::adapter::{Adapter, AdapterContext, AdapterKind, EventSink};
use crate::client::CloudClient;
use crate::config::BridgeConfig;
use crate::crypto::RawDataKey;
use crate::error::BridgeError;
use crate::event::{generate_event_id, CanonicalEvent, PerformanceTier, RawEvent};
use crate::monitoring::{
    AlertHandler, AlertManager, AlertThresholds, CloudReporter, ConsoleHandler, JsonlAlertLedger, LogHandler,
    MetricsRing, SecurityEventTracker,
};
use crate::queue::QueueManager;
use crate::store::Store;
use crate::submission::SubmissionConfig;
use crate::webhook_server::WebhookState;

const DEFAULT_RFID_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_SIMULATOR_INTERVAL: Duration = Duration::from_secs(5);
const MIN_RESTART_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(60);
const FINAL_DRAIN_BUDGET: Duration = Duration::from_secs(5);

/// Run the agent until SIGINT/SIGTERM, the teacher's own shutdown trigger
/// for `mux::run`.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            ctrl_c_shutdown.cancel();
        }
    });
    run_with_shutdown(config, shutdown).await
}

/// The orchestrator body (§4.J), parameterized on an externally-owned
/// cancellation token so integration tests can drive a bounded lifetime
/// instead of relying on process signals.
pub async fn run_with_shutdown(config: BridgeConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    config.validate()?;
    let state_dir = config.resolve_state_dir()?;
    let pairing_path = auth::pairing_path(&state_dir);
    let pairing = auth::load_pairing(&pairing_path)?;

    let tier = match config.tier_override()? {
        Some(tier) => tier,
        None => detect_tier(),
    };
    info!(%tier, paired = pairing.is_some(), "bridge starting");

    let raw_data_key = match &pairing {
        Some(p) => RawDataKey::derive(&p.device_key),
        None => RawDataKey::derive_unpaired(&install_id(&state_dir)?),
    };
    let store = Store::open(state_dir.join("events.db"), raw_data_key, tier.params().max_retries).await?;
    let queue = Arc::new(QueueManager::new(store, tier));

    let client = Arc::new(CloudClient::new(config.cloud_url.clone(), pairing.clone())?);
    let device_id = pairing.as_ref().map(|p| p.device_id.clone()).unwrap_or_else(|| "unpaired".to_string());

    let definitions = match &config.adapter_config {
        Some(path) => load_adapter_definitions(path)?,
        None => AdapterDefinitions::default(),
    };

    let (enrich_tx, mut enrich_rx) = mpsc::channel::<(AdapterKind, RawEvent)>(1024);
    let mut background: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    let mut webhook_inbound: Option<mpsc::Sender<RawEvent>> = None;

    for def in &definitions.adapters {
        let (adapter_tx, adapter_rx): (EventSink, mpsc::Receiver<RawEvent>) = mpsc::channel(256);
        background.push(spawn_forwarder(def.kind(), adapter_rx, enrich_tx.clone()));

        if let AdapterDefinition::Webhook { name } = def {
            let webhook_adapter = Box::new(WebhookAdapter::new(name.clone()));
            webhook_inbound = Some(webhook_adapter.inbound_sender());
            let ctx = AdapterContext { device_id: device_id.clone(), shutdown: shutdown.clone() };
            background.push(tokio::spawn(async move {
                if let Err(e) = webhook_adapter.run(ctx, adapter_tx).await {
                    error!(error = %e, "webhook adapter exited with error");
                }
            }));
            continue;
        }

        let ctx = AdapterContext { device_id: device_id.clone(), shutdown: shutdown.clone() };
        background.push(spawn_adapter_supervised(def.clone(), ctx, adapter_tx));
    }
    drop(enrich_tx);

    let security = Arc::new(SecurityEventTracker::new());
    let webhook_state = WebhookState {
        webhook_token: config.webhook_token.clone(),
        inbound_tx: webhook_inbound.unwrap_or_else(|| {
            let (tx, _rx) = mpsc::channel(1);
            tx
        }),
        security: Arc::clone(&security),
    };
    let webhook_router = webhook_server::build_router(webhook_state);
    let listener = TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    info!(addr = %listener.local_addr()?, "webhook listener bound");
    let listener_shutdown = shutdown.clone();
    background.push(tokio::spawn(async move {
        if let Err(e) =
            axum::serve(listener, webhook_router).with_graceful_shutdown(listener_shutdown.cancelled_owned()).await
        {
            error!(error = %e, "webhook listener exited with error");
        }
    }));

    let last_adapter_event = Arc::new(RwLock::new(None::<SystemTime>));
    let enrich_task = {
        let queue = Arc::clone(&queue);
        let last_adapter_event = Arc::clone(&last_adapter_event);
        let device_id = device_id.clone();
        tokio::spawn(async move {
            while let Some((kind, raw)) = enrich_rx.recv().await {
                let event = CanonicalEvent {
                    event_id: Some(generate_event_id()),
                    external_user_id: raw.external_user_id,
                    timestamp: raw.timestamp,
                    event_type: raw.event_type,
                    is_simulated: matches!(kind, AdapterKind::Simulator),
                    device_id: device_id.clone(),
                    raw_data: raw.raw_data,
                };
                *last_adapter_event.write().await = Some(SystemTime::now());
                if let Err(e) = queue.enqueue(&event).await {
                    error!(error = %e, "failed to enqueue enriched event");
                }
            }
        })
    };

    let submission_config = SubmissionConfig { submit_interval: config.submit_interval(), ..Default::default() };
    let submission_handle = spawn_supervised("submission", shutdown.clone(), {
        let queue = Arc::clone(&queue);
        let client = Arc::clone(&client);
        let submission_config = submission_config.clone();
        let shutdown = shutdown.clone();
        move || {
            let queue = Arc::clone(&queue);
            let client = Arc::clone(&client);
            let submission_config = submission_config.clone();
            let shutdown = shutdown.clone();
            Box::pin(submission::run(queue, client, submission_config, shutdown)) as Pin<Box<dyn Future<Output = ()> + Send>>
        }
    });

    let metrics_ring = Arc::new(MetricsRing::new(config.metrics_interval()));
    let metrics_handle = spawn_supervised("metrics", shutdown.clone(), {
        let ring = Arc::clone(&metrics_ring);
        let queue = Arc::clone(&queue);
        let interval = config.metrics_interval();
        let shutdown = shutdown.clone();
        move || {
            let ring = Arc::clone(&ring);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            Box::pin(monitoring::run_metrics_loop(ring, queue, sysinfo::System::new_all(), interval, shutdown))
                as Pin<Box<dyn Future<Output = ()> + Send>>
        }
    });

    let handlers: Vec<Box<dyn AlertHandler>> =
        vec![Box::new(LogHandler), Box::new(JsonlAlertLedger::new(Some(state_dir.as_path()))), Box::new(ConsoleHandler)];
    let cloud_reporter = CloudReporter::new(Arc::clone(&client), shutdown.clone());
    let alert_manager = Arc::new(AlertManager::new(handlers, Some(cloud_reporter), device_id.clone()));
    let thresholds = AlertThresholds { offline_threshold: config.offline_threshold(), ..Default::default() };
    let alert_handle = spawn_supervised("alerts", shutdown.clone(), {
        let manager = Arc::clone(&alert_manager);
        let ring = Arc::clone(&metrics_ring);
        let queue = Arc::clone(&queue);
        let security = Arc::clone(&security);
        let last_adapter_event = Arc::clone(&last_adapter_event);
        let interval = config.alert_interval();
        let thresholds = thresholds.clone();
        let shutdown = shutdown.clone();
        move || {
            Box::pin(monitoring::run_alert_loop(
                Arc::clone(&manager),
                Arc::clone(&ring),
                Arc::clone(&queue),
                Arc::clone(&security),
                Arc::clone(&last_adapter_event),
                interval,
                thresholds.clone(),
                shutdown.clone(),
            )) as Pin<Box<dyn Future<Output = ()> + Send>>
        }
    });

    let heartbeat_handle = spawn_supervised("heartbeat", shutdown.clone(), {
        let client = Arc::clone(&client);
        let queue = Arc::clone(&queue);
        let last_adapter_event = Arc::clone(&last_adapter_event);
        let interval = config.heartbeat_interval();
        let shutdown = shutdown.clone();
        move || {
            Box::pin(monitoring::run_heartbeat_loop(
                Arc::clone(&client),
                Arc::clone(&queue),
                tier,
                Arc::clone(&last_adapter_event),
                interval,
                shutdown.clone(),
            )) as Pin<Box<dyn Future<Output = ()> + Send>>
        }
    });

    shutdown.cancelled().await;
    info!("shutdown requested, stopping adapters");

    let stop_timeout = config.graceful_stop_timeout();
    for handle in background {
        if tokio::time::timeout(stop_timeout, handle).await.is_err() {
            warn!("background task did not stop within graceful_stop_timeout");
        }
    }
    let _ = tokio::time::timeout(stop_timeout, enrich_task).await;

    for handle in [submission_handle, metrics_handle, alert_handle, heartbeat_handle] {
        if tokio::time::timeout(stop_timeout, handle).await.is_err() {
            warn!("supervised loop did not stop within graceful_stop_timeout");
        }
    }

    // Best-effort final drain: one more submission attempt, bounded.
    let drain_shutdown = CancellationToken::new();
    let _ = tokio::time::timeout(
        FINAL_DRAIN_BUDGET,
        submission::submit_once(&queue, &client, &submission_config, &drain_shutdown),
    )
    .await;

    info!("bridge stopped");
    Ok(())
}

/// Auto-detect a conservative performance tier from host CPU count and
/// total memory (§4.L), used when `--tier` is not given.
pub fn detect_tier() -> PerformanceTier {
    let mut system = sysinfo::System::new_all();
    system.refresh_memory();
    PerformanceTier::detect(system.cpus().len(), system.total_memory())
}

/// Stable per-install identifier, generated once and persisted, used to
/// derive the at-rest encryption key before a device has paired.
pub fn install_id(state_dir: &Path) -> anyhow::Result<String> {
    let path = state_dir.join("install_id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &id)?;
    Ok(id)
}

/// Forwards events from one adapter's private channel into the shared
/// enrichment channel, tagging each with the adapter kind that produced it.
/// Keeps per-adapter FIFO ordering while leaving cross-adapter ordering
/// unspecified, per §5.
fn spawn_forwarder(
    kind: AdapterKind,
    mut rx: mpsc::Receiver<RawEvent>,
    tx: mpsc::Sender<(AdapterKind, RawEvent)>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if tx.send((kind, event)).await.is_err() {
                break;
            }
        }
    })
}

/// Spawn `factory` in a supervising loop: panics are caught via the inner
/// `JoinHandle`, logged, and the task is restarted after an exponential
/// backoff (1s min, 60s max) — grounded in the teacher's
/// `upstream::health` retry-and-evict loop, generalized to restart-in-place
/// instead of evict (§7).
fn spawn_supervised<F>(name: &'static str, shutdown: CancellationToken, mut factory: F) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = MIN_RESTART_BACKOFF;
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let fut = factory();
            let inner = tokio::spawn(fut);
            match inner.await {
                // The loop body returned on its own, which only happens once
                // its own shutdown token is cancelled.
                Ok(()) => break,
                Err(join_err) => {
                    error!(task = name, error = %join_err, "background task panicked, restarting after backoff");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_RESTART_BACKOFF);
                }
            }
        }
    })
}

/// Restart an adapter with backoff when its `run()` loop returns an error
/// (panics are caught by the nested `tokio::spawn`, matching the generic
/// background-task supervisor above).
fn spawn_adapter_supervised(
    def: AdapterDefinition,
    ctx: AdapterContext,
    sink: EventSink,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = MIN_RESTART_BACKOFF;
        loop {
            if ctx.shutdown.is_cancelled() {
                break;
            }
            let adapter = build_adapter(&def);
            let name = adapter.name().to_string();
            let run_ctx = ctx.clone();
            let run_sink = sink.clone();
            let handle = tokio::spawn(async move { adapter.run(run_ctx, run_sink).await });
            match handle.await {
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    error!(adapter = %name, error = %e, "adapter task failed, restarting after backoff");
                }
                Err(join_err) => {
                    error!(adapter = %name, error = %join_err, "adapter task panicked, restarting after backoff");
                }
            }
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_RESTART_BACKOFF);
        }
    })
}

fn build_adapter(def: &AdapterDefinition) -> Box<dyn Adapter> {
    match def {
        AdapterDefinition::Biometric { name, vendor, sync_interval_ms } => Box::new(BiometricAdapter::new(
            name.clone(),
            Box::new(VendorBiometricDriver::new(vendor.clone())),
            sync_interval_ms.map(Duration::from_millis).unwrap_or(DEFAULT_SYNC_INTERVAL),
        )),
        AdapterDefinition::Rfid { name, poll_interval_ms } => Box::new(RfidAdapter::new(
            name.clone(),
            Box::new(UnimplementedRfidReader),
            poll_interval_ms.map(Duration::from_millis).unwrap_or(DEFAULT_RFID_POLL_INTERVAL),
        )),
        AdapterDefinition::Simulator { name, interval_ms, user_pool } => Box::new(SimulatorAdapter::new(
            name.clone(),
            interval_ms.map(Duration::from_millis).unwrap_or(DEFAULT_SIMULATOR_INTERVAL),
            user_pool.clone(),
        )),
        // The webhook adapter is wired up directly in `run_with_shutdown` so
        // its inbound sender can be handed to the HTTP listener; it never
        // goes through this restart path.
        AdapterDefinition::Webhook { name } => Box::new(WebhookAdapter::new(name.clone())),
    }
}

/// The adapter-definitions side file (§4.L), parity with the teacher's
/// `--credential-config <path>` JSON side-file pattern.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterDefinitions {
    #[serde(default = "default_adapters")]
    pub adapters: Vec<AdapterDefinition>,
}

impl Default for AdapterDefinitions {
    fn default() -> Self {
        Self { adapters: default_adapters() }
    }
}

fn default_adapters() -> Vec<AdapterDefinition> {
    vec![
        AdapterDefinition::Webhook { name: "webhook".to_string() },
        AdapterDefinition::Simulator { name: "simulator".to_string(), interval_ms: None, user_pool: Vec::new() },
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterDefinition {
    Biometric {
        name: String,
        vendor: String,
        #[serde(default)]
        sync_interval_ms: Option<u64>,
    },
    Rfid {
        name: String,
        #[serde(default)]
        poll_interval_ms: Option<u64>,
    },
    Webhook {
        name: String,
    },
    Simulator {
        name: String,
        #[serde(default)]
        interval_ms: Option<u64>,
        #[serde(default)]
        user_pool: Vec<String>,
    },
}

impl AdapterDefinition {
    pub fn kind(&self) -> AdapterKind {
        match self {
            Self::Biometric { .. } => AdapterKind::Biometric,
            Self::Rfid { .. } => AdapterKind::Rfid,
            Self::Webhook { .. } => AdapterKind::Webhook,
            Self::Simulator { .. } => AdapterKind::Simulator,
        }
    }
}

fn load_adapter_definitions(path: &Path) -> Result<AdapterDefinitions, BridgeError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::Storage(format!("read adapter config {path:?}: {e}")))?;
    serde_json::from_str(&contents).map_err(|e| BridgeError::Internal(format!("parse adapter config {path:?}: {e}")))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
