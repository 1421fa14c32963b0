// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics, alerting, security-event tracking, cloud reporting, and
//! heartbeat (§4.I).

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::{CloudClient, CloudRequest};
use crate::error::BridgeError;
use crate::event::PerformanceTier;
use crate::queue::QueueManager;

/// One sample of system/queue health, retained for one hour (§4.I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: SystemTime,
    pub queue_depth: u64,
    pub cpu_percent: f32,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
}

/// Bounded in-memory ring of the last hour of samples.
pub struct MetricsRing {
    samples: RwLock<VecDeque<MetricSample>>,
    capacity: usize,
}

impl MetricsRing {
    pub fn new(sample_interval: Duration) -> Self {
        let capacity = (Duration::from_secs(3600).as_secs() / sample_interval.as_secs().max(1)).max(1) as usize;
        Self { samples: RwLock::new(VecDeque::with_capacity(capacity)), capacity }
    }

    pub async fn push(&self, sample: MetricSample) {
        let mut samples = self.samples.write().await;
        if samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub async fn latest(&self) -> Option<MetricSample> {
        self.samples.read().await.back().cloned()
    }

    pub async fn snapshot(&self) -> Vec<MetricSample> {
        self.samples.read().await.iter().cloned().collect()
    }
}

/// Spawns the periodic metrics sampler, appending to `ring` every `interval`.
pub async fn run_metrics_loop(
    ring: Arc<MetricsRing>,
    queue: Arc<QueueManager>,
    mut system: sysinfo::System,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut timer = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = timer.tick() => {
                system.refresh_cpu_usage();
                system.refresh_memory();
                let cpu_percent = system.global_cpu_usage();
                let mem_used_bytes = system.used_memory();
                let mem_total_bytes = system.total_memory();
                let queue_depth = queue.depth().await.unwrap_or(0);
                ring.push(MetricSample {
                    timestamp: SystemTime::now(),
                    queue_depth,
                    cpu_percent,
                    mem_used_bytes,
                    mem_total_bytes,
                }).await;
            }
        }
    }
}

/// Alert condition kinds (§4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DeviceOffline,
    QueueThreshold,
    PerformanceDegradation,
    SecurityEvent,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceOffline => "device_offline",
            Self::QueueThreshold => "queue_threshold",
            Self::PerformanceDegradation => "performance_degradation",
            Self::SecurityEvent => "security_event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A raised or resolved alert condition (spec.md:65).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub timestamp: SystemTime,
    pub device_id: String,
    pub metadata: serde_json::Value,
    pub resolved: bool,
    pub resolved_at: Option<SystemTime>,
}

/// Delivers a raised/resolved alert to one output.
pub trait AlertHandler: Send + Sync {
    fn handle(&self, alert: &Alert);
}

/// Logs every alert via `tracing`.
pub struct LogHandler;

impl AlertHandler for LogHandler {
    fn handle(&self, alert: &Alert) {
        if alert.resolved {
            info!(kind = alert.kind.as_str(), "alert resolved: {}", alert.title);
        } else {
            warn!(kind = alert.kind.as_str(), severity = ?alert.severity, "alert raised: {}", alert.title);
        }
    }
}

/// Appends every alert as JSONL, reusing the teacher's `EventLog` append-only
/// idiom: best-effort, errors swallowed rather than propagated.
pub struct JsonlAlertLedger {
    path: Option<PathBuf>,
}

impl JsonlAlertLedger {
    pub fn new(state_dir: Option<&Path>) -> Self {
        let path = state_dir.map(|dir| {
            let _ = std::fs::create_dir_all(dir);
            dir.join("alerts.jsonl")
        });
        Self { path }
    }
}

impl AlertHandler for JsonlAlertLedger {
    fn handle(&self, alert: &Alert) {
        let Some(ref path) = self.path else { return };
        let Ok(mut line) = serde_json::to_string(alert) else { return };
        line.push('\n');
        let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) else { return };
        let _ = file.write_all(line.as_bytes());
    }
}

/// Prints critical/high severity alerts to stderr for an attached operator.
pub struct ConsoleHandler;

impl AlertHandler for ConsoleHandler {
    fn handle(&self, alert: &Alert) {
        if alert.severity >= AlertSeverity::High {
            eprintln!("[{}] {}: {}", alert.severity.as_str(), alert.kind.as_str(), alert.title);
        }
    }
}

/// Inbound security-event classification (spec.md:185-191). Each type carries
/// a default severity; callers may escalate by raising an alert separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    HmacValidationFailure,
    AuthenticationFailure,
    SuspiciousActivity,
    RateLimitExceeded,
    InvalidRequest,
    MalformedData,
}

impl SecurityEventType {
    pub fn default_severity(&self) -> AlertSeverity {
        match self {
            Self::HmacValidationFailure | Self::AuthenticationFailure => AlertSeverity::High,
            Self::SuspiciousActivity | Self::RateLimitExceeded => AlertSeverity::Medium,
            Self::InvalidRequest | Self::MalformedData => AlertSeverity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmacValidationFailure => "hmac_validation_failure",
            Self::AuthenticationFailure => "authentication_failure",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::InvalidRequest => "invalid_request",
            Self::MalformedData => "malformed_data",
        }
    }
}

/// A single logged security event (spec.md:67), independent of whether it
/// crosses the threshold that raises an `security_event` alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub severity: AlertSeverity,
    pub description: String,
    pub timestamp: SystemTime,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
}

/// Reports alerts and security events to the cloud, with its own 3x retry
/// ceiling for 5xx and transport errors; terminal on 4xx (§4.I).
pub struct CloudReporter {
    client: Arc<CloudClient>,
    shutdown: CancellationToken,
}

impl CloudReporter {
    pub fn new(client: Arc<CloudClient>, shutdown: CancellationToken) -> Self {
        Self { client, shutdown }
    }

    pub async fn report(&self, alert: &Alert) {
        let body = match serde_json::to_value(alert) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "failed to serialize alert for cloud reporting");
                return;
            }
        };
        let req = CloudRequest {
            method: Method::POST,
            path: "/api/v1/devices/alerts",
            body: Some(body),
            require_auth: true,
        };
        // Report-only path: `CloudClient::execute`'s own retry policy already
        // bounds attempts; a reporting failure is logged, never escalated.
        if let Err(e) = self.client.execute(req, &self.shutdown).await {
            if !matches!(e, BridgeError::Cancelled) {
                warn!(error = %e, kind = alert.kind.as_str(), "failed to report alert to cloud");
            }
        }
    }

    pub async fn report_security_event(&self, event: &SecurityEvent) {
        let body = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "failed to serialize security event for cloud reporting");
                return;
            }
        };
        let req = CloudRequest {
            method: Method::POST,
            path: "/api/v1/devices/security-events",
            body: Some(body),
            require_auth: true,
        };
        if let Err(e) = self.client.execute(req, &self.shutdown).await {
            if !matches!(e, BridgeError::Cancelled) {
                warn!(error = %e, event_type = event.event_type.as_str(), "failed to report security event to cloud");
            }
        }
    }
}

/// Evaluates alert conditions every tick, raising/resolving via the
/// dedup'd active-alert map, and fanning out to every handler (§4.I).
pub struct AlertManager {
    device_id: String,
    active: RwLock<IndexMap<AlertKind, Alert>>,
    handlers: Vec<Box<dyn AlertHandler>>,
    cloud_reporter: Option<CloudReporter>,
}

/// Threshold configuration for alert evaluation.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub offline_threshold: Duration,
    pub queue_high_watermark_fraction: f64,
    pub queue_high_severity_fraction: f64,
    pub queue_critical_severity_fraction: f64,
    pub performance_degraded_fraction: f32,
    pub performance_high_severity_fraction: f32,
    pub performance_critical_severity_fraction: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            offline_threshold: Duration::from_secs(300),
            queue_high_watermark_fraction: 0.75,
            queue_high_severity_fraction: 0.90,
            queue_critical_severity_fraction: 0.95,
            performance_degraded_fraction: 0.80,
            performance_high_severity_fraction: 0.90,
            performance_critical_severity_fraction: 0.95,
        }
    }
}

/// Escalate a base `Medium` severity once the observed fraction crosses the
/// high/critical watermarks (spec.md:182-183).
fn escalate(fraction: f64, high: f64, critical: f64) -> AlertSeverity {
    if fraction >= critical {
        AlertSeverity::Critical
    } else if fraction >= high {
        AlertSeverity::High
    } else {
        AlertSeverity::Medium
    }
}

impl AlertManager {
    pub fn new(handlers: Vec<Box<dyn AlertHandler>>, cloud_reporter: Option<CloudReporter>, device_id: String) -> Self {
        Self { device_id, active: RwLock::new(IndexMap::new()), handlers, cloud_reporter }
    }

    async fn raise(
        &self,
        kind: AlertKind,
        severity: AlertSeverity,
        title: String,
        description: String,
        metadata: serde_json::Value,
    ) {
        let now = SystemTime::now();
        let mut active = self.active.write().await;
        let is_new = !active.contains_key(&kind);
        let alert = active.entry(kind).or_insert_with(|| Alert {
            id: format!("alert_{}", Uuid::new_v4()),
            kind,
            severity,
            title: title.clone(),
            description: description.clone(),
            timestamp: now,
            device_id: self.device_id.clone(),
            metadata: metadata.clone(),
            resolved: false,
            resolved_at: None,
        });
        alert.timestamp = now;
        alert.title = title;
        alert.description = description;
        alert.severity = severity;
        alert.metadata = metadata;
        let snapshot = alert.clone();
        drop(active);
        if is_new {
            self.dispatch(&snapshot).await;
        }
    }

    async fn resolve(&self, kind: AlertKind) {
        let mut active = self.active.write().await;
        if let Some(mut alert) = active.shift_remove(&kind) {
            alert.resolved = true;
            alert.resolved_at = Some(SystemTime::now());
            drop(active);
            self.dispatch(&alert).await;
        }
    }

    async fn dispatch(&self, alert: &Alert) {
        for handler in &self.handlers {
            handler.handle(alert);
        }
        if let Some(ref reporter) = self.cloud_reporter {
            reporter.report(alert).await;
        }
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.active.read().await.values().cloned().collect()
    }

    /// One evaluation tick against current metrics/queue state.
    pub async fn evaluate(
        &self,
        metrics: &MetricsRing,
        queue: &QueueManager,
        last_adapter_event: Option<SystemTime>,
        thresholds: &AlertThresholds,
    ) {
        let now = SystemTime::now();

        match last_adapter_event {
            Some(last) if now.duration_since(last).unwrap_or_default() > thresholds.offline_threshold => {
                self.raise(
                    AlertKind::DeviceOffline,
                    AlertSeverity::High,
                    "Device offline".to_string(),
                    format!("no adapter events for over {:?}", thresholds.offline_threshold),
                    serde_json::json!({ "offline_threshold_secs": thresholds.offline_threshold.as_secs() }),
                )
                .await;
            }
            _ => self.resolve(AlertKind::DeviceOffline).await,
        }

        let depth = queue.depth().await.unwrap_or(0);
        let max_size = queue.tier_params().max_size as f64;
        let queue_fraction = if max_size > 0.0 { depth as f64 / max_size } else { 0.0 };
        if queue_fraction >= thresholds.queue_high_watermark_fraction {
            let severity = escalate(
                queue_fraction,
                thresholds.queue_high_severity_fraction,
                thresholds.queue_critical_severity_fraction,
            );
            self.raise(
                AlertKind::QueueThreshold,
                severity,
                "Queue depth above threshold".to_string(),
                format!("queue depth {depth} is at or above the high-watermark"),
                serde_json::json!({ "queue_depth": depth, "queue_capacity": max_size as u64, "fraction": queue_fraction }),
            )
            .await;
        } else {
            self.resolve(AlertKind::QueueThreshold).await;
        }

        if let Some(sample) = metrics.latest().await {
            let cpu_fraction = sample.cpu_percent / 100.0;
            let mem_fraction = if sample.mem_total_bytes > 0 {
                sample.mem_used_bytes as f32 / sample.mem_total_bytes as f32
            } else {
                0.0
            };
            let worst_fraction = cpu_fraction.max(mem_fraction);
            if worst_fraction >= thresholds.performance_degraded_fraction {
                let severity = escalate(
                    worst_fraction as f64,
                    thresholds.performance_high_severity_fraction as f64,
                    thresholds.performance_critical_severity_fraction as f64,
                );
                self.raise(
                    AlertKind::PerformanceDegradation,
                    severity,
                    "Performance degraded".to_string(),
                    format!("cpu usage at {:.1}%, mem usage at {:.1}%", sample.cpu_percent, mem_fraction * 100.0),
                    serde_json::json!({ "cpu_percent": sample.cpu_percent, "mem_fraction": mem_fraction }),
                )
                .await;
            } else {
                self.resolve(AlertKind::PerformanceDegradation).await;
            }
        }
    }

    /// Log a security event (spec.md:185), reporting it to the cloud
    /// independently of whether it crosses the alert-raising threshold.
    pub async fn log_security_event(
        &self,
        event_type: SecurityEventType,
        description: String,
        metadata: serde_json::Value,
    ) {
        let severity = event_type.default_severity();
        let event = SecurityEvent {
            id: format!("sec_{}", Uuid::new_v4()),
            event_type,
            severity,
            description: description.clone(),
            timestamp: SystemTime::now(),
            device_id: self.device_id.clone(),
            source_ip: None,
            user_agent: None,
            metadata,
        };
        if severity >= AlertSeverity::High {
            warn!(event_type = event_type.as_str(), "security event: {description}");
        } else {
            info!(event_type = event_type.as_str(), "security event: {description}");
        }
        if let Some(ref reporter) = self.cloud_reporter {
            reporter.report_security_event(&event).await;
        }
    }

    /// Raise (or leave active) the security-event alert for excessive HMAC
    /// signature failures, the specialized helper built atop
    /// [`log_security_event`](Self::log_security_event) (spec.md:185).
    pub async fn raise_security_event(&self, failures_in_window: u64) {
        let description = format!("{failures_in_window} HMAC signature failures in the last 5 minutes");
        let metadata = serde_json::json!({ "failure_count": failures_in_window, "time_window": "5m0s" });
        self.log_security_event(SecurityEventType::HmacValidationFailure, description.clone(), metadata.clone())
            .await;
        self.raise(AlertKind::SecurityEvent, AlertSeverity::High, "Security event burst".to_string(), description, metadata)
            .await;
    }
}

/// Runs the periodic alert-evaluation loop.
pub async fn run_alert_loop(
    manager: Arc<AlertManager>,
    metrics: Arc<MetricsRing>,
    queue: Arc<QueueManager>,
    security: Arc<SecurityEventTracker>,
    last_adapter_event: Arc<RwLock<Option<SystemTime>>>,
    interval: Duration,
    thresholds: AlertThresholds,
    shutdown: CancellationToken,
) {
    let mut timer = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = timer.tick() => {
                let last_event = *last_adapter_event.read().await;
                manager.evaluate(&metrics, &queue, last_event, &thresholds).await;
                let failures = security.count_recent();
                if failures >= SECURITY_EVENT_THRESHOLD {
                    manager.raise_security_event(failures).await;
                }
            }
        }
    }
}

/// Rolling 5-minute HMAC-failure counter (§4.I). `>= 5` raises a
/// `security_event` alert.
pub const SECURITY_EVENT_THRESHOLD: u64 = 5;
const SECURITY_WINDOW: Duration = Duration::from_secs(5 * 60);

pub struct SecurityEventTracker {
    failures: std::sync::Mutex<VecDeque<SystemTime>>,
}

impl SecurityEventTracker {
    pub fn new() -> Self {
        Self { failures: std::sync::Mutex::new(VecDeque::new()) }
    }

    pub fn record_failure(&self) {
        let mut failures = self.failures.lock().expect("security tracker lock poisoned");
        failures.push_back(SystemTime::now());
        prune(&mut failures);
    }

    pub fn count_recent(&self) -> u64 {
        let mut failures = self.failures.lock().expect("security tracker lock poisoned");
        prune(&mut failures);
        failures.len() as u64
    }
}

impl Default for SecurityEventTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(failures: &mut VecDeque<SystemTime>) {
    let cutoff = SystemTime::now() - SECURITY_WINDOW;
    while let Some(front) = failures.front() {
        if *front < cutoff {
            failures.pop_front();
        } else {
            break;
        }
    }
}

/// Posts a heartbeat to `/api/v1/devices/heartbeat` every `interval`, with
/// the real status/tier/queue-depth/last-event body (spec.md:194,229).
pub async fn run_heartbeat_loop(
    client: Arc<CloudClient>,
    queue: Arc<QueueManager>,
    tier: PerformanceTier,
    last_adapter_event: Arc<RwLock<Option<SystemTime>>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut timer = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = timer.tick() => {
                let queue_depth = queue.depth().await.unwrap_or(0);
                let last_event_time = last_adapter_event.read().await.and_then(to_rfc3339);
                let mut body = serde_json::json!({
                    "status": "online",
                    "tier": tier.as_str(),
                    "queueDepth": queue_depth,
                    "systemInfo": system_info(),
                });
                if let Some(last_event_time) = last_event_time {
                    body["lastEventTime"] = serde_json::json!(last_event_time);
                }
                let req = CloudRequest {
                    method: Method::POST,
                    path: "/api/v1/devices/heartbeat",
                    body: Some(body),
                    require_auth: true,
                };
                if let Err(e) = client.execute(req, &shutdown).await {
                    if !matches!(e, BridgeError::Cancelled) {
                        warn!(error = %e, "heartbeat failed");
                    }
                }
            }
        }
    }
}

fn to_rfc3339(time: SystemTime) -> Option<String> {
    let datetime: chrono::DateTime<chrono::Utc> = time.into();
    Some(datetime.to_rfc3339())
}

fn system_info() -> serde_json::Value {
    serde_json::json!({
        "hostname": hostname(),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}

fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;
