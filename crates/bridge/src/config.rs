// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed, validated runtime configuration for the Bridge agent.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::event::PerformanceTier;

/// Edge agent that forwards biometric/RFID/webhook access events to the cloud.
#[derive(Debug, Clone, Parser)]
#[command(name = "bridge", version, about)]
pub struct BridgeConfig {
    /// Host to bind the inbound webhook listener on.
    #[arg(long, default_value = "127.0.0.1", env = "BRIDGE_HOST")]
    pub host: String,

    /// Port to listen on for the inbound webhook adapter and health probe.
    #[arg(long, default_value_t = 8420, env = "BRIDGE_PORT")]
    pub port: u16,

    /// Base URL of the cloud platform (e.g. `https://api.example.com`).
    #[arg(long, default_value = "https://api.repset.cloud", env = "BRIDGE_CLOUD_URL")]
    pub cloud_url: String,

    /// Directory holding the durable store, pairing file, and alert log.
    #[arg(long, env = "BRIDGE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Force a performance tier instead of auto-detecting from host resources.
    #[arg(long, env = "BRIDGE_TIER")]
    pub tier: Option<String>,

    /// Path to the adapter-definitions JSON file.
    #[arg(long, env = "BRIDGE_ADAPTER_CONFIG")]
    pub adapter_config: Option<PathBuf>,

    /// Bearer token required on inbound webhook requests. Unset means the
    /// webhook listener accepts unauthenticated requests.
    #[arg(long, env = "BRIDGE_WEBHOOK_TOKEN")]
    pub webhook_token: Option<String>,

    /// Submission batch interval in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "BRIDGE_SUBMIT_INTERVAL_MS")]
    pub submit_interval_ms: u64,

    /// Metrics sampling interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "BRIDGE_METRICS_INTERVAL_MS")]
    pub metrics_interval_ms: u64,

    /// Alert evaluation interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "BRIDGE_ALERT_INTERVAL_MS")]
    pub alert_interval_ms: u64,

    /// Heartbeat interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "BRIDGE_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: u64,

    /// Device-offline alert threshold in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "BRIDGE_OFFLINE_THRESHOLD_MS")]
    pub offline_threshold_ms: u64,

    /// Graceful shutdown bound in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "BRIDGE_GRACEFUL_STOP_MS")]
    pub graceful_stop_ms: u64,

    /// Log format (json or text).
    #[arg(long, default_value = "json", env = "BRIDGE_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BRIDGE_LOG_LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Operator sub-operations (§6 Operator surface).
#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Install the Bridge as a host service. Out of scope for the core: the
    /// concrete service wrapper is a platform-specific installer.
    Install,
    /// Uninstall the host service.
    Uninstall,
    /// One-time pairing exchange with the cloud platform.
    Pair(PairArgs),
    /// Clear the local pairing record.
    Unpair(UnpairArgs),
    /// Print local status (pairing, queue depth, adapter health).
    Status,
    /// Force an immediate heartbeat.
    TriggerHeartbeat,
    /// Print the cloud's view of this device's status.
    DeviceStatus,
    /// Run the agent (default when no subcommand is given).
    Run,
}

#[derive(Debug, Clone, clap::Args)]
pub struct PairArgs {
    /// One-time pairing code issued by the cloud platform operator console.
    pub pair_code: String,
}

#[derive(Debug, Clone, clap::Args)]
pub struct UnpairArgs {
    /// Clear the pairing record even if the cloud rejects the unpair call.
    #[arg(long)]
    pub force: bool,
}

impl BridgeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cloud_url.is_empty() {
            anyhow::bail!("--cloud-url must not be empty");
        }
        if !self.cloud_url.starts_with("http://") && !self.cloud_url.starts_with("https://") {
            anyhow::bail!("--cloud-url must start with http:// or https://");
        }
        if let Some(ref tier) = self.tier {
            self.tier_override()?;
            let _ = tier;
        }
        if self.submit_interval_ms == 0 {
            anyhow::bail!("--submit-interval-ms must be > 0");
        }
        Ok(())
    }

    /// Parse `--tier`, if given, into a concrete [`PerformanceTier`].
    pub fn tier_override(&self) -> anyhow::Result<Option<PerformanceTier>> {
        match self.tier.as_deref() {
            None => Ok(None),
            Some("lite") => Ok(Some(PerformanceTier::Lite)),
            Some("normal") => Ok(Some(PerformanceTier::Normal)),
            Some("full") => Ok(Some(PerformanceTier::Full)),
            Some(other) => anyhow::bail!("unknown tier {other:?}, expected lite/normal/full"),
        }
    }

    /// Resolve the per-install state directory, creating it if needed.
    ///
    /// Defaults to `$XDG_STATE_HOME/bridge` (falling back to
    /// `$HOME/.local/state/bridge`), the same resolution order the teacher
    /// uses for its own session artifact directory.
    pub fn resolve_state_dir(&self) -> anyhow::Result<PathBuf> {
        let dir = match self.state_dir {
            Some(ref dir) => dir.clone(),
            None => default_state_dir(),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn submit_interval(&self) -> Duration {
        Duration::from_millis(self.submit_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_millis(self.alert_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn offline_threshold(&self) -> Duration {
        Duration::from_millis(self.offline_threshold_ms)
    }

    pub fn graceful_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_stop_ms)
    }
}

/// Resolve the default state directory: `$BRIDGE_STATE_DIR`, then
/// `$XDG_STATE_HOME/bridge`, then `$HOME/.local/state/bridge`.
pub fn default_state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("bridge");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/bridge");
    }
    PathBuf::from(".bridge")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
