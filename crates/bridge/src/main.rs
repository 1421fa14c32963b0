// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::error;

use bridge::auth;
use bridge::client::{CloudClient, CloudRequest};
use bridge::config::{BridgeConfig, Command, PairArgs, UnpairArgs};
use bridge::crypto::RawDataKey;
use bridge::error::BridgeError;
use bridge::event::DevicePairing;
use bridge::queue::QueueManager;
use bridge::store::Store;

#[tokio::main]
async fn main() {
    let config = BridgeConfig::parse();
    init_tracing(&config);

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    let exit_code = match config.command.clone() {
        None | Some(Command::Run) => run_agent(config).await,
        Some(Command::Install) => run_install(&config),
        Some(Command::Uninstall) => run_uninstall(&config),
        Some(Command::Pair(args)) => unwrap_exit(run_pair(&config, args).await),
        Some(Command::Unpair(args)) => unwrap_exit(run_unpair(&config, args)),
        Some(Command::Status) => unwrap_exit(run_status(&config).await),
        Some(Command::TriggerHeartbeat) => unwrap_exit(run_trigger_heartbeat(&config).await),
        Some(Command::DeviceStatus) => unwrap_exit(run_device_status(&config).await),
    };
    std::process::exit(exit_code);
}

fn init_tracing(config: &BridgeConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn unwrap_exit(result: anyhow::Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("fatal: {e:#}");
            1
        }
    }
}

/// Run the agent until shutdown, mapping a fatal `BridgeError` to its exit
/// code (§4.K).
async fn run_agent(config: BridgeConfig) -> i32 {
    match bridge::run(config).await {
        Ok(()) => 0,
        Err(e) => match e.downcast_ref::<BridgeError>() {
            Some(be) => {
                error!(error = %be, "fatal");
                be.exit_code()
            }
            None => {
                error!("fatal: {e:#}");
                1
            }
        },
    }
}

/// Out of scope for the core: the concrete service wrapper is
/// platform-specific. Prints what would be installed and exits cleanly.
fn run_install(config: &BridgeConfig) -> i32 {
    eprintln!("bridge install: no platform service wrapper bundled with this build.");
    eprintln!("run `bridge --host {} --port {} run` directly, or wire it into your own service manager.", config.host, config.port);
    1
}

fn run_uninstall(_config: &BridgeConfig) -> i32 {
    eprintln!("bridge uninstall: no platform service wrapper bundled with this build; nothing to remove.");
    1
}

/// One-time pairing exchange with the cloud platform (§6).
async fn run_pair(config: &BridgeConfig, args: PairArgs) -> anyhow::Result<i32> {
    let state_dir = config.resolve_state_dir()?;
    let pairing_path = auth::pairing_path(&state_dir);
    let tier = match config.tier_override()? {
        Some(tier) => tier,
        None => bridge::detect_tier(),
    };
    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string());
    let device_info =
        auth::DeviceInfo { hostname, agent_version: env!("CARGO_PKG_VERSION").to_string(), tier: tier.as_str().to_string() };
    let body = serde_json::to_value(auth::PairRequest { pair_code: args.pair_code, device_info })
        .map_err(|e| BridgeError::Internal(format!("serialize pair request: {e}")))?;

    let client = CloudClient::new(config.cloud_url.clone(), None)?;
    let req = CloudRequest { method: Method::POST, path: "/api/v1/devices/pair", body: Some(body), require_auth: false };
    let shutdown = CancellationToken::new();

    match client.execute(req, &shutdown).await {
        Ok(value) => {
            let response: auth::PairResponse = serde_json::from_value(value)
                .map_err(|e| BridgeError::Internal(format!("parse pair response: {e}")))?;
            let pairing = DevicePairing { device_id: response.device_id.clone(), device_key: response.device_key };
            auth::save_pairing(&pairing_path, &pairing)?;
            println!("paired as device {}", response.device_id);
            Ok(0)
        }
        Err(e) => {
            eprintln!("error: pairing failed: {e}");
            Ok(e.exit_code())
        }
    }
}

/// Clear the local pairing record.
fn run_unpair(config: &BridgeConfig, args: UnpairArgs) -> anyhow::Result<i32> {
    let state_dir = config.resolve_state_dir()?;
    let path = auth::pairing_path(&state_dir);
    match auth::clear_pairing(&path, args.force) {
        Ok(()) => {
            println!("pairing cleared");
            Ok(0)
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(e.exit_code())
        }
    }
}

/// Print local status: pairing, tier, queue depth.
async fn run_status(config: &BridgeConfig) -> anyhow::Result<i32> {
    let state_dir = config.resolve_state_dir()?;
    let pairing = auth::load_pairing(&auth::pairing_path(&state_dir))?;
    let tier = match config.tier_override()? {
        Some(tier) => tier,
        None => bridge::detect_tier(),
    };
    let raw_data_key = match &pairing {
        Some(p) => RawDataKey::derive(&p.device_key),
        None => RawDataKey::derive_unpaired(&bridge::install_id(&state_dir)?),
    };
    let store = Store::open(state_dir.join("events.db"), raw_data_key, tier.params().max_retries).await?;
    let queue = QueueManager::new(store, tier);
    let stats = queue.stats().await?;

    println!("paired: {}", pairing.is_some());
    if let Some(p) = &pairing {
        println!("device_id: {}", p.device_id);
    }
    println!("tier: {tier}");
    println!("queued events: {}", stats.total);
    for (status, count) in &stats.by_status {
        println!("  {status}: {count}");
    }
    Ok(0)
}

/// Force an immediate heartbeat.
async fn run_trigger_heartbeat(config: &BridgeConfig) -> anyhow::Result<i32> {
    let state_dir = config.resolve_state_dir()?;
    let Some(pairing) = auth::load_pairing(&auth::pairing_path(&state_dir))? else {
        eprintln!("error: device is not paired");
        return Ok(BridgeError::Unauthenticated("device is not paired".into()).exit_code());
    };

    let client = CloudClient::new(config.cloud_url.clone(), Some(pairing))?;
    let shutdown = CancellationToken::new();
    let req =
        CloudRequest { method: Method::POST, path: "/api/v1/devices/heartbeat/trigger", body: None, require_auth: true };

    match client.execute(req, &shutdown).await {
        Ok(_) => {
            println!("heartbeat triggered");
            Ok(0)
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(e.exit_code())
        }
    }
}

/// Print the cloud's view of this device's status.
async fn run_device_status(config: &BridgeConfig) -> anyhow::Result<i32> {
    let state_dir = config.resolve_state_dir()?;
    let Some(pairing) = auth::load_pairing(&auth::pairing_path(&state_dir))? else {
        eprintln!("error: device is not paired");
        return Ok(BridgeError::Unauthenticated("device is not paired".into()).exit_code());
    };

    let client = CloudClient::new(config.cloud_url.clone(), Some(pairing))?;
    let shutdown = CancellationToken::new();
    let req = CloudRequest {
        method: Method::POST,
        path: "/api/v1/devices/status",
        body: Some(serde_json::json!({})),
        require_auth: true,
    };

    match client.execute(req, &shutdown).await {
        Ok(value) => {
            let pretty = serde_json::to_string_pretty(&value)
                .map_err(|e| BridgeError::Internal(format!("format device status: {e}")))?;
            println!("{pretty}");
            Ok(0)
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(e.exit_code())
        }
    }
}
