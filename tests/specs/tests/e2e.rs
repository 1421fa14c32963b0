// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenario tests driving the real orchestrator against an
//! in-process mock cloud (§8, scenarios S1 and S5).

use std::time::Duration;

use bridge_specs::{BridgeHarness, MockCloud};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration, what: &str) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// S1 — Steady state: a paired device with a simulator adapter submits
/// events to `/api/v1/checkin` and the cloud acknowledges them.
#[tokio::test]
async fn steady_state_submits_simulator_events() -> anyhow::Result<()> {
    let cloud = MockCloud::start().await?;
    let adapter_dir = tempfile::tempdir()?;
    let adapter_path = adapter_dir.path().join("adapters.json");
    std::fs::write(&adapter_path, r#"{"adapters":[{"kind":"simulator","name":"sim","interval_ms":150}]}"#)?;

    let harness = BridgeHarness::start(&cloud.base_url(), Some(&adapter_path)).await?;

    wait_until(|| cloud.total_checked_in() >= 3, TIMEOUT, "3 events submitted to the mock cloud").await?;

    assert!(cloud.checkin_batch_count() >= 1);
    assert_eq!(cloud.alert_count(), 0, "steady state should not raise any alerts");

    harness.stop().await?;
    Ok(())
}

/// S5 — Security burst: five webhook requests with a bad bearer token within
/// the rolling window raise a high-severity `security_event` alert, reported
/// to the cloud with `{failure_count: 5, time_window: "5m0s"}` metadata.
#[tokio::test]
async fn security_burst_raises_alert() -> anyhow::Result<()> {
    let cloud = MockCloud::start().await?;
    let harness = BridgeHarness::start_with_webhook_token(&cloud.base_url(), None, Some("correct-token")).await?;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let _ = client
            .post(harness.webhook_url("/webhook/events"))
            .header("authorization", "Bearer wrong-token")
            .json(&serde_json::json!({
                "external_user_id": "attacker",
                "timestamp": 1_700_000_000,
                "event_type": "entry",
            }))
            .send()
            .await?;
    }

    wait_until(|| cloud.has_security_alert(), TIMEOUT, "a security_event alert reported to the cloud").await?;

    let metadata = cloud.security_alert_metadata().expect("security alert metadata present");
    assert_eq!(metadata["failure_count"], serde_json::json!(5));
    assert_eq!(metadata["time_window"], serde_json::json!("5m0s"));

    harness.stop().await?;
    Ok(())
}
