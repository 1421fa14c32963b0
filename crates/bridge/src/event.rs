// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical event model shared by adapters, the queue, and the cloud wire format.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Closed set of event types a device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Entry,
    Exit,
    Denied,
    DoorOpen,
    DoorClose,
    SystemEvent,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::Denied => "denied",
            Self::DoorOpen => "door_open",
            Self::DoorClose => "door_close",
            Self::SystemEvent => "system_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entry" => Some(Self::Entry),
            "exit" => Some(Self::Exit),
            "denied" => Some(Self::Denied),
            "door_open" => Some(Self::DoorOpen),
            "door_close" => Some(Self::DoorClose),
            "system_event" => Some(Self::SystemEvent),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` iff `s` names one of the closed set of event types.
pub fn is_valid_event_type(s: &str) -> bool {
    EventType::parse(s).is_some()
}

/// A single primitive or string value carried in `raw_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Vendor-specific detail attached to an event. Treated as sensitive: encrypted
/// at rest by the store, never sent to the cloud.
pub type RawData = BTreeMap<String, RawValue>;

/// How far into the past/future an event timestamp may be accepted.
pub const MAX_EVENT_AGE: Duration = Duration::from_secs(7 * 24 * 3600);
pub const MAX_EVENT_SKEW_FORWARD: Duration = Duration::from_secs(5 * 60);

/// The unit of work produced by an adapter and submitted to the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Idempotency key for cloud submission. Populated lazily if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub external_user_id: String,
    pub timestamp: SystemTime,
    pub event_type: EventType,
    pub is_simulated: bool,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<RawData>,
}

impl CanonicalEvent {
    /// Validate the event against the invariants in the data model: timestamp
    /// window, non-empty identifiers. `event_type` is enforced by the type
    /// system so it cannot be invalid once constructed.
    pub fn validate(&self, now: SystemTime) -> Result<(), BridgeError> {
        if self.external_user_id.is_empty() {
            return Err(BridgeError::Validation("external_user_id must not be empty".into()));
        }
        if self.device_id.is_empty() {
            return Err(BridgeError::Validation("device_id must not be empty".into()));
        }
        if let Some(ref id) = self.event_id {
            if id.is_empty() || id.len() > 64 || !id.is_ascii() {
                return Err(BridgeError::Validation(
                    "event_id must be a non-empty ASCII string of at most 64 chars".into(),
                ));
            }
        }
        let earliest = now.checked_sub(MAX_EVENT_AGE).unwrap_or(SystemTime::UNIX_EPOCH);
        let latest = now + MAX_EVENT_SKEW_FORWARD;
        if self.timestamp < earliest || self.timestamp > latest {
            return Err(BridgeError::Validation(format!(
                "timestamp {:?} is outside the accepted window [{:?}, {:?}]",
                self.timestamp, earliest, latest
            )));
        }
        Ok(())
    }
}

/// Generate a new idempotency key of the form `evt_<16-hex>`.
pub fn generate_event_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    format!("evt_{}", hex::encode(bytes))
}

/// Raw, un-enriched event as emitted by an adapter before the orchestrator
/// fills in `device_id`, `event_id`, and `is_simulated`.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub external_user_id: String,
    pub timestamp: SystemTime,
    pub event_type: EventType,
    pub raw_data: Option<RawData>,
}

/// Health of a single adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatusKind {
    Disabled,
    Initializing,
    Active,
    Error,
}

impl AdapterStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AdapterStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable health of one adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub name: String,
    pub status: AdapterStatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: SystemTime,
}

impl AdapterStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: AdapterStatusKind::Disabled,
            last_event: None,
            error_message: None,
            updated_at: SystemTime::now(),
        }
    }
}

/// Coarse performance class chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    Lite,
    Normal,
    Full,
}

/// Tier-dependent queue/submission parameters (§4.B table).
#[derive(Debug, Clone, Copy)]
pub struct TierParams {
    pub max_size: usize,
    pub batch_size: usize,
    pub retry_interval: Duration,
    pub max_retries: u32,
}

impl PerformanceTier {
    pub fn params(&self) -> TierParams {
        match self {
            Self::Lite => TierParams {
                max_size: 1_000,
                batch_size: 10,
                retry_interval: Duration::from_secs(30),
                max_retries: 3,
            },
            Self::Normal => TierParams {
                max_size: 10_000,
                batch_size: 50,
                retry_interval: Duration::from_secs(15),
                max_retries: 5,
            },
            Self::Full => TierParams {
                max_size: 50_000,
                batch_size: 100,
                retry_interval: Duration::from_secs(10),
                max_retries: 10,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lite => "lite",
            Self::Normal => "normal",
            Self::Full => "full",
        }
    }

    /// Detect a tier from the host's CPU count and total memory, the way an
    /// installer-free agent picks a conservative default on first run.
    pub fn detect(cpu_count: usize, total_mem_bytes: u64) -> Self {
        const GIB: u64 = 1024 * 1024 * 1024;
        if cpu_count >= 4 && total_mem_bytes >= 4 * GIB {
            Self::Full
        } else if cpu_count >= 2 && total_mem_bytes >= 2 * GIB {
            Self::Normal
        } else {
            Self::Lite
        }
    }
}

impl std::fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one-time pairing record binding this install to a cloud tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePairing {
    pub device_id: String,
    pub device_key: String,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
