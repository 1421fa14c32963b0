// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Uniform hardware-adapter contract (§4.D) plus the concrete adapters.

pub mod biometric;
pub mod rfid;
pub mod simulator;
pub mod webhook;

use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;
use crate::event::{AdapterStatus, RawEvent};

/// Channel an adapter emits raw events on; the orchestrator enriches and
/// enqueues whatever arrives here.
pub type EventSink = mpsc::Sender<RawEvent>;

/// Shared context handed to every adapter at `start`/`stop` time.
#[derive(Clone)]
pub struct AdapterContext {
    pub device_id: String,
    pub shutdown: CancellationToken,
}

/// Sealed kind discriminant over the adapter variant set (§4.D, §9 Design
/// Notes: "sealed adapter variant set over duck-typed drivers").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Biometric,
    Rfid,
    Webhook,
    Simulator,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Biometric => "biometric",
            Self::Rfid => "rfid",
            Self::Webhook => "webhook",
            Self::Simulator => "simulator",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform capability set every input implements (§4.D).
///
/// `run` takes `self: Box<Self>` so the orchestrator can hold a
/// `Vec<Box<dyn Adapter>>` and spawn each one as its own task, the same
/// object-safe shape the teacher's `Detector` trait uses for its tiered
/// detector fan-out.
pub trait Adapter: Send + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Run until `ctx.shutdown` is cancelled, emitting events on `sink`.
    fn run(
        self: Box<Self>,
        ctx: AdapterContext,
        sink: EventSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send>>;

    /// Trigger a physical door release. Capability-checked: adapters that
    /// cannot unlock a door return `unsupported`.
    fn unlock_door(
        &self,
        _duration_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send>> {
        Box::pin(async { Err(BridgeError::Validation("unlock_door unsupported by this adapter".into())) })
    }

    fn status(&self) -> AdapterStatus;

    fn is_healthy(&self) -> bool {
        matches!(self.status().status, crate::event::AdapterStatusKind::Active)
    }
}

/// Shared, lock-guarded status cell every adapter updates as it runs.
pub struct StatusCell {
    inner: std::sync::RwLock<AdapterStatus>,
}

impl StatusCell {
    pub fn new(name: impl Into<String>) -> Self {
        Self { inner: std::sync::RwLock::new(AdapterStatus::new(name)) }
    }

    pub fn get(&self) -> AdapterStatus {
        self.inner.read().expect("status lock poisoned").clone()
    }

    pub fn set_active(&self) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.status = crate::event::AdapterStatusKind::Active;
        status.error_message = None;
        status.updated_at = SystemTime::now();
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.status = crate::event::AdapterStatusKind::Error;
        status.error_message = Some(message.into());
        status.updated_at = SystemTime::now();
    }

    pub fn set_initializing(&self) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.status = crate::event::AdapterStatusKind::Initializing;
        status.updated_at = SystemTime::now();
    }

    pub fn record_event(&self) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.last_event = Some(SystemTime::now());
        status.updated_at = SystemTime::now();
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
