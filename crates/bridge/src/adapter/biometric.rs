// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Biometric device polling (§4.E).
//!
//! State machine: `disconnected -> connected -> active <-> error -> disconnected`.
//! Vendor wire framing (ZKTeco/ESSL/Realtime) is out of scope; every vendor
//! collapses to [`VendorBiometricDriver`], a stub returning
//! `BridgeError::Device("not yet implemented")` on every call. Tests exercise
//! the state machine through [`SimulatorBiometricDriver`] instead.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{Adapter, AdapterContext, AdapterKind, EventSink, StatusCell};
use crate::error::BridgeError;
use crate::event::{EventType, RawEvent};

/// A single attendance punch as reported by the device, before user
/// resolution.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub device_user_id: String,
    pub timestamp: SystemTime,
    /// Vendor verify-mode code: `0` -> entry, `1` -> exit, else -> system_event.
    pub mode: u8,
}

/// Floor and default bounds on the poll ticker (§4.E).
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);

/// Clock drift beyond this logs a `performance_degradation` warning but the
/// record is still accepted.
const MAX_ACCEPTABLE_DRIFT: Duration = Duration::from_secs(5 * 60);

/// Pluggable device driver behind the biometric adapter. Object-safe via
/// manually boxed futures, the same shape as the teacher's `Detector` trait.
pub trait BiometricDriver: Send + Sync + 'static {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;

    fn get_new_attendance_records(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AttendanceRecord>, BridgeError>> + Send + '_>>;

    /// Map device user id -> platform user id. Cached per tick by the caller.
    fn get_users(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, String>, BridgeError>> + Send + '_>>;

    fn clear_attendance_records(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;
}

/// Stand-in for every unimplemented vendor (ZKTeco, ESSL, Realtime). Returns
/// `Device("not yet implemented")` from every call per the recorded open
/// question on vendor framing.
pub struct VendorBiometricDriver {
    pub vendor_name: String,
}

impl VendorBiometricDriver {
    pub fn new(vendor_name: impl Into<String>) -> Self {
        Self { vendor_name: vendor_name.into() }
    }

    fn not_yet_implemented(&self) -> BridgeError {
        BridgeError::Device(format!("{} driver: not yet implemented", self.vendor_name))
    }
}

impl BiometricDriver for VendorBiometricDriver {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move { Err(self.not_yet_implemented()) })
    }

    fn get_new_attendance_records(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AttendanceRecord>, BridgeError>> + Send + '_>> {
        Box::pin(async move { Err(self.not_yet_implemented()) })
    }

    fn get_users(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, String>, BridgeError>> + Send + '_>> {
        Box::pin(async move { Err(self.not_yet_implemented()) })
    }

    fn clear_attendance_records(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move { Err(self.not_yet_implemented()) })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move { Err(self.not_yet_implemented()) })
    }
}

/// Adapter that drives a [`BiometricDriver`] on a fixed-interval ticker.
pub struct BiometricAdapter {
    name: String,
    driver: Box<dyn BiometricDriver>,
    sync_interval: Duration,
    status: Arc<StatusCell>,
    in_flight: Arc<Mutex<()>>,
}

impl BiometricAdapter {
    pub fn new(name: impl Into<String>, driver: Box<dyn BiometricDriver>, sync_interval: Duration) -> Self {
        let sync_interval = sync_interval.max(MIN_SYNC_INTERVAL);
        let name = name.into();
        Self {
            status: Arc::new(StatusCell::new(name.clone())),
            name,
            driver,
            sync_interval,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Run exactly one poll tick: reconnect-if-needed, fetch records, resolve
    /// users, emit, and clear only if every emit succeeded.
    async fn tick(&self, sink: &EventSink, device_id: &str) -> Result<(), BridgeError> {
        // Single-flight: a tick already running skips this one rather than
        // queuing, since the ticker interval already bounds frequency.
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Ok(());
        };

        if let Err(e) = self.driver.connect().await {
            self.status.set_error(e.to_string());
            return Err(e);
        }

        let records = match self.driver.get_new_attendance_records().await {
            Ok(records) => records,
            Err(e) => {
                self.status.set_error(e.to_string());
                return Err(e);
            }
        };
        if records.is_empty() {
            self.status.set_active();
            return Ok(());
        }

        let users = self.driver.get_users().await?;
        let now = SystemTime::now();
        let mut all_ok = true;
        for record in &records {
            if let Ok(drift) = now.duration_since(record.timestamp) {
                if drift > MAX_ACCEPTABLE_DRIFT {
                    warn!(
                        adapter = %self.name,
                        drift_secs = drift.as_secs(),
                        "performance_degradation: attendance record clock drift exceeds tolerance"
                    );
                }
            }
            let external_user_id = users
                .get(&record.device_user_id)
                .cloned()
                .unwrap_or_else(|| record.device_user_id.clone());
            let event_type = match record.mode {
                0 => EventType::Entry,
                1 => EventType::Exit,
                _ => EventType::SystemEvent,
            };
            let raw_event = RawEvent {
                external_user_id,
                timestamp: record.timestamp,
                event_type,
                raw_data: None,
            };
            if sink.send(raw_event).await.is_err() {
                all_ok = false;
                break;
            }
            self.status.record_event();
        }

        if all_ok {
            self.driver.clear_attendance_records().await?;
        } else {
            warn!(adapter = %self.name, "skipping clear_attendance_records after a failed emit, records will be retried");
        }
        self.status.set_active();
        let _ = device_id;
        Ok(())
    }
}

impl Adapter for BiometricAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Biometric
    }

    fn run(
        self: Box<Self>,
        ctx: AdapterContext,
        sink: EventSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send>> {
        Box::pin(async move {
            self.status.set_initializing();
            let mut interval = tokio::time::interval(self.sync_interval);
            info!(adapter = %self.name, interval_secs = self.sync_interval.as_secs(), "biometric adapter started");
            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.tick(&sink, &ctx.device_id).await {
                            error!(adapter = %self.name, error = %e, "biometric poll tick failed");
                        }
                    }
                }
            }
            let _ = self.driver.disconnect().await;
            Ok(())
        })
    }

    fn status(&self) -> crate::event::AdapterStatus {
        self.status.get()
    }
}

fn _assert_send<T: Send>() {}
fn _biometric_adapter_is_send() {
    _assert_send::<BiometricAdapter>();
}

#[cfg(test)]
#[path = "biometric_tests.rs"]
mod tests;
