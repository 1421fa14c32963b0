// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in simulator adapter: generates synthetic entry/exit events on a
//! timer, used for local testing and demos without real hardware.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::info;

use super::{Adapter, AdapterContext, AdapterKind, EventSink, StatusCell};
use crate::error::BridgeError;
use crate::event::{EventType, RawEvent};

/// Emits one synthetic event per tick, alternating entry/exit across a small
/// pool of fake users.
pub struct SimulatorAdapter {
    name: String,
    interval: Duration,
    user_pool: Vec<String>,
    status: Arc<StatusCell>,
    tick_count: AtomicU64,
}

impl SimulatorAdapter {
    pub fn new(name: impl Into<String>, interval: Duration, user_pool: Vec<String>) -> Self {
        let name = name.into();
        let user_pool = if user_pool.is_empty() {
            vec!["sim-user-1".to_string(), "sim-user-2".to_string()]
        } else {
            user_pool
        };
        Self {
            status: Arc::new(StatusCell::new(name.clone())),
            name,
            interval,
            user_pool,
            tick_count: AtomicU64::new(0),
        }
    }

    fn next_event(&self) -> RawEvent {
        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst);
        let user = self.user_pool[tick as usize % self.user_pool.len()].clone();
        let event_type = if tick % 2 == 0 { EventType::Entry } else { EventType::Exit };
        RawEvent { external_user_id: user, timestamp: SystemTime::now(), event_type, raw_data: None }
    }
}

impl Adapter for SimulatorAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Simulator
    }

    fn run(
        self: Box<Self>,
        ctx: AdapterContext,
        sink: EventSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send>> {
        Box::pin(async move {
            self.status.set_active();
            info!(adapter = %self.name, "simulator adapter started");
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let event = self.next_event();
                        if sink.send(event).await.is_err() {
                            break;
                        }
                        self.status.record_event();
                    }
                }
            }
            Ok(())
        })
    }

    fn status(&self) -> crate::event::AdapterStatus {
        self.status.get()
    }

    fn unlock_door(
        &self,
        _duration_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[path = "simulator_tests.rs"]
mod tests;
