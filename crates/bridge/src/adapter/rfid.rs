// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RFID card-reader adapter (§4.D). Vendor wire framing is out of scope, the
//! same way biometric vendor drivers are stubbed; [`UnimplementedRfidReader`]
//! stands in until a concrete reader integration exists.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::error;

use super::{Adapter, AdapterContext, AdapterKind, EventSink, StatusCell};
use crate::error::BridgeError;
use crate::event::{EventType, RawEvent};

/// Low-level card reader. A `poll` returns the card UID read since the last
/// call, or `None` if nothing new was presented.
pub trait RfidReader: Send + Sync + 'static {
    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<Option<String>, BridgeError>> + Send + '_>>;
}

/// Stand-in for a concrete RFID reader integration.
pub struct UnimplementedRfidReader;

impl RfidReader for UnimplementedRfidReader {
    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<Option<String>, BridgeError>> + Send + '_>> {
        Box::pin(async { Err(BridgeError::Device("rfid reader: not yet implemented".into())) })
    }
}

pub struct RfidAdapter {
    name: String,
    reader: Box<dyn RfidReader>,
    poll_interval: Duration,
    status: Arc<StatusCell>,
}

impl RfidAdapter {
    pub fn new(name: impl Into<String>, reader: Box<dyn RfidReader>, poll_interval: Duration) -> Self {
        let name = name.into();
        Self { status: Arc::new(StatusCell::new(name.clone())), name, reader, poll_interval }
    }
}

impl Adapter for RfidAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Rfid
    }

    fn run(
        self: Box<Self>,
        ctx: AdapterContext,
        sink: EventSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send>> {
        Box::pin(async move {
            self.status.set_initializing();
            let mut interval = tokio::time::interval(self.poll_interval);
            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match self.reader.poll().await {
                            Ok(Some(card_uid)) => {
                                let event = RawEvent {
                                    external_user_id: card_uid,
                                    timestamp: SystemTime::now(),
                                    event_type: EventType::Entry,
                                    raw_data: None,
                                };
                                if sink.send(event).await.is_err() {
                                    break;
                                }
                                self.status.record_event();
                                self.status.set_active();
                            }
                            Ok(None) => self.status.set_active(),
                            Err(e) => {
                                error!(adapter = %self.name, error = %e, "rfid poll failed");
                                self.status.set_error(e.to_string());
                            }
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn status(&self) -> crate::event::AdapterStatus {
        self.status.get()
    }
}

#[cfg(test)]
#[path = "rfid_tests.rs"]
mod tests;
