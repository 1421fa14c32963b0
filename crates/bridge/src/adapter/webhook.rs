// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook adapter (§4.D): the adapter half of the inbound HTTP contract. The
//! HTTP listener itself lives in [`crate::webhook_server`] (§4.N); this type
//! is the bridge between an inbound POST and the common adapter/event-sink
//! pipeline, so the webhook server has no knowledge of enrichment/queueing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Adapter, AdapterContext, AdapterKind, EventSink, StatusCell};
use crate::error::BridgeError;
use crate::event::RawEvent;

/// Bounded mailbox depth between the HTTP handler and the adapter loop.
const INBOUND_CHANNEL_CAPACITY: usize = 256;

pub struct WebhookAdapter {
    name: String,
    status: Arc<StatusCell>,
    inbound_tx: mpsc::Sender<RawEvent>,
    inbound_rx: Option<mpsc::Receiver<RawEvent>>,
}

impl WebhookAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let name = name.into();
        Self {
            status: Arc::new(StatusCell::new(name.clone())),
            name,
            inbound_tx,
            inbound_rx: Some(inbound_rx),
        }
    }

    /// Sender handed to the HTTP handler (§4.N) so it can push events without
    /// depending on the adapter trait object.
    pub fn inbound_sender(&self) -> mpsc::Sender<RawEvent> {
        self.inbound_tx.clone()
    }
}

impl Adapter for WebhookAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Webhook
    }

    fn run(
        mut self: Box<Self>,
        ctx: AdapterContext,
        sink: EventSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send>> {
        Box::pin(async move {
            self.status.set_active();
            let Some(mut inbound_rx) = self.inbound_rx.take() else {
                return Err(BridgeError::Internal("webhook adapter started twice".into()));
            };
            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    event = inbound_rx.recv() => {
                        let Some(event) = event else { break };
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
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
