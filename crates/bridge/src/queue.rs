// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin, contract-enforcing wrapper over the durable store (§4.C).
//!
//! Concurrency is serialized through the store's own single-writer
//! discipline; this layer adds validation, capacity/FIFO eviction, and the
//! tier-scoped retention policy the store itself is agnostic to.

use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::error::BridgeError;
use crate::event::{CanonicalEvent, PerformanceTier, TierParams};
use crate::store::{ClearCriteria, QueryFilter, QueryPage, Store, StoreStats};

/// Sent rows older than this are eligible for cleanup regardless of tier.
const SENT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Enqueue/dequeue/mark-sent/mark-failed on top of the store, capacity- and
/// FIFO-eviction-aware.
pub struct QueueManager {
    store: Store,
    params: TierParams,
}

impl QueueManager {
    pub fn new(store: Store, tier: PerformanceTier) -> Self {
        Self { store, params: tier.params() }
    }

    /// Validate, insert, and if the queue is now over capacity, evict the
    /// oldest rows until it is back at or under `max_size`.
    pub async fn enqueue(&self, event: &CanonicalEvent) -> Result<i64, BridgeError> {
        event.validate(SystemTime::now())?;
        let row_id = self.store.insert(event).await?;
        let depth = self.store.depth().await?;
        if depth > self.params.max_size as u64 {
            let overflow = depth - self.params.max_size as u64;
            let evicted = self.store.evict_oldest(overflow as usize).await?;
            if evicted > 0 {
                warn!(evicted, max_size = self.params.max_size, "queue over capacity, evicted oldest events");
            }
        }
        Ok(row_id)
    }

    /// Fetch up to one submission batch worth of pending events.
    pub async fn dequeue_batch(&self) -> Result<Vec<crate::store::StoredEvent>, BridgeError> {
        self.store.get_pending(self.params.batch_size).await
    }

    pub async fn mark_sent(&self, row_ids: &[i64]) -> Result<(), BridgeError> {
        self.store.mark_sent(row_ids).await
    }

    pub async fn mark_failed(&self, row_ids: &[i64], error_message: &str) -> Result<(), BridgeError> {
        self.store.increment_retry(row_ids, error_message).await
    }

    /// Count of events awaiting submission.
    pub async fn depth(&self) -> Result<u64, BridgeError> {
        self.store.depth().await
    }

    /// Whether the queue is at or over its tier's capacity.
    pub async fn is_queue_full(&self) -> Result<bool, BridgeError> {
        Ok(self.depth().await? >= self.params.max_size as u64)
    }

    /// Delete sent rows older than the 7-day retention window.
    pub async fn cleanup(&self) -> Result<u64, BridgeError> {
        self.store.cleanup(SENT_RETENTION).await
    }

    pub async fn query(&self, filter: &QueryFilter) -> Result<QueryPage, BridgeError> {
        self.store.query(filter).await
    }

    pub async fn stats(&self) -> Result<StoreStats, BridgeError> {
        self.store.stats().await
    }

    pub async fn clear(&self, criteria: &ClearCriteria) -> Result<u64, BridgeError> {
        self.store.clear(criteria).await
    }

    pub fn tier_params(&self) -> TierParams {
        self.params
    }

    pub fn max_retries(&self) -> u32 {
        self.params.max_retries
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
