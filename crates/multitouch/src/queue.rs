//! Bounded queue of conversions waiting to be exported.

use crate::types::Conversion;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// How many full batches may wait before the oldest conversions are dropped.
pub const QUEUE_CAPACITY_BATCHES: usize = 10;

/// Conversions awaiting export, oldest first.
///
/// Holds at most `batch_size * QUEUE_CAPACITY_BATCHES` entries and never
/// holds the same conversion id twice. Exporting is best-effort: the store
/// keeps every conversion regardless of what happens here.
#[derive(Debug)]
pub struct ExportQueue {
    pending: Mutex<VecDeque<Conversion>>,
    batch_size: usize,
    capacity: usize,
}

impl ExportQueue {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            pending: Mutex::new(VecDeque::new()),
            batch_size,
            capacity: batch_size.saturating_mul(QUEUE_CAPACITY_BATCHES),
        }
    }

    /// Upper bound on queued conversions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a conversion behind the ones already waiting.
    ///
    /// A conversion whose id is already queued is ignored. Returns how many
    /// old conversions were dropped to stay within capacity.
    pub async fn enqueue(&self, conversion: Conversion) -> usize {
        let mut pending = self.pending.lock().await;
        if pending.iter().any(|c| c.id == conversion.id) {
            return 0;
        }
        pending.push_back(conversion);
        self.trim(&mut pending)
    }

    /// Whether a full batch is waiting.
    pub async fn should_flush(&self) -> bool {
        self.pending.lock().await.len() >= self.batch_size
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Take up to one batch of the oldest conversions.
    pub async fn next_batch(&self) -> Vec<Conversion> {
        let mut pending = self.pending.lock().await;
        let n = pending.len().min(self.batch_size);
        pending.drain(..n).collect()
    }

    /// Return a failed batch to the head of the queue, keeping its order.
    ///
    /// Conversions queued again in the meantime are not duplicated. Returns
    /// how many of the oldest conversions were dropped to stay within
    /// capacity.
    pub async fn requeue(&self, failed: Vec<Conversion>) -> usize {
        if failed.is_empty() {
            return 0;
        }
        let mut pending = self.pending.lock().await;
        for conversion in failed.into_iter().rev() {
            if !pending.iter().any(|c| c.id == conversion.id) {
                pending.push_front(conversion);
            }
        }
        self.trim(&mut pending)
    }

    /// Drop queued conversions older than `retention`. Returns how many.
    pub async fn evict_expired(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = now - retention;

        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|c| c.timestamp >= cutoff);
        before - pending.len()
    }

    fn trim(&self, pending: &mut VecDeque<Conversion>) -> usize {
        let excess = pending.len().saturating_sub(self.capacity);
        if excess > 0 {
            let dropped: Vec<Conversion> = pending.drain(..excess).collect();
            warn!(
                dropped = excess,
                capacity = self.capacity,
                oldest_dropped = %dropped[0].id,
                "export queue full, dropping oldest conversions"
            );
        }
        excess
    }
}
