use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use super::ledger::BatchStatus;

/// Short-lived cache of ledger batch status.
///
/// `Settled` is final and does not expire; `Pending` entries live for `ttl`.
/// Entries for batches older than the one being settled are dropped with
/// [`BatchStatusCache::evict_before`].
#[derive(Debug)]
pub struct BatchStatusCache {
    ttl: Duration,
    entries: Mutex<HashMap<u64, (BatchStatus, Instant)>>,
}

impl BatchStatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, batch_id: u64) -> Option<BatchStatus> {
        let mut entries = self.entries.lock().ok()?;
        let (status, stored_at) = *entries.get(&batch_id)?;
        if status.is_settled() || stored_at.elapsed() < self.ttl {
            return Some(status);
        }
        entries.remove(&batch_id);
        None
    }

    pub fn insert(&self, batch_id: u64, status: BatchStatus) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(batch_id, (status, Instant::now()));
        }
    }

    /// Drop every entry for a batch id below `batch_id`.
    pub fn evict_before(&self, batch_id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|id, _| *id >= batch_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self, batch_id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&batch_id);
        }
    }
}
