//! Anonymity Accountant
//!
//! Groups completed deposits into batches and decides when a batch is large
//! enough to settle.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Batch Lifecycle                           │
//! │                                                                  │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────────┐  │
//! │  │   Pending   │───▶│    Ready    │───▶│      Settled        │  │
//! │  │   Batch N   │    │ (threshold  │    │  opens Batch N + 1  │  │
//! │  │             │    │  or timeout)│    │                     │  │
//! │  └─────────────┘    └─────────────┘    └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Settlement is permissionless; the ledger makes it idempotent. The
//! accountant only mirrors the outcome.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use shroud_coinjoin::{DepositSink, RecordError};
use shroud_privacy::{Commitment, ErrorClass};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountantConfig {
    /// Deposits needed before a batch is ready
    pub threshold: usize,
    /// Age after which an undersized batch may settle
    pub max_batch_age: Duration,
    /// Allow timeout-driven readiness at all
    pub settle_on_timeout: bool,
}

impl Default for AccountantConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            max_batch_age: Duration::from_secs(600),
            settle_on_timeout: false,
        }
    }
}

// ============================================================================
// Batch Types
// ============================================================================

/// Deposits pending settlement together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: u64,
    pub commitments: Vec<Commitment>,
    pub denominations: Vec<u64>,
    pub total_amount: u64,
    /// Unix seconds; restamped by the first deposit of the batch.
    pub created_at: u64,
    pub settled: bool,
}

impl Batch {
    fn open(batch_id: u64, now: u64) -> Self {
        Self {
            batch_id,
            commitments: Vec::new(),
            denominations: Vec::new(),
            total_amount: 0,
            created_at: now,
            settled: false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.commitments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id,
            commitments: self.commitments.clone(),
            total_amount: self.total_amount,
        }
    }
}

/// What the settlement instruction carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: u64,
    pub commitments: Vec<Commitment>,
    pub total_amount: u64,
}

impl BatchSummary {
    pub fn deposit_count(&self) -> usize {
        self.commitments.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotReady,
    /// `pending_count >= threshold`
    Threshold,
    /// Below threshold but older than the configured age.
    Timeout,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        !matches!(self, Readiness::NotReady)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled(BatchSummary),
    /// Repeat settlement of a batch that is already closed.
    AlreadySettled { batch_id: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountantError {
    #[error("commitment already recorded in batch {batch_id}")]
    DuplicateCommitment { batch_id: u64 },

    #[error("batch {batch_id} is not ready ({pending}/{threshold} deposits)")]
    NotReady {
        batch_id: u64,
        pending: usize,
        threshold: usize,
    },

    #[error("batch {0} has not been opened")]
    UnknownBatch(u64),

    #[error("batch total overflows")]
    AmountOverflow,
}

impl AccountantError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AccountantError::AmountOverflow => ErrorClass::Capacity,
            _ => ErrorClass::Protocol,
        }
    }
}

/// Persisted form of the pending-batch cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountantSnapshot {
    pub current: Batch,
    pub settled_batches: u64,
}

// ============================================================================
// Accountant
// ============================================================================

pub struct AnonymityAccountant {
    config: AccountantConfig,
    current: Batch,
    settled_batches: u64,
}

impl AnonymityAccountant {
    pub fn new(config: AccountantConfig) -> Self {
        Self {
            config,
            current: Batch::open(0, now_secs()),
            settled_batches: 0,
        }
    }

    pub fn config(&self) -> &AccountantConfig {
        &self.config
    }

    pub fn current_batch(&self) -> &Batch {
        &self.current
    }

    pub fn pending_count(&self) -> usize {
        self.current.pending_count()
    }

    pub fn settled_batches(&self) -> u64 {
        self.settled_batches
    }

    /// Add a completed deposit to the open batch. Returns the pending count.
    pub fn record_deposit(
        &mut self,
        commitment: Commitment,
        denomination: u64,
    ) -> Result<usize, AccountantError> {
        self.record_deposit_at(commitment, denomination, now_secs())
    }

    pub fn record_deposit_at(
        &mut self,
        commitment: Commitment,
        denomination: u64,
        now: u64,
    ) -> Result<usize, AccountantError> {
        let batch = &mut self.current;
        if batch.commitments.contains(&commitment) {
            return Err(AccountantError::DuplicateCommitment {
                batch_id: batch.batch_id,
            });
        }
        let total = batch
            .total_amount
            .checked_add(denomination)
            .ok_or(AccountantError::AmountOverflow)?;

        if batch.is_empty() {
            batch.created_at = now;
        }
        batch.commitments.push(commitment);
        batch.denominations.push(denomination);
        batch.total_amount = total;

        debug!(
            batch_id = batch.batch_id,
            pending = batch.pending_count(),
            threshold = self.config.threshold,
            "deposit recorded"
        );
        Ok(batch.pending_count())
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness_at(now_secs())
    }

    pub fn readiness_at(&self, now: u64) -> Readiness {
        let batch = &self.current;
        if batch.pending_count() >= self.config.threshold {
            return Readiness::Threshold;
        }
        if self.config.settle_on_timeout && !batch.is_empty() {
            let age = now.saturating_sub(batch.created_at);
            if age >= self.config.max_batch_age.as_secs() {
                warn!(
                    batch_id = batch.batch_id,
                    pending = batch.pending_count(),
                    threshold = self.config.threshold,
                    age_secs = age,
                    "batch ready by timeout below threshold"
                );
                return Readiness::Timeout;
            }
        }
        Readiness::NotReady
    }

    pub fn is_ready(&self) -> bool {
        self.readiness().is_ready()
    }

    /// Close `batch_id` after the ledger accepted (or already had) its
    /// settlement, and open the next batch.
    pub fn settle(&mut self, batch_id: u64) -> Result<SettleOutcome, AccountantError> {
        self.settle_at(batch_id, now_secs())
    }

    pub fn settle_at(&mut self, batch_id: u64, now: u64) -> Result<SettleOutcome, AccountantError> {
        if let Some(outcome) = self.check_batch_id(batch_id)? {
            return Ok(outcome);
        }
        if !self.readiness_at(now).is_ready() {
            return Err(AccountantError::NotReady {
                batch_id,
                pending: self.current.pending_count(),
                threshold: self.config.threshold,
            });
        }
        let summary = self.current.summary();
        Ok(self.close(&summary, now))
    }

    /// Close the batch described by `summary` once the ledger holds it.
    ///
    /// Only the summarized commitments are closed. Deposits recorded after
    /// the summary was taken carry over into the next batch.
    pub fn settle_summary(&mut self, summary: &BatchSummary) -> Result<SettleOutcome, AccountantError> {
        self.settle_summary_at(summary, now_secs())
    }

    pub fn settle_summary_at(
        &mut self,
        summary: &BatchSummary,
        now: u64,
    ) -> Result<SettleOutcome, AccountantError> {
        if let Some(outcome) = self.check_batch_id(summary.batch_id)? {
            return Ok(outcome);
        }
        Ok(self.close(summary, now))
    }

    /// Mirror a settlement performed by another party without the
    /// readiness check; the ledger is authoritative.
    pub fn acknowledge_settled(&mut self, batch_id: u64) -> Result<SettleOutcome, AccountantError> {
        if let Some(outcome) = self.check_batch_id(batch_id)? {
            return Ok(outcome);
        }
        let next = Batch::open(batch_id + 1, now_secs());
        let closed = std::mem::replace(&mut self.current, next);
        self.settled_batches += 1;
        info!(batch_id, "batch settled elsewhere");
        Ok(SettleOutcome::AlreadySettled {
            batch_id: closed.batch_id,
        })
    }

    /// `Some` for an already-closed batch, an error for one not yet opened.
    fn check_batch_id(&self, batch_id: u64) -> Result<Option<SettleOutcome>, AccountantError> {
        if batch_id < self.current.batch_id {
            debug!(batch_id, "batch already settled");
            return Ok(Some(SettleOutcome::AlreadySettled { batch_id }));
        }
        if batch_id > self.current.batch_id {
            return Err(AccountantError::UnknownBatch(batch_id));
        }
        Ok(None)
    }

    fn close(&mut self, summary: &BatchSummary, now: u64) -> SettleOutcome {
        let batch_id = self.current.batch_id;
        let mut next = Batch::open(batch_id + 1, now);
        let mut closed = Batch::open(batch_id, self.current.created_at);
        closed.settled = true;

        let current = std::mem::replace(&mut self.current, Batch::open(batch_id, now));
        for (commitment, denomination) in current.commitments.into_iter().zip(current.denominations) {
            let batch = if summary.commitments.contains(&commitment) {
                &mut closed
            } else {
                &mut next
            };
            batch.commitments.push(commitment);
            batch.denominations.push(denomination);
            batch.total_amount = batch.total_amount.saturating_add(denomination);
        }
        self.current = next;
        self.settled_batches += 1;

        info!(
            batch_id,
            deposits = closed.pending_count(),
            total_amount = closed.total_amount,
            carried_over = self.current.pending_count(),
            settled_batches = self.settled_batches,
            "batch settled"
        );
        SettleOutcome::Settled(closed.summary())
    }

    pub fn snapshot(&self) -> AccountantSnapshot {
        AccountantSnapshot {
            current: self.current.clone(),
            settled_batches: self.settled_batches,
        }
    }

    pub fn restore(config: AccountantConfig, snapshot: AccountantSnapshot) -> Self {
        Self {
            config,
            current: snapshot.current,
            settled_batches: snapshot.settled_batches,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ============================================================================
// Shared Handle
// ============================================================================

/// Single-writer handle shared by sessions and the settlement service.
#[derive(Clone)]
pub struct AccountantHandle {
    inner: Arc<Mutex<AnonymityAccountant>>,
}

impl AccountantHandle {
    pub fn new(accountant: AnonymityAccountant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(accountant)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, AnonymityAccountant> {
        self.inner.lock().await
    }
}

#[async_trait]
impl DepositSink for AccountantHandle {
    async fn record_deposit(
        &self,
        commitment: Commitment,
        denomination: u64,
    ) -> Result<usize, RecordError> {
        self.lock()
            .await
            .record_deposit(commitment, denomination)
            .map_err(|e| RecordError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DENOM: u64 = 1_000_000_000;

    fn c(n: u8) -> Commitment {
        Commitment([n; 32])
    }

    #[test]
    fn test_ready_after_threshold_and_settle_resets() {
        let mut acc = AnonymityAccountant::new(AccountantConfig::default());
        for i in 0..3 {
            assert!(!acc.is_ready());
            acc.record_deposit(c(i), DENOM).unwrap();
        }
        assert!(acc.is_ready());
        assert_eq!(acc.readiness(), Readiness::Threshold);

        let outcome = acc.settle(0).unwrap();
        let SettleOutcome::Settled(summary) = outcome else {
            panic!("expected settlement");
        };
        assert_eq!(summary.batch_id, 0);
        assert_eq!(summary.deposit_count(), 3);
        assert_eq!(summary.total_amount, 3 * DENOM);

        assert_eq!(acc.pending_count(), 0);
        assert_eq!(acc.settled_batches(), 1);
        assert_eq!(acc.current_batch().batch_id, 1);
    }

    #[test]
    fn test_second_settle_is_noop() {
        let mut acc = AnonymityAccountant::new(AccountantConfig::default());
        for i in 0..3 {
            acc.record_deposit(c(i), DENOM).unwrap();
        }
        acc.settle(0).unwrap();

        assert_eq!(
            acc.settle(0).unwrap(),
            SettleOutcome::AlreadySettled { batch_id: 0 }
        );
        assert_eq!(acc.settled_batches(), 1);
        assert_eq!(acc.current_batch().batch_id, 1);
    }

    #[test]
    fn test_settle_below_threshold_rejected() {
        let mut acc = AnonymityAccountant::new(AccountantConfig::default());
        acc.record_deposit(c(1), DENOM).unwrap();
        assert_eq!(
            acc.settle(0),
            Err(AccountantError::NotReady {
                batch_id: 0,
                pending: 1,
                threshold: 3
            })
        );
        assert_eq!(acc.settle(5), Err(AccountantError::UnknownBatch(5)));
    }

    #[test]
    fn test_duplicate_commitment_rejected() {
        let mut acc = AnonymityAccountant::new(AccountantConfig::default());
        acc.record_deposit(c(1), DENOM).unwrap();
        assert_eq!(
            acc.record_deposit(c(1), DENOM),
            Err(AccountantError::DuplicateCommitment { batch_id: 0 })
        );
        assert_eq!(acc.pending_count(), 1);
    }

    #[test]
    fn test_timeout_readiness_is_opt_in() {
        let config = AccountantConfig {
            threshold: 3,
            max_batch_age: Duration::from_secs(60),
            settle_on_timeout: false,
        };
        let mut acc = AnonymityAccountant::new(config.clone());
        acc.record_deposit_at(c(1), DENOM, 1_000).unwrap();
        assert_eq!(acc.readiness_at(5_000), Readiness::NotReady);

        let mut acc = AnonymityAccountant::new(AccountantConfig {
            settle_on_timeout: true,
            ..config
        });
        // empty batches never time out
        assert_eq!(acc.readiness_at(u64::MAX), Readiness::NotReady);

        acc.record_deposit_at(c(1), DENOM, 1_000).unwrap();
        assert_eq!(acc.readiness_at(1_059), Readiness::NotReady);
        assert_eq!(acc.readiness_at(1_060), Readiness::Timeout);

        let outcome = acc.settle_at(0, 1_060).unwrap();
        assert!(matches!(outcome, SettleOutcome::Settled(s) if s.deposit_count() == 1));
    }

    #[test]
    fn test_first_deposit_restamps_batch_age() {
        let mut acc = AnonymityAccountant::new(AccountantConfig {
            threshold: 3,
            max_batch_age: Duration::from_secs(60),
            settle_on_timeout: true,
        });
        acc.record_deposit_at(c(1), DENOM, 10_000).unwrap();
        assert_eq!(acc.current_batch().created_at, 10_000);
        assert_eq!(acc.readiness_at(10_001), Readiness::NotReady);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut acc = AnonymityAccountant::new(AccountantConfig::default());
        acc.record_deposit(c(1), DENOM).unwrap();
        acc.record_deposit(c(2), 5 * DENOM).unwrap();

        let snapshot = acc.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = AnonymityAccountant::restore(
            AccountantConfig::default(),
            serde_json::from_str(&json).unwrap(),
        );
        assert_eq!(restored.pending_count(), 2);
        assert_eq!(restored.current_batch().total_amount, 6 * DENOM);
    }

    #[test]
    fn test_acknowledge_settled_advances() {
        let mut acc = AnonymityAccountant::new(AccountantConfig::default());
        acc.record_deposit(c(1), DENOM).unwrap();
        acc.acknowledge_settled(0).unwrap();
        assert_eq!(acc.current_batch().batch_id, 1);
        assert_eq!(acc.settled_batches(), 1);
        // stale acknowledgement
        assert_eq!(
            acc.acknowledge_settled(0),
            Ok(SettleOutcome::AlreadySettled { batch_id: 0 })
        );
        assert_eq!(acc.settled_batches(), 1);
    }

    #[test]
    fn test_acknowledge_future_batch_rejected() {
        let mut acc = AnonymityAccountant::new(AccountantConfig::default());
        acc.record_deposit(c(1), DENOM).unwrap();
        assert_eq!(
            acc.acknowledge_settled(4),
            Err(AccountantError::UnknownBatch(4))
        );
        assert_eq!(acc.current_batch().batch_id, 0);
        assert_eq!(acc.pending_count(), 1);
        assert_eq!(acc.settled_batches(), 0);
    }

    #[test]
    fn test_settle_summary_carries_late_deposits() {
        let mut acc = AnonymityAccountant::new(AccountantConfig::default());
        for i in 0..3 {
            acc.record_deposit_at(c(i), DENOM, 100).unwrap();
        }
        let summary = acc.current_batch().summary();
        // lands while the settlement is in flight
        acc.record_deposit_at(c(9), 5 * DENOM, 150).unwrap();

        let outcome = acc.settle_summary_at(&summary, 200).unwrap();
        assert_eq!(outcome, SettleOutcome::Settled(summary.clone()));

        let next = acc.current_batch();
        assert_eq!(next.batch_id, 1);
        assert_eq!(next.commitments, vec![c(9)]);
        assert_eq!(next.denominations, vec![5 * DENOM]);
        assert_eq!(next.total_amount, 5 * DENOM);
        assert_eq!(next.created_at, 200);

        // the carried deposit is not double counted by a repeat
        assert_eq!(
            acc.settle_summary_at(&summary, 300),
            Ok(SettleOutcome::AlreadySettled { batch_id: 0 })
        );
        assert_eq!(acc.settled_batches(), 1);
        assert_eq!(acc.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_handle_is_a_deposit_sink() {
        let handle = AccountantHandle::new(AnonymityAccountant::new(AccountantConfig::default()));
        assert_eq!(handle.record_deposit(c(1), DENOM).await.unwrap(), 1);
        assert_eq!(handle.record_deposit(c(2), DENOM).await.unwrap(), 2);
        assert!(handle.record_deposit(c(2), DENOM).await.is_err());
        assert_eq!(handle.lock().await.pending_count(), 2);
    }
}
