//! Batch Settler
//!
//! Submits ready batches to the ledger.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Settlement Flow                             │
//! │                                                                  │
//! │  ┌────────────┐    ┌────────────┐    ┌────────────────────────┐ │
//! │  │ Accountant │───▶│   Submit   │───▶│    Wait for            │ │
//! │  │   ready    │    │ SettleBatch│    │    Confirmation        │ │
//! │  └────────────┘    └────────────┘    └────────────────────────┘ │
//! │                          │                      │               │
//! │                          ▼                      ▼               │
//! │               AlreadySettled = success   accountant opens N+1   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shroud_privacy::ErrorClass;

use super::cache::BatchStatusCache;
use super::ledger::{BatchStatus, LedgerClient, LedgerError, LedgerInstruction, TxId};
use super::retry::with_retry;
use crate::accountant::{AccountantError, AccountantHandle, BatchSummary, SettleOutcome};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SettlerConfig {
    /// Submission attempts per batch
    pub max_retries: u32,
    /// Base delay between attempts; grows linearly
    pub retry_delay: Duration,
}

impl Default for SettlerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

// ============================================================================
// Settlement Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub batch_id: u64,
    /// None when the ledger already had the batch.
    pub tx: Option<TxId>,
    pub slot: Option<u64>,
    pub already_settled: bool,
}

impl SettlementReceipt {
    fn already_settled(batch_id: u64) -> Self {
        Self {
            batch_id,
            tx: None,
            slot: None,
            already_settled: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Accountant(#[from] AccountantError),
}

impl SettlementError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SettlementError::Ledger(e) => e.class(),
            SettlementError::Accountant(e) => e.class(),
        }
    }
}

// ============================================================================
// Bridge
// ============================================================================

#[async_trait]
pub trait SettlementBridge: Send + Sync {
    /// Settle `batch` on the ledger. A batch the ledger already holds is a
    /// success with `already_settled` set.
    async fn settle(&self, batch: &BatchSummary) -> Result<SettlementReceipt, LedgerError>;
}

pub struct LedgerSettlementBridge<L> {
    ledger: L,
    config: SettlerConfig,
}

impl<L: LedgerClient> LedgerSettlementBridge<L> {
    pub fn new(ledger: L, config: SettlerConfig) -> Self {
        Self { ledger, config }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    async fn submit_once(&self, batch: &BatchSummary) -> Result<SettlementReceipt, LedgerError> {
        let instruction = LedgerInstruction::SettleBatch {
            batch_id: batch.batch_id,
            commitments: batch.commitments.clone(),
            total_amount: batch.total_amount,
        };
        let tx = match self.ledger.submit(instruction).await {
            Ok(tx) => tx,
            Err(LedgerError::AlreadySettled(id)) => {
                debug!(batch_id = id, "ledger already holds batch");
                return Ok(SettlementReceipt::already_settled(id));
            }
            Err(e) => return Err(e),
        };
        let confirmation = self.ledger.confirm(&tx).await?;
        Ok(SettlementReceipt {
            batch_id: batch.batch_id,
            tx: Some(confirmation.tx),
            slot: Some(confirmation.slot),
            already_settled: false,
        })
    }
}

#[async_trait]
impl<L: LedgerClient> SettlementBridge for LedgerSettlementBridge<L> {
    async fn settle(&self, batch: &BatchSummary) -> Result<SettlementReceipt, LedgerError> {
        with_retry(&self.config, "settle_batch", move || self.submit_once(batch)).await
    }
}

// ============================================================================
// Service
// ============================================================================

/// Polls the accountant and settles ready batches.
pub struct SettlementService<B, L> {
    accountant: AccountantHandle,
    bridge: B,
    ledger: L,
    cache: BatchStatusCache,
    poll_interval: Duration,
}

impl<B: SettlementBridge, L: LedgerClient> SettlementService<B, L> {
    pub fn new(
        accountant: AccountantHandle,
        bridge: B,
        ledger: L,
        cache: BatchStatusCache,
        poll_interval: Duration,
    ) -> Self {
        Self {
            accountant,
            bridge,
            ledger,
            cache,
            poll_interval,
        }
    }

    pub fn accountant(&self) -> &AccountantHandle {
        &self.accountant
    }

    pub fn cache(&self) -> &BatchStatusCache {
        &self.cache
    }

    async fn status(&self, batch_id: u64) -> Result<BatchStatus, LedgerError> {
        if let Some(status) = self.cache.get(batch_id) {
            return Ok(status);
        }
        let status = self.ledger.batch_status(batch_id).await?;
        self.cache.insert(batch_id, status);
        Ok(status)
    }

    /// One polling step. Returns a receipt when a batch was closed.
    ///
    /// The accountant is locked only to read the summary and to close the
    /// batch, never across ledger calls. Deposits recorded meanwhile carry
    /// over into the next batch.
    pub async fn tick(&self) -> Result<Option<SettlementReceipt>, SettlementError> {
        let summary = {
            let accountant = self.accountant.lock().await;
            if !accountant.is_ready() {
                return Ok(None);
            }
            accountant.current_batch().summary()
        };
        let batch_id = summary.batch_id;

        if self.status(batch_id).await?.is_settled() {
            self.accountant.lock().await.acknowledge_settled(batch_id)?;
            self.cache.evict_before(batch_id);
            return Ok(Some(SettlementReceipt::already_settled(batch_id)));
        }

        let receipt = self.bridge.settle(&summary).await?;

        match self.accountant.lock().await.settle_summary(&summary)? {
            SettleOutcome::Settled(closed) => info!(
                batch_id,
                deposits = closed.deposit_count(),
                already_settled = receipt.already_settled,
                "settlement complete"
            ),
            SettleOutcome::AlreadySettled { .. } => {
                debug!(batch_id, "accountant already closed batch")
            }
        }
        let slot = receipt.slot.unwrap_or_default();
        self.cache.insert(batch_id, BatchStatus::Settled { slot });
        self.cache.evict_before(batch_id);
        Ok(Some(receipt))
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        info!(poll_ms = self.poll_interval.as_millis() as u64, "settlement service started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(code = e.class().code(), error = %e, "settlement tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("settlement service stopped");
    }
}
