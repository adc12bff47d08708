//! Ledger Client
//!
//! The pool's on-ledger program owns the commitment tree, the root history
//! and the nullifier set. This side only submits instructions and reads
//! confirmations.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use shroud_privacy::{Commitment, ErrorClass, Field, NullifierHash};

use super::prover::ProofBlob;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub String);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerInstruction {
    Deposit {
        commitment: Commitment,
        denomination: u64,
    },
    Withdraw {
        proof: ProofBlob,
        root: Field,
        nullifier_hash: NullifierHash,
        recipient: [u8; 32],
        denomination: u64,
    },
    /// Permissionless; anyone may submit it once the batch is ready.
    SettleBatch {
        batch_id: u64,
        commitments: Vec<Commitment>,
        total_amount: u64,
    },
}

impl LedgerInstruction {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerInstruction::Deposit { .. } => "deposit",
            LedgerInstruction::Withdraw { .. } => "withdraw",
            LedgerInstruction::SettleBatch { .. } => "settle_batch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx: TxId,
    pub slot: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Pending,
    Settled { slot: u64 },
}

impl BatchStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, BatchStatus::Settled { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("batch {0} is already settled")]
    AlreadySettled(u64),

    #[error("nullifier already spent")]
    NullifierSpent,

    #[error("unknown merkle root")]
    UnknownRoot,

    #[error("ledger rpc error: {0}")]
    Rpc(String),

    #[error("instruction rejected: {0}")]
    Rejected(String),

    #[error("transaction {0} was not confirmed in time")]
    Timeout(TxId),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Rpc(_) | LedgerError::Timeout(_) => ErrorClass::Connection,
            _ => ErrorClass::Ledger,
        }
    }

    /// Worth another submission with the same instruction.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Rpc(_) | LedgerError::Timeout(_))
    }
}

// ============================================================================
// Client Trait
// ============================================================================

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit(&self, instruction: LedgerInstruction) -> Result<TxId, LedgerError>;

    async fn confirm(&self, tx: &TxId) -> Result<Confirmation, LedgerError>;

    async fn batch_status(&self, batch_id: u64) -> Result<BatchStatus, LedgerError>;
}

#[async_trait]
impl<L: LedgerClient + ?Sized> LedgerClient for Arc<L> {
    async fn submit(&self, instruction: LedgerInstruction) -> Result<TxId, LedgerError> {
        (**self).submit(instruction).await
    }

    async fn confirm(&self, tx: &TxId) -> Result<Confirmation, LedgerError> {
        (**self).confirm(tx).await
    }

    async fn batch_status(&self, batch_id: u64) -> Result<BatchStatus, LedgerError> {
        (**self).batch_status(batch_id).await
    }
}

// ============================================================================
// Mock Ledger
// ============================================================================

#[derive(Default)]
struct MockState {
    slot: u64,
    deposits: Vec<Commitment>,
    roots: HashSet<Field>,
    spent: HashSet<NullifierHash>,
    settled: HashMap<u64, u64>,
    confirmed: HashMap<TxId, u64>,
    submitted: Vec<LedgerInstruction>,
    fail_next: u32,
}

/// In-memory ledger: tracks settled batches, spent nullifiers and the
/// roots it has been told about.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept withdrawals against `root`.
    pub async fn publish_root(&self, root: Field) {
        self.state.lock().await.roots.insert(root);
    }

    /// Fail the next `n` submissions with an RPC error.
    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.fail_next = n;
    }

    pub async fn submitted(&self) -> Vec<LedgerInstruction> {
        self.state.lock().await.submitted.clone()
    }

    pub async fn deposits(&self) -> Vec<Commitment> {
        self.state.lock().await.deposits.clone()
    }

    pub async fn is_spent(&self, nullifier_hash: &NullifierHash) -> bool {
        self.state.lock().await.spent.contains(nullifier_hash)
    }

    pub async fn settled_batches(&self) -> usize {
        self.state.lock().await.settled.len()
    }
}

fn tx_id(slot: u64, instruction: &LedgerInstruction) -> TxId {
    let mut hasher = Sha256::new();
    hasher.update(slot.to_le_bytes());
    hasher.update(instruction.kind().as_bytes());
    TxId(bs58::encode(hasher.finalize()).into_string())
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit(&self, instruction: LedgerInstruction) -> Result<TxId, LedgerError> {
        let mut state = self.state.lock().await;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(LedgerError::Rpc("connection reset".into()));
        }

        match &instruction {
            LedgerInstruction::Deposit { commitment, .. } => {
                state.deposits.push(*commitment);
            }
            LedgerInstruction::Withdraw {
                proof,
                root,
                nullifier_hash,
                ..
            } => {
                if proof.bytes.is_empty() {
                    return Err(LedgerError::Rejected("empty proof".into()));
                }
                if !state.roots.contains(root) {
                    return Err(LedgerError::UnknownRoot);
                }
                if !state.spent.insert(*nullifier_hash) {
                    return Err(LedgerError::NullifierSpent);
                }
            }
            LedgerInstruction::SettleBatch { batch_id, .. } => {
                if state.settled.contains_key(batch_id) {
                    return Err(LedgerError::AlreadySettled(*batch_id));
                }
                let slot = state.slot + 1;
                state.settled.insert(*batch_id, slot);
            }
        }

        state.slot += 1;
        let slot = state.slot;
        let tx = tx_id(slot, &instruction);
        debug!(kind = instruction.kind(), %tx, slot, "mock ledger accepted instruction");
        state.confirmed.insert(tx.clone(), slot);
        state.submitted.push(instruction);
        Ok(tx)
    }

    async fn confirm(&self, tx: &TxId) -> Result<Confirmation, LedgerError> {
        let state = self.state.lock().await;
        state
            .confirmed
            .get(tx)
            .map(|slot| Confirmation {
                tx: tx.clone(),
                slot: *slot,
            })
            .ok_or_else(|| LedgerError::Timeout(tx.clone()))
    }

    async fn batch_status(&self, batch_id: u64) -> Result<BatchStatus, LedgerError> {
        let state = self.state.lock().await;
        Ok(match state.settled.get(&batch_id) {
            Some(slot) => BatchStatus::Settled { slot: *slot },
            None => BatchStatus::Pending,
        })
    }
}
