//! Withdrawal flow: witness, proof, local check, ledger submission.

use thiserror::Error;
use tracing::info;

use shroud_privacy::{ErrorClass, Field, MerklePath, Note, NullifierHash};

use super::ledger::{LedgerClient, LedgerError, LedgerInstruction, TxId};
use super::prover::{ProofEngine, ProofError, WithdrawalWitness};
use super::retry::with_retry;
use super::settler::SettlerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    pub tx: TxId,
    pub slot: u64,
    pub nullifier_hash: NullifierHash,
    pub recipient: [u8; 32],
    pub denomination: u64,
}

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("note does not open its commitment")]
    InconsistentNote,

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl WithdrawError {
    pub fn class(&self) -> ErrorClass {
        match self {
            WithdrawError::InconsistentNote => ErrorClass::Cryptographic,
            WithdrawError::Proof(e) => e.class(),
            WithdrawError::Ledger(e) => e.class(),
        }
    }
}

pub struct WithdrawalService<P, L> {
    engine: P,
    ledger: L,
    retry: SettlerConfig,
}

impl<P: ProofEngine, L: LedgerClient> WithdrawalService<P, L> {
    pub fn new(engine: P, ledger: L) -> Self {
        Self {
            engine,
            ledger,
            retry: SettlerConfig::default(),
        }
    }

    /// Retry budget for submission and confirmation.
    pub fn with_retry_config(mut self, retry: SettlerConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Withdraw `note` to `recipient` using an authentication path against
    /// `root`, which must be a root the ledger still accepts.
    pub async fn withdraw(
        &self,
        note: &Note,
        path: MerklePath,
        root: Field,
        recipient: [u8; 32],
    ) -> Result<WithdrawalReceipt, WithdrawError> {
        if !note.is_consistent() {
            return Err(WithdrawError::InconsistentNote);
        }
        let witness = WithdrawalWitness::from_note(note, root, recipient)?.with_path(path, root);

        let (proof, inputs) = self.engine.generate_proof(&witness).await?;
        drop(witness);
        if !self.engine.verify_proof(&proof, &inputs).await? {
            return Err(ProofError::Invalid.into());
        }

        let instruction = LedgerInstruction::Withdraw {
            proof,
            root: inputs.root,
            nullifier_hash: inputs.nullifier_hash,
            recipient: inputs.recipient,
            denomination: inputs.denomination,
        };
        // a rejected nullifier or root is final; only transport errors repeat
        let ledger = &self.ledger;
        let tx = with_retry(&self.retry, "withdraw", move || ledger.submit(instruction.clone())).await?;
        let tx = &tx;
        let confirmation =
            with_retry(&self.retry, "confirm_withdraw", move || ledger.confirm(tx)).await?;

        info!(
            tx = %confirmation.tx,
            slot = confirmation.slot,
            denomination = inputs.denomination,
            "withdrawal confirmed"
        );
        Ok(WithdrawalReceipt {
            tx: confirmation.tx,
            slot: confirmation.slot,
            nullifier_hash: inputs.nullifier_hash,
            recipient: inputs.recipient,
            denomination: inputs.denomination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::ledger::MockLedger;
    use crate::settlement::prover::MockProofEngine;
    use shroud_privacy::{CommitmentVault, MerkleTree};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast() -> SettlerConfig {
        SettlerConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_transient_ledger_error_is_retried() {
        let ledger = Arc::new(MockLedger::new());
        let service =
            WithdrawalService::new(MockProofEngine::new(), ledger.clone()).with_retry_config(fast());

        let mut tree = MerkleTree::new(4).unwrap();
        let mut note = CommitmentVault::default().generate(1_000_000_000).unwrap();
        let ins = tree.insert(&note.commitment).unwrap();
        note.mark_inserted(ins.leaf_index, ins.path.clone());
        ledger.publish_root(tree.root()).await;
        ledger.fail_next(2).await;

        let receipt = service
            .withdraw(&note, ins.path, tree.root(), [4u8; 32])
            .await
            .unwrap();
        assert!(ledger.is_spent(&receipt.nullifier_hash).await);
        assert_eq!(ledger.submitted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_root_is_not_retried() {
        let ledger = Arc::new(MockLedger::new());
        let service =
            WithdrawalService::new(MockProofEngine::new(), ledger.clone()).with_retry_config(fast());

        let mut tree = MerkleTree::new(4).unwrap();
        let mut note = CommitmentVault::default().generate(1_000_000_000).unwrap();
        let ins = tree.insert(&note.commitment).unwrap();
        note.mark_inserted(ins.leaf_index, ins.path.clone());
        // root never published

        let err = service
            .withdraw(&note, ins.path, tree.root(), [4u8; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::Ledger(LedgerError::UnknownRoot)));
    }

    #[tokio::test]
    async fn test_double_spend_rejected() {
        let ledger = Arc::new(MockLedger::new());
        let service = WithdrawalService::new(MockProofEngine::new(), ledger.clone());

        let mut tree = MerkleTree::new(4).unwrap();
        let mut note = CommitmentVault::default().generate(1_000_000_000).unwrap();
        let ins = tree.insert(&note.commitment).unwrap();
        note.mark_inserted(ins.leaf_index, ins.path.clone());
        ledger.publish_root(tree.root()).await;

        let receipt = service
            .withdraw(&note, ins.path.clone(), tree.root(), [4u8; 32])
            .await
            .unwrap();
        assert_eq!(receipt.nullifier_hash, note.nullifier_hash().unwrap());

        let err = service
            .withdraw(&note, ins.path, tree.root(), [5u8; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::Ledger(LedgerError::NullifierSpent)));
        assert_eq!(err.class(), ErrorClass::Ledger);
    }

    #[tokio::test]
    async fn test_wrong_root_fails_before_submission() {
        let ledger = Arc::new(MockLedger::new());
        let service = WithdrawalService::new(MockProofEngine::new(), ledger.clone());

        let mut tree = MerkleTree::new(4).unwrap();
        let mut note = CommitmentVault::default().generate(1_000_000_000).unwrap();
        let ins = tree.insert(&note.commitment).unwrap();
        note.mark_inserted(ins.leaf_index, ins.path.clone());

        let err = service
            .withdraw(&note, ins.path, [1u8; 32], [4u8; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::Proof(ProofError::PathMismatch)));
        assert_eq!(err.class(), ErrorClass::Cryptographic);
        assert!(ledger.submitted().await.is_empty());
    }
}
