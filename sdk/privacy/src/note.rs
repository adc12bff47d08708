//! Deposit Notes
//!
//! A Note is the holder's private record of one fixed-denomination deposit.
//!
//! ```text
//! Note = {
//!     nullifier:    [u8; 32],   // secret
//!     secret:       [u8; 32],   // secret
//!     commitment:   [u8; 32],   // Poseidon(nullifier, secret), public
//!     denomination: u64,
//!     leaf_index:   Option<u32>,       // set once the commitment is in the tree
//!     merkle_proof: Option<MerklePath>,
//!     created_at:   u64,               // unix seconds
//! }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::commitment::{Commitment, CommitmentVault};
use crate::error::PrivacyError;
use crate::hash::Field;
use crate::merkle::MerklePath;
use crate::nullifier::{NullifierHash, nullifier_hash};

#[derive(Clone, Serialize, Deserialize)]
pub struct Note {
    nullifier: Field,
    secret: Field,
    pub commitment: Commitment,
    pub denomination: u64,
    pub leaf_index: Option<u32>,
    pub merkle_proof: Option<MerklePath>,
    pub created_at: u64,
}

impl Note {
    pub(crate) fn new(
        nullifier: Field,
        secret: Field,
        commitment: Commitment,
        denomination: u64,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            nullifier,
            secret,
            commitment,
            denomination,
            leaf_index: None,
            merkle_proof: None,
            created_at,
        }
    }

    /// Rebuild a note from backed-up secrets. The commitment is recomputed.
    pub fn from_secrets(nullifier: Field, secret: Field, denomination: u64) -> Self {
        let commitment = CommitmentVault::commit(&nullifier, &secret);
        Self::new(nullifier, secret, commitment, denomination)
    }

    /// Record the tree position returned by the accumulator.
    pub fn mark_inserted(&mut self, leaf_index: u32, path: MerklePath) {
        self.leaf_index = Some(leaf_index);
        self.merkle_proof = Some(path);
    }

    pub fn is_inserted(&self) -> bool {
        self.leaf_index.is_some()
    }

    /// The value published at withdrawal.
    pub fn nullifier_hash(&self) -> Result<NullifierHash, PrivacyError> {
        let leaf_index = self.leaf_index.ok_or(PrivacyError::NoteNotInserted)?;
        Ok(nullifier_hash(&self.nullifier, leaf_index, &self.secret))
    }

    /// Private witness handed to the withdrawal proof step.
    pub fn witness_secrets(&self) -> (&Field, &Field) {
        (&self.nullifier, &self.secret)
    }

    /// Whether the stored commitment still opens to the stored secrets.
    pub fn is_consistent(&self) -> bool {
        CommitmentVault::verify(&self.commitment, &self.nullifier, &self.secret)
    }
}

impl std::fmt::Debug for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Note")
            .field("commitment", &self.commitment.to_hex())
            .field("denomination", &self.denomination)
            .field("leaf_index", &self.leaf_index)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Drop for Note {
    fn drop(&mut self) {
        self.nullifier.zeroize();
        self.secret.zeroize();
    }
}
