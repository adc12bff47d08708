//! Withdrawal Proofs
//!
//! Interface to the external proving system.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Withdrawal Proof                             │
//! │                                                                  │
//! │  Public Inputs:                                                  │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ • root            (a recent accumulator root)              │ │
//! │  │ • nullifier_hash  (H(nullifier, leaf_index, secret))       │ │
//! │  │ • recipient       (stealth address receiving the funds)    │ │
//! │  │ • denomination                                             │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │                                                                  │
//! │  Private Witness:                                                │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ • nullifier, secret                                        │ │
//! │  │ • leaf_index and authentication path                       │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use shroud_privacy::{
    Commitment, CommitmentVault, ErrorClass, Field, MerklePath, Note, NullifierHash,
    nullifier_hash,
};

// ============================================================================
// Proof Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub root: Field,
    pub nullifier_hash: NullifierHash,
    pub recipient: [u8; 32],
    pub denomination: u64,
}

impl PublicInputs {
    fn digest(&self, domain: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(self.root);
        hasher.update(self.nullifier_hash.as_bytes());
        hasher.update(self.recipient);
        hasher.update(self.denomination.to_le_bytes());
        hasher.finalize().into()
    }
}

/// Opaque proof bytes, as produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBlob {
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

/// Everything the prover needs. Secrets are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WithdrawalWitness {
    nullifier: Field,
    secret: Field,
    #[zeroize(skip)]
    pub commitment: Commitment,
    #[zeroize(skip)]
    pub leaf_index: u32,
    #[zeroize(skip)]
    pub path: MerklePath,
    #[zeroize(skip)]
    pub root: Field,
    #[zeroize(skip)]
    pub recipient: [u8; 32],
    #[zeroize(skip)]
    pub denomination: u64,
}

impl WithdrawalWitness {
    /// Build a witness for an inserted note against `root`.
    pub fn from_note(note: &Note, root: Field, recipient: [u8; 32]) -> Result<Self, ProofError> {
        let leaf_index = note.leaf_index.ok_or(ProofError::NoteNotInserted)?;
        let path = note.merkle_proof.clone().ok_or(ProofError::NoteNotInserted)?;
        let (nullifier, secret) = note.witness_secrets();
        Ok(Self {
            nullifier: *nullifier,
            secret: *secret,
            commitment: note.commitment,
            leaf_index,
            path,
            root,
            recipient,
            denomination: note.denomination,
        })
    }

    /// Replace the stored path, e.g. after later inserts moved the root.
    pub fn with_path(mut self, path: MerklePath, root: Field) -> Self {
        self.path = path;
        self.root = root;
        self
    }

    pub fn nullifier_hash(&self) -> NullifierHash {
        nullifier_hash(&self.nullifier, self.leaf_index, &self.secret)
    }

    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs {
            root: self.root,
            nullifier_hash: self.nullifier_hash(),
            recipient: self.recipient,
            denomination: self.denomination,
        }
    }
}

impl fmt::Debug for WithdrawalWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithdrawalWitness")
            .field("commitment", &self.commitment.to_hex())
            .field("leaf_index", &self.leaf_index)
            .field("denomination", &self.denomination)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("note has no tree position")]
    NoteNotInserted,

    #[error("witness does not open the commitment")]
    CommitmentMismatch,

    #[error("authentication path does not lead to the root")]
    PathMismatch,

    #[error("proof rejected")]
    Invalid,

    #[error("proving engine failed: {0}")]
    Engine(String),
}

impl ProofError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProofError::NoteNotInserted => ErrorClass::Protocol,
            ProofError::Engine(_) => ErrorClass::Connection,
            _ => ErrorClass::Cryptographic,
        }
    }
}

// ============================================================================
// Engine Trait
// ============================================================================

#[async_trait]
pub trait ProofEngine: Send + Sync {
    async fn generate_proof(
        &self,
        witness: &WithdrawalWitness,
    ) -> Result<(ProofBlob, PublicInputs), ProofError>;

    async fn verify_proof(
        &self,
        proof: &ProofBlob,
        inputs: &PublicInputs,
    ) -> Result<bool, ProofError>;
}

// ============================================================================
// Mock Engine
// ============================================================================

const MOCK_DOMAIN: &[u8] = b"shroud-mock-withdraw-v1";

/// Checks the witness the way the circuit would, then "proves" by hashing
/// the public inputs.
#[derive(Debug, Default, Clone)]
pub struct MockProofEngine;

impl MockProofEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProofEngine for MockProofEngine {
    async fn generate_proof(
        &self,
        witness: &WithdrawalWitness,
    ) -> Result<(ProofBlob, PublicInputs), ProofError> {
        if !CommitmentVault::verify(&witness.commitment, &witness.nullifier, &witness.secret) {
            return Err(ProofError::CommitmentMismatch);
        }
        if witness.path.leaf_index != witness.leaf_index
            || !witness.path.verify(&witness.commitment, &witness.root)
        {
            return Err(ProofError::PathMismatch);
        }

        let inputs = witness.public_inputs();
        let proof = ProofBlob {
            bytes: inputs.digest(MOCK_DOMAIN).to_vec(),
        };
        debug!(leaf_index = witness.leaf_index, "mock withdrawal proof generated");
        Ok((proof, inputs))
    }

    async fn verify_proof(
        &self,
        proof: &ProofBlob,
        inputs: &PublicInputs,
    ) -> Result<bool, ProofError> {
        Ok(proof.bytes == inputs.digest(MOCK_DOMAIN))
    }
}
