//! Shroud Privacy SDK
//!
//! Fixed-denomination shielded pool primitives.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Deposit / Withdraw                        │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌────────────────────┐ │
//! │  │ CommitmentVault│ │ MerkleAccumulator│  │ StealthAddress     │ │
//! │  │ (nullifier,  │─▶│ (leaf index,     │  │ (one-time receive  │ │
//! │  │  secret)     │  │  inclusion path) │  │  address)          │ │
//! │  └──────────────┘  └──────────────────┘  └────────────────────┘ │
//! │         │                   │                      │            │
//! │         ▼                   ▼                      ▼            │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Withdrawal proof (external engine)          │   │
//! │  │  • commitment = H(nullifier, secret) is in the tree      │   │
//! │  │  • nullifier_hash = H(nullifier, leaf_index, secret)     │   │
//! │  │  • funds go to a stealth address                         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod denomination;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod note;
pub mod nullifier;
pub mod stealth;

pub use commitment::{Commitment, CommitmentVault};
pub use denomination::{DEFAULT_DENOMINATIONS, DenominationSet};
pub use error::{ErrorClass, PrivacyError};
pub use hash::Field;
pub use merkle::{
    DEFAULT_TREE_DEPTH, Insertion, MAX_TREE_DEPTH, MerklePath, MerkleTree, RootHistory,
    TreeSnapshot,
};
pub use note::Note;
pub use nullifier::{NullifierHash, nullifier_hash};
pub use stealth::{
    MetaAddress, StealthDerivation, StealthKeypair, StealthKeys, StealthPayment, ViewKey,
    check_payment,
};
