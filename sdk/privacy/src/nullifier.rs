//! Nullifier hashes
//!
//! ```text
//! nullifier_hash = Poseidon(nullifier, leaf_index, secret)
//! ```
//!
//! Published at withdrawal to mark a note spent. The inputs and their order
//! are the public-input contract of the withdrawal circuit.

use ark_bn254::Fr;
use serde::{Deserialize, Serialize};

use crate::hash::{self, Field};

/// Public tag of a spent note (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NullifierHash(pub [u8; 32]);

impl NullifierHash {
    pub fn from_field(f: Fr) -> Self {
        Self(hash::to_bytes(f))
    }

    pub fn to_field(&self) -> Fr {
        hash::from_bytes(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for NullifierHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub fn nullifier_hash(nullifier: &Field, leaf_index: u32, secret: &Field) -> NullifierHash {
    NullifierHash::from_field(hash::hash_fields([
        hash::from_bytes(nullifier),
        Fr::from(leaf_index as u64),
        hash::from_bytes(secret),
    ]))
}
