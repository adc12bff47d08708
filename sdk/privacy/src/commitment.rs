//! Deposit Commitments
//!
//! ```text
//! commitment     = Poseidon(nullifier, secret)
//! nullifier_hash = Poseidon(nullifier, leaf_index, secret)
//! ```
//!
//! The commitment is published at deposit time. Only the holder of
//! `(nullifier, secret)` can later prove membership and publish the
//! nullifier hash that marks it spent.

use ark_bn254::Fr;
use rand::{CryptoRng, RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::denomination::DenominationSet;
use crate::error::PrivacyError;
use crate::hash::{self, Field};
use crate::note::Note;

/// A deposit commitment (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    pub fn from_field(f: Fr) -> Self {
        Self(hash::to_bytes(f))
    }

    pub fn to_field(&self) -> Fr {
        hash::from_bytes(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Commitment {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Creates notes and checks commitment openings.
///
/// The vault is the only place secret note material is drawn; it hands the
/// resulting [`Note`] to the caller, who keeps it until withdrawal.
#[derive(Debug, Clone, Default)]
pub struct CommitmentVault {
    denominations: DenominationSet,
}

impl CommitmentVault {
    pub fn new(denominations: DenominationSet) -> Self {
        Self { denominations }
    }

    pub fn denominations(&self) -> &DenominationSet {
        &self.denominations
    }

    /// Generate a fresh note from the OS random source.
    pub fn generate(&self, denomination: u64) -> Result<Note, PrivacyError> {
        self.generate_with_rng(denomination, &mut OsRng)
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(
        &self,
        denomination: u64,
        rng: &mut R,
    ) -> Result<Note, PrivacyError> {
        self.denominations.validate(denomination)?;

        let nullifier = random_field(rng)?;
        let secret = random_field(rng)?;
        let commitment = Self::commit(&nullifier, &secret);

        Ok(Note::new(nullifier, secret, commitment, denomination))
    }

    /// commitment = Poseidon(nullifier, secret)
    pub fn commit(nullifier: &Field, secret: &Field) -> Commitment {
        Commitment::from_field(hash::hash_fields([
            hash::from_bytes(nullifier),
            hash::from_bytes(secret),
        ]))
    }

    /// Recompute the commitment and compare without an early exit.
    pub fn verify(commitment: &Commitment, nullifier: &Field, secret: &Field) -> bool {
        let expected = Self::commit(nullifier, secret);
        expected.0.ct_eq(&commitment.0).into()
    }
}

fn random_field<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Field, PrivacyError> {
    let mut bytes = [0u8; 32];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|_| PrivacyError::Entropy)?;
    let field = hash::canonicalize(&bytes);
    bytes.zeroize();
    Ok(field)
}
