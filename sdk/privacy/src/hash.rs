//! Poseidon hashing over the BN254 scalar field.
//!
//! Every hash in the pool (commitments, nullifier hashes, Merkle nodes) uses
//! the circom parameter set, so values match what the withdrawal circuit and
//! the on-chain tree compute.
//!
//! ```text
//! Field:    BN254 Fr (254 bits)
//! Width:    t = inputs + 1, capacity element state[0] = 0
//! Output:   state[0] after the permutation
//! Encoding: 32 bytes, little-endian, canonical (< modulus)
//! ```

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};

/// A field element in its 32-byte little-endian encoding.
pub type Field = [u8; 32];

/// Circom Poseidon of `N` elements.
///
/// Parameters exist for 1 to 12 inputs; the pool only hashes two or three.
pub fn hash_fields<const N: usize>(inputs: [Fr; N]) -> Fr {
    let mut hasher = Poseidon::<Fr>::new_circom(N).expect("Invalid Poseidon width");
    hasher.hash(&inputs).expect("Input count matches width")
}

/// Hash two encoded elements (Merkle node, commitment).
pub fn hash_pair(left: &Field, right: &Field) -> Field {
    to_bytes(hash_fields([from_bytes(left), from_bytes(right)]))
}

pub fn to_bytes(f: Fr) -> Field {
    let bytes = f.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

pub fn from_bytes(bytes: &Field) -> Fr {
    Fr::from_le_bytes_mod_order(bytes)
}

/// Reduce arbitrary bytes into the field and return the canonical encoding.
pub fn canonicalize(bytes: &[u8; 32]) -> Field {
    to_bytes(from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_be_hex(s: &str) -> Field {
        let mut bytes: Field = hex::decode(s).unwrap().try_into().unwrap();
        bytes.reverse();
        bytes
    }

    #[test]
    fn test_hash_pair_deterministic() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_eq!(hash_pair(&a, &b), hash_pair(&a, &b));
        assert_ne!(hash_pair(&a, &b), hash_pair(&b, &a), "order matters");
    }

    #[test]
    fn test_hash_pair_matches_circom() {
        // circom poseidon([0, 0]), the first empty-subtree digest
        let expected =
            from_be_hex("2098f5fb9e239eab3ceac3f27b81e481dc3124d55ffed523a839ee8446b64864");
        assert_eq!(hash_pair(&[0u8; 32], &[0u8; 32]), expected);
    }

    #[test]
    fn test_hash_fields_matches_circom_small_inputs() {
        // circom poseidon([1, 2])
        let expected =
            from_be_hex("115cc0f5e7d690413df64c6b9662e9cf2a3617f2743245519e19607a4417189a");
        assert_eq!(to_bytes(hash_fields([Fr::from(1u64), Fr::from(2u64)])), expected);
    }

    #[test]
    fn test_canonicalize_reduces_above_modulus() {
        let max = [0xffu8; 32];
        let reduced = canonicalize(&max);
        assert_ne!(reduced, max);
        // already canonical values are fixed points
        assert_eq!(canonicalize(&reduced), reduced);
    }

    #[test]
    fn test_round_trip_small_value() {
        let f = Fr::from(42u64);
        assert_eq!(from_bytes(&to_bytes(f)), f);
        assert_eq!(to_bytes(f)[0], 42);
    }
}
