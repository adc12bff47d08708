//! RSA Blind Signatures
//!
//! ```text
//! m        = SHA256(commitment) mod n
//! blinded  = m · r^e mod n            (client, r random, gcd(r, n) = 1)
//! blindSig = blinded^d mod n          (coordinator)
//! sig      = blindSig · r^-1 mod n    (client)
//! check    : sig^e mod n == m
//! ```
//!
//! The coordinator never sees `m`, so it cannot link the signature it
//! issued to the commitment later submitted with it.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use shroud_privacy::ErrorClass;

/// Bound on rejection sampling; a valid modulus needs one draw almost always.
const MAX_BLINDING_ATTEMPTS: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlindError {
    #[error("coordinator key rejected: {0}")]
    InvalidKey(&'static str),

    #[error("modulus has {bits} bits, at least {min} required")]
    WeakModulus { bits: u64, min: u64 },

    #[error("value is not reduced modulo n")]
    OutOfRange,

    #[error("could not sample a blinding factor coprime to n")]
    BlindingFactor,

    #[error("blinding factor has no inverse modulo n")]
    NotInvertible,

    #[error("unblinded signature failed verification")]
    VerificationFailed,

    #[error("invalid prime factors")]
    InvalidPrimes,
}

impl BlindError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Cryptographic
    }
}

/// Coordinator public key `(n, e)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    n: BigUint,
    e: BigUint,
}

impl RsaPublicKey {
    pub fn new(n: BigUint, e: BigUint) -> Self {
        Self { n, e }
    }

    pub fn from_be_bytes(n: &[u8], e: &[u8]) -> Self {
        Self::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn e(&self) -> &BigUint {
        &self.e
    }

    pub fn bits(&self) -> u64 {
        self.n.bits()
    }

    /// Byte length of the modulus; signatures are left-padded to it.
    pub fn size(&self) -> usize {
        self.bits().div_ceil(8) as usize
    }

    /// Reject keys that are malformed or too small to be safe.
    pub fn validate(&self, min_bits: u64) -> Result<(), BlindError> {
        if self.n.is_even() {
            return Err(BlindError::InvalidKey("modulus must be odd"));
        }
        if self.e.is_even() {
            return Err(BlindError::InvalidKey("exponent must be odd"));
        }
        if self.e < BigUint::from(3u32) || self.e >= self.n {
            return Err(BlindError::InvalidKey("exponent out of range"));
        }
        let bits = self.bits();
        if bits < min_bits {
            return Err(BlindError::WeakModulus {
                bits,
                min: min_bits,
            });
        }
        Ok(())
    }

    /// `SHA256(commitment) mod n`
    pub fn message_representative(&self, commitment: &[u8]) -> BigUint {
        let digest = Sha256::digest(commitment);
        BigUint::from_bytes_be(&digest) % &self.n
    }

    /// `m · r^e mod n`
    pub fn blind(&self, m: &BigUint, r: &BlindingFactor) -> Result<BigUint, BlindError> {
        if m >= &self.n {
            return Err(BlindError::OutOfRange);
        }
        let r = r.value();
        Ok((m * r.modpow(&self.e, &self.n)) % &self.n)
    }

    /// `s' · r^-1 mod n`
    pub fn unblind(&self, blind_sig: &BigUint, r: &BlindingFactor) -> Result<BigUint, BlindError> {
        if blind_sig >= &self.n {
            return Err(BlindError::OutOfRange);
        }
        let r_inv = mod_inverse(&r.value(), &self.n).ok_or(BlindError::NotInvertible)?;
        Ok((blind_sig * r_inv) % &self.n)
    }

    /// `sig^e mod n == m`
    pub fn verify(&self, sig: &BigUint, m: &BigUint) -> bool {
        sig < &self.n && &sig.modpow(&self.e, &self.n) == m
    }

    /// Big-endian, left-padded to the modulus size.
    pub fn to_fixed_bytes(&self, value: &BigUint) -> Vec<u8> {
        let bytes = value.to_bytes_be();
        let size = self.size();
        if bytes.len() >= size {
            return bytes;
        }
        let mut out = vec![0u8; size - bytes.len()];
        out.extend_from_slice(&bytes);
        out
    }
}

/// Random `r` in `[2, n)` with `gcd(r, n) = 1`, kept as zeroizing bytes.
pub struct BlindingFactor {
    bytes: Zeroizing<Vec<u8>>,
}

impl BlindingFactor {
    pub fn generate(key: &RsaPublicKey) -> Result<Self, BlindError> {
        Self::generate_with_rng(key, &mut OsRng)
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(
        key: &RsaPublicKey,
        rng: &mut R,
    ) -> Result<Self, BlindError> {
        let low = BigUint::from(2u32);
        if key.n <= low {
            return Err(BlindError::InvalidKey("modulus too small"));
        }
        for _ in 0..MAX_BLINDING_ATTEMPTS {
            let candidate = rng.gen_biguint_range(&low, &key.n);
            if candidate.gcd(&key.n).is_one() {
                return Ok(Self {
                    bytes: Zeroizing::new(candidate.to_bytes_be()),
                });
            }
        }
        Err(BlindError::BlindingFactor)
    }

    fn value(&self) -> BigUint {
        BigUint::from_bytes_be(&self.bytes)
    }
}

impl std::fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlindingFactor(..)")
    }
}

/// Coordinator-side signing key.
pub struct RsaSigningKey {
    public: RsaPublicKey,
    d: BigUint,
}

impl RsaSigningKey {
    pub fn from_primes(p: &BigUint, q: &BigUint, e: &BigUint) -> Result<Self, BlindError> {
        let one = BigUint::one();
        if p <= &one || q <= &one || p == q {
            return Err(BlindError::InvalidPrimes);
        }
        let n = p * q;
        let phi = (p - &one) * (q - &one);
        let d = mod_inverse(e, &phi).ok_or(BlindError::InvalidPrimes)?;
        Ok(Self {
            public: RsaPublicKey::new(n, e.clone()),
            d,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// `blinded^d mod n`
    pub fn sign_blinded(&self, blinded: &BigUint) -> Result<BigUint, BlindError> {
        if blinded >= &self.public.n {
            return Err(BlindError::OutOfRange);
        }
        Ok(blinded.modpow(&self.d, &self.public.n))
    }
}

/// Extended Euclid; `None` when `gcd(a, n) != 1`.
pub fn mod_inverse(a: &BigUint, n: &BigUint) -> Option<BigUint> {
    if n.is_zero() {
        return None;
    }
    let a = BigInt::from(a.clone());
    let n = BigInt::from(n.clone());
    let egcd = a.extended_gcd(&n);
    if !egcd.gcd.is_one() {
        return None;
    }
    egcd.x.mod_floor(&n).to_biguint()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 2^521 - 1 and 2^607 - 1 are Mersenne primes; neither is congruent to
    /// 1 mod 65537, so e = 65537 is invertible mod phi.
    pub(crate) fn test_signing_key() -> RsaSigningKey {
        let one = BigUint::one();
        let p = (&one << 521usize) - &one;
        let q = (&one << 607usize) - &one;
        RsaSigningKey::from_primes(&p, &q, &BigUint::from(65537u32)).unwrap()
    }

    #[test]
    fn test_blind_sign_unblind_verify() {
        let signer = test_signing_key();
        let pk = signer.public_key();
        pk.validate(1024).unwrap();

        let m = pk.message_representative(&[7u8; 32]);
        let r = BlindingFactor::generate(pk).unwrap();

        let blinded = pk.blind(&m, &r).unwrap();
        assert_ne!(blinded, m, "blinding must mask the message");

        let blind_sig = signer.sign_blinded(&blinded).unwrap();
        let sig = pk.unblind(&blind_sig, &r).unwrap();
        assert!(pk.verify(&sig, &m));
    }

    #[test]
    fn test_wrong_blinding_factor_fails() {
        let signer = test_signing_key();
        let pk = signer.public_key();
        let m = pk.message_representative(b"commitment");

        let r = BlindingFactor::generate(pk).unwrap();
        let other = BlindingFactor::generate(pk).unwrap();

        let blind_sig = signer.sign_blinded(&pk.blind(&m, &r).unwrap()).unwrap();
        let sig = pk.unblind(&blind_sig, &other).unwrap();
        assert!(!pk.verify(&sig, &m));
    }

    #[test]
    fn test_signature_does_not_verify_other_message() {
        let signer = test_signing_key();
        let pk = signer.public_key();
        let m1 = pk.message_representative(b"a");
        let m2 = pk.message_representative(b"b");

        let r = BlindingFactor::generate(pk).unwrap();
        let sig = pk
            .unblind(&signer.sign_blinded(&pk.blind(&m1, &r).unwrap()).unwrap(), &r)
            .unwrap();
        assert!(!pk.verify(&sig, &m2));
    }

    #[test]
    fn test_validate_rejects_bad_keys() {
        let signer = test_signing_key();
        let n = signer.public_key().n().clone();

        let even_e = RsaPublicKey::new(n.clone(), BigUint::from(65536u32));
        assert!(matches!(even_e.validate(1024), Err(BlindError::InvalidKey(_))));

        let tiny_e = RsaPublicKey::new(n.clone(), BigUint::one());
        assert!(matches!(tiny_e.validate(1024), Err(BlindError::InvalidKey(_))));

        let even_n = RsaPublicKey::new(&n + 1u32, BigUint::from(65537u32));
        assert!(matches!(even_n.validate(1024), Err(BlindError::InvalidKey(_))));

        let weak = signer.public_key().validate(2048).unwrap_err();
        assert_eq!(weak, BlindError::WeakModulus { bits: 1128, min: 2048 });
    }

    #[test]
    fn test_mod_inverse() {
        let n = BigUint::from(97u32);
        let a = BigUint::from(35u32);
        let inv = mod_inverse(&a, &n).unwrap();
        assert_eq!((a * inv) % &n, BigUint::one());

        assert_eq!(mod_inverse(&BigUint::from(6u32), &BigUint::from(9u32)), None);
    }

    #[test]
    fn test_blinding_factor_is_coprime_and_in_range() {
        let pk = RsaPublicKey::new(BigUint::from(3u32 * 5 * 7 * 11 * 13), BigUint::from(7u32));
        for _ in 0..50 {
            let r = BlindingFactor::generate(&pk).unwrap();
            let v = r.value();
            assert!(v >= BigUint::from(2u32) && &v < pk.n());
            assert!(v.gcd(pk.n()).is_one());
        }
    }

    #[test]
    fn test_fixed_bytes_padding() {
        let signer = test_signing_key();
        let pk = signer.public_key();
        let small = BigUint::from(5u32);
        let bytes = pk.to_fixed_bytes(&small);
        assert_eq!(bytes.len(), pk.size());
        assert_eq!(BigUint::from_bytes_be(&bytes), small);
    }
}
