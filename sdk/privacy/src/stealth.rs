//! Stealth Addresses (DKSAP)
//!
//! Dual-key stealth addresses over the Ed25519 group.
//!
//! ```text
//! Recipient:  scan (s, S = s·G), spend (b, B = b·G)   meta-address = (S, B)
//! Sender:     r random, R = r·G, ss = r·S
//!             P = B + H(ss)·G                         (one-time address)
//! Recipient:  ss = s·R, p = b + H(ss)                 (P = p·G)
//!
//! H(ss)      = SHA256("stealthsol_v1" || ss) mod l
//! commitment = SHA256("stealthsol_commitment_v1" || R || S || B || P)
//! ```
//!
//! Only the scan secret is needed to recognise a payment; the spend secret
//! is needed to spend it. A [`ViewKey`] carries exactly that scan-only
//! capability.
//!
//! Keys can be restored from a BIP-39 phrase:
//!
//! ```text
//! seed  = BIP39-seed(phrase, passphrase)
//! scan  = SHA256("stealthsol/scan"  || seed) mod l
//! spend = SHA256("stealthsol/spend" || seed) mod l
//! ```

use std::fmt;
use std::str::FromStr;

use bip39::Mnemonic;
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
};
use rand::{CryptoRng, RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::PrivacyError;

pub const DOMAIN_SEPARATOR: &[u8] = b"stealthsol_v1";
pub const COMMITMENT_DOMAIN: &[u8] = b"stealthsol_commitment_v1";

const META_ADDRESS_PREFIX: &str = "stealth:";
const VIEW_KEY_PREFIX: &str = "view:";
const MNEMONIC_SCAN_DOMAIN: &[u8] = b"stealthsol/scan";
const MNEMONIC_SPEND_DOMAIN: &[u8] = b"stealthsol/spend";
/// 256 bits of entropy, 24 words.
const MNEMONIC_ENTROPY_BYTES: usize = 32;

/// Secret scalar bytes, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct SecretScalar([u8; 32]);

impl SecretScalar {
    fn from_scalar(scalar: &Scalar) -> Self {
        Self(scalar.to_bytes())
    }

    fn to_scalar(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.0)
    }
}

/// A recipient's public identity: scan and spend public keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaAddress {
    pub scan_pubkey: [u8; 32],
    pub spend_pubkey: [u8; 32],
}

impl MetaAddress {
    pub fn new(scan_pubkey: [u8; 32], spend_pubkey: [u8; 32]) -> Self {
        Self {
            scan_pubkey,
            spend_pubkey,
        }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.scan_pubkey);
        out[32..].copy_from_slice(&self.spend_pubkey);
        out
    }
}

impl fmt::Display for MetaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{META_ADDRESS_PREFIX}{}",
            bs58::encode(self.to_bytes()).into_string()
        )
    }
}

impl FromStr for MetaAddress {
    type Err = PrivacyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(META_ADDRESS_PREFIX)
            .ok_or_else(|| PrivacyError::InvalidMetaAddress("missing 'stealth:' prefix".into()))?;
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| PrivacyError::InvalidMetaAddress(e.to_string()))?;
        if bytes.len() != 64 {
            return Err(PrivacyError::InvalidMetaAddress(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut scan_pubkey = [0u8; 32];
        let mut spend_pubkey = [0u8; 32];
        scan_pubkey.copy_from_slice(&bytes[..32]);
        spend_pubkey.copy_from_slice(&bytes[32..]);

        decompress(&scan_pubkey)?;
        decompress(&spend_pubkey)?;

        Ok(Self {
            scan_pubkey,
            spend_pubkey,
        })
    }
}

/// Published with every stealth payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealthPayment {
    pub ephemeral_pubkey: [u8; 32],
    pub stealth_address: [u8; 32],
    pub stealth_commitment: [u8; 32],
}

impl StealthPayment {
    /// Check the commitment binds this payment to `meta`.
    pub fn verify_commitment(&self, meta: &MetaAddress) -> bool {
        let expected = stealth_commitment(
            &self.ephemeral_pubkey,
            &meta.scan_pubkey,
            &meta.spend_pubkey,
            &self.stealth_address,
        );
        expected.ct_eq(&self.stealth_commitment).into()
    }
}

/// Sender-side result of [`derive`].
pub struct StealthDerivation {
    pub payment: StealthPayment,
    ephemeral_secret: SecretScalar,
    shared_secret: SecretScalar,
}

impl StealthDerivation {
    pub fn ephemeral_secret(&self) -> [u8; 32] {
        self.ephemeral_secret.0
    }

    /// Compressed `r·S`.
    pub fn shared_secret(&self) -> [u8; 32] {
        self.shared_secret.0
    }
}

/// A recovered one-time keypair: `address = secret·G`.
pub struct StealthKeypair {
    pub address: [u8; 32],
    secret: SecretScalar,
}

impl StealthKeypair {
    pub fn secret_scalar(&self) -> [u8; 32] {
        self.secret.0
    }
}

impl fmt::Debug for StealthKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StealthKeypair")
            .field("address", &bs58::encode(self.address).into_string())
            .finish_non_exhaustive()
    }
}

/// A recipient's long-term scan and spend keys.
///
/// Deliberately not `Clone`.
pub struct StealthKeys {
    scan_secret: SecretScalar,
    spend_secret: SecretScalar,
    meta: MetaAddress,
}

impl StealthKeys {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let scan = Scalar::random(rng);
        let spend = Scalar::random(rng);
        Self::from_scalars(&scan, &spend)
    }

    /// Derive keys from a BIP-39 phrase and optional passphrase.
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, PrivacyError> {
        let mnemonic: Mnemonic = phrase
            .parse()
            .map_err(|e: bip39::Error| PrivacyError::InvalidMnemonic(e.to_string()))?;
        let mut seed = mnemonic.to_seed(passphrase);

        let mut scan = seeded_secret(MNEMONIC_SCAN_DOMAIN, &seed);
        let mut spend = seeded_secret(MNEMONIC_SPEND_DOMAIN, &seed);
        seed.zeroize();

        let keys = Self::from_secrets(&scan, &spend);
        scan.zeroize();
        spend.zeroize();
        Ok(keys)
    }

    /// Fresh keys together with the 24-word phrase that restores them.
    pub fn generate_with_mnemonic() -> Result<(Self, String), PrivacyError> {
        Self::generate_with_mnemonic_rng(&mut OsRng)
    }

    pub fn generate_with_mnemonic_rng<R: RngCore + CryptoRng>(
        rng: &mut R,
    ) -> Result<(Self, String), PrivacyError> {
        let mut entropy = [0u8; MNEMONIC_ENTROPY_BYTES];
        rng.try_fill_bytes(&mut entropy)
            .map_err(|_| PrivacyError::Entropy)?;
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| PrivacyError::InvalidMnemonic(e.to_string()));
        entropy.zeroize();

        let phrase = mnemonic?.to_string();
        let keys = Self::from_mnemonic(&phrase, "")?;
        Ok((keys, phrase))
    }

    pub fn from_secrets(scan_secret: &[u8; 32], spend_secret: &[u8; 32]) -> Self {
        Self::from_scalars(
            &Scalar::from_bytes_mod_order(*scan_secret),
            &Scalar::from_bytes_mod_order(*spend_secret),
        )
    }

    fn from_scalars(scan: &Scalar, spend: &Scalar) -> Self {
        let meta = MetaAddress {
            scan_pubkey: EdwardsPoint::mul_base(scan).compress().to_bytes(),
            spend_pubkey: EdwardsPoint::mul_base(spend).compress().to_bytes(),
        };
        Self {
            scan_secret: SecretScalar::from_scalar(scan),
            spend_secret: SecretScalar::from_scalar(spend),
            meta,
        }
    }

    pub fn meta_address(&self) -> MetaAddress {
        self.meta
    }

    /// Raw secrets for backup. Handle with care.
    pub fn export_secrets(&self) -> ([u8; 32], [u8; 32]) {
        (self.scan_secret.0, self.spend_secret.0)
    }

    pub fn scan_secret(&self) -> [u8; 32] {
        self.scan_secret.0
    }

    /// Scan-only capability: detects payments, cannot spend them.
    pub fn view_key(&self) -> ViewKey {
        ViewKey {
            scan_secret: self.scan_secret.clone(),
            spend_pubkey: self.meta.spend_pubkey,
        }
    }

    pub fn recover(&self, ephemeral_pubkey: &[u8; 32]) -> Result<StealthKeypair, PrivacyError> {
        recover(&self.scan_secret.0, &self.spend_secret.0, ephemeral_pubkey)
    }

    /// Returns the spending keypair if `payment_address` was derived for us.
    pub fn scan(
        &self,
        ephemeral_pubkey: &[u8; 32],
        payment_address: &[u8; 32],
    ) -> Option<StealthKeypair> {
        let keypair = self.recover(ephemeral_pubkey).ok()?;
        if bool::from(keypair.address.ct_eq(payment_address)) {
            Some(keypair)
        } else {
            None
        }
    }
}

/// Scan secret plus spend public key.
///
/// Text form is `view:<hex scan secret>:<hex spend pubkey>`. `Debug` hides
/// the secret; use [`ViewKey::encode`] to export it.
#[derive(Clone)]
pub struct ViewKey {
    scan_secret: SecretScalar,
    spend_pubkey: [u8; 32],
}

impl ViewKey {
    pub fn spend_pubkey(&self) -> [u8; 32] {
        self.spend_pubkey
    }

    /// True if `payment_address` was derived for the owner of this key.
    pub fn check(&self, ephemeral_pubkey: &[u8; 32], payment_address: &[u8; 32]) -> bool {
        check_payment(
            &self.scan_secret.0,
            &self.spend_pubkey,
            ephemeral_pubkey,
            payment_address,
        )
    }

    pub fn encode(&self) -> String {
        format!(
            "{VIEW_KEY_PREFIX}{}:{}",
            hex::encode(self.scan_secret.0),
            hex::encode(self.spend_pubkey)
        )
    }
}

impl fmt::Debug for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewKey")
            .field("spend_pubkey", &bs58::encode(self.spend_pubkey).into_string())
            .finish_non_exhaustive()
    }
}

impl FromStr for ViewKey {
    type Err = PrivacyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| PrivacyError::InvalidViewKey(reason.to_string());
        let body = s
            .strip_prefix(VIEW_KEY_PREFIX)
            .ok_or_else(|| invalid("missing 'view:' prefix"))?;
        let (scan_hex, spend_hex) = body
            .split_once(':')
            .ok_or_else(|| invalid("expected <scan secret>:<spend pubkey>"))?;

        let mut scan_secret = SecretScalar([0u8; 32]);
        hex::decode_to_slice(scan_hex, &mut scan_secret.0)
            .map_err(|_| invalid("scan secret must be 32 hex-encoded bytes"))?;
        let mut spend_pubkey = [0u8; 32];
        hex::decode_to_slice(spend_hex, &mut spend_pubkey)
            .map_err(|_| invalid("spend pubkey must be 32 hex-encoded bytes"))?;
        decompress(&spend_pubkey)?;

        Ok(Self {
            scan_secret,
            spend_pubkey,
        })
    }
}

/// Derive a one-time address for `meta` with a fresh ephemeral key.
pub fn derive(meta: &MetaAddress) -> Result<StealthDerivation, PrivacyError> {
    derive_with_rng(meta, &mut OsRng)
}

pub fn derive_with_rng<R: RngCore + CryptoRng>(
    meta: &MetaAddress,
    rng: &mut R,
) -> Result<StealthDerivation, PrivacyError> {
    let scan_point = decompress(&meta.scan_pubkey)?;
    let spend_point = decompress(&meta.spend_pubkey)?;

    let ephemeral = Scalar::random(rng);
    let ephemeral_pubkey = EdwardsPoint::mul_base(&ephemeral).compress().to_bytes();

    let shared = (ephemeral * scan_point).compress().to_bytes();
    let hs = hash_to_scalar(&shared);

    let stealth_address = (spend_point + EdwardsPoint::mul_base(&hs))
        .compress()
        .to_bytes();
    let stealth_commitment = stealth_commitment(
        &ephemeral_pubkey,
        &meta.scan_pubkey,
        &meta.spend_pubkey,
        &stealth_address,
    );

    Ok(StealthDerivation {
        payment: StealthPayment {
            ephemeral_pubkey,
            stealth_address,
            stealth_commitment,
        },
        ephemeral_secret: SecretScalar::from_scalar(&ephemeral),
        shared_secret: SecretScalar(shared),
    })
}

/// Reconstruct the one-time keypair: `p = b + H(s·R)`.
pub fn recover(
    scan_secret: &[u8; 32],
    spend_secret: &[u8; 32],
    ephemeral_pubkey: &[u8; 32],
) -> Result<StealthKeypair, PrivacyError> {
    let ephemeral_point = decompress(ephemeral_pubkey)?;
    let scan = SecretScalar(*scan_secret).to_scalar();
    let spend = SecretScalar(*spend_secret).to_scalar();

    let mut shared = (scan * ephemeral_point).compress().to_bytes();
    let hs = hash_to_scalar(&shared);
    shared.zeroize();

    let one_time = spend + hs;
    let address = EdwardsPoint::mul_base(&one_time).compress().to_bytes();

    Ok(StealthKeypair {
        address,
        secret: SecretScalar::from_scalar(&one_time),
    })
}

/// View-only check: needs the scan secret and the spend *public* key.
pub fn check_payment(
    scan_secret: &[u8; 32],
    spend_pubkey: &[u8; 32],
    ephemeral_pubkey: &[u8; 32],
    payment_address: &[u8; 32],
) -> bool {
    let (Ok(ephemeral_point), Ok(spend_point)) =
        (decompress(ephemeral_pubkey), decompress(spend_pubkey))
    else {
        return false;
    };
    let scan = SecretScalar(*scan_secret).to_scalar();

    let mut shared = (scan * ephemeral_point).compress().to_bytes();
    let hs = hash_to_scalar(&shared);
    shared.zeroize();

    let expected = (spend_point + EdwardsPoint::mul_base(&hs))
        .compress()
        .to_bytes();
    expected.ct_eq(payment_address).into()
}

pub fn stealth_commitment(
    ephemeral_pubkey: &[u8; 32],
    scan_pubkey: &[u8; 32],
    spend_pubkey: &[u8; 32],
    stealth_address: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update(ephemeral_pubkey);
    hasher.update(scan_pubkey);
    hasher.update(spend_pubkey);
    hasher.update(stealth_address);
    hasher.finalize().into()
}

fn seeded_secret(domain: &[u8], seed: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(seed);
    let mut bytes: [u8; 32] = hasher.finalize().into();
    let secret = Scalar::from_bytes_mod_order(bytes).to_bytes();
    bytes.zeroize();
    secret
}

fn hash_to_scalar(data: &[u8]) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_SEPARATOR);
    hasher.update(data);
    let mut bytes: [u8; 32] = hasher.finalize().into();
    let scalar = Scalar::from_bytes_mod_order(bytes);
    bytes.zeroize();
    scalar
}

/// Decompress and reject the identity and other small-order points.
fn decompress(bytes: &[u8; 32]) -> Result<EdwardsPoint, PrivacyError> {
    let point = CompressedEdwardsY(*bytes)
        .decompress()
        .ok_or(PrivacyError::InvalidPoint)?;
    if point.is_small_order() {
        return Err(PrivacyError::InvalidPoint);
    }
    Ok(point)
}
