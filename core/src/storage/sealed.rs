//! Passphrase encryption for key material at rest.
//!
//! ```text
//! key        = Argon2id(passphrase, salt, m_cost, t_cost, p_cost) -> 32 bytes
//! ciphertext = XChaCha20-Poly1305(key, nonce, plaintext, aad = version || label)
//! ```
//!
//! The KDF parameters travel with the record so a later change of defaults
//! still opens older wallets.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::StoreError;

pub const SEALED_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealParams {
    /// Memory in KiB
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for SealParams {
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl SealParams {
    fn kdf(&self) -> Result<Argon2<'static>, StoreError> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| StoreError::Encode {
                key: "kdf".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// An encrypted value as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub version: u8,
    pub params: SealParams,
    #[serde(with = "hex::serde")]
    pub salt: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

fn derive_key(
    params: &SealParams,
    passphrase: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; 32]>, StoreError> {
    let mut key = Zeroizing::new([0u8; 32]);
    params
        .kdf()?
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| StoreError::Encode {
            key: "kdf".to_string(),
            reason: e.to_string(),
        })?;
    Ok(key)
}

fn aad(version: u8, label: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + label.len());
    aad.push(version);
    aad.extend_from_slice(label.as_bytes());
    aad
}

/// Encrypt `plaintext` under `passphrase`, bound to `label`.
pub fn seal(
    plaintext: &[u8],
    passphrase: &str,
    label: &str,
    params: SealParams,
) -> Result<SealedSecret, StoreError> {
    let mut salt = vec![0u8; SALT_LEN];
    let mut nonce = vec![0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(&params, passphrase, &salt)?;
    let cipher = XChaCha20Poly1305::new((&*key).into());
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad(SEALED_VERSION, label),
            },
        )
        .map_err(|_| StoreError::Encode {
            key: label.to_string(),
            reason: "encryption failed".to_string(),
        })?;

    Ok(SealedSecret {
        version: SEALED_VERSION,
        params,
        salt,
        nonce,
        ciphertext,
    })
}

/// Decrypt a record written by [`seal`] with the same `label`.
pub fn open(
    sealed: &SealedSecret,
    passphrase: &str,
    label: &str,
) -> Result<Zeroizing<Vec<u8>>, StoreError> {
    if sealed.version != SEALED_VERSION {
        return Err(StoreError::Corrupt {
            key: label.to_string(),
            reason: format!("unsupported sealed version {}", sealed.version),
        });
    }
    if sealed.nonce.len() != NONCE_LEN {
        return Err(StoreError::Corrupt {
            key: label.to_string(),
            reason: "bad nonce length".to_string(),
        });
    }

    let key = derive_key(&sealed.params, passphrase, &sealed.salt)?;
    let cipher = XChaCha20Poly1305::new((&*key).into());
    cipher
        .decrypt(
            XNonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad: &aad(sealed.version, label),
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| StoreError::WrongPassphrase {
            key: label.to_string(),
        })
}
