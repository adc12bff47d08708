//! Persisted wallet layout.
//!
//! | key                   | value                          |
//! |-----------------------|--------------------------------|
//! | `notes`               | `Vec<Note>`                    |
//! | `tree`                | `TreeSnapshot`                 |
//! | `pending_withdrawals` | `Vec<PendingWithdrawal>`       |
//! | `spent_nullifiers`    | `Vec<NullifierHash>`           |
//! | `pending_batch`       | `AccountantSnapshot`           |
//! | `stealth_keys`        | meta-address + sealed secrets  |
//!
//! Every value is JSON. Stealth secrets are sealed under a passphrase (see
//! [`super::sealed`]); the meta-address next to them stays readable so the
//! wallet can show its address without unlocking.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use shroud_privacy::{Commitment, MetaAddress, Note, NullifierHash, StealthKeys, TreeSnapshot};

use super::sealed::{self, SealParams, SealedSecret};
use super::{KeyValueStore, StoreError};
use crate::accountant::AccountantSnapshot;

const KEY_NOTES: &str = "notes";
const KEY_TREE: &str = "tree";
const KEY_PENDING_WITHDRAWALS: &str = "pending_withdrawals";
const KEY_SPENT_NULLIFIERS: &str = "spent_nullifiers";
const KEY_PENDING_BATCH: &str = "pending_batch";
const KEY_STEALTH_KEYS: &str = "stealth_keys";

/// A withdrawal that was proven but not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWithdrawal {
    pub commitment: Commitment,
    #[serde(with = "hex::serde")]
    pub recipient: [u8; 32],
    pub created_at: u64,
    /// Ledger transaction id once submitted.
    pub tx: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct StoredStealthKeys {
    meta: MetaAddress,
    /// `scan_secret || spend_secret`
    sealed: SealedSecret,
}

pub struct WalletStore<S> {
    store: S,
    seal_params: SealParams,
}

impl<S: KeyValueStore> WalletStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            seal_params: SealParams::default(),
        }
    }

    /// KDF cost used when sealing new secrets.
    pub fn with_seal_params(mut self, params: SealParams) -> Self {
        self.seal_params = params;
        self
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key)? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(key, &bytes)
    }

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    pub fn load_notes(&self) -> Result<Vec<Note>, StoreError> {
        Ok(self.read(KEY_NOTES)?.unwrap_or_default())
    }

    pub fn save_notes(&self, notes: &[Note]) -> Result<(), StoreError> {
        self.write(KEY_NOTES, &notes)
    }

    /// Append or replace (by commitment) a note.
    pub fn add_note(&self, note: Note) -> Result<usize, StoreError> {
        let mut notes = self.load_notes()?;
        match notes.iter().position(|n| n.commitment == note.commitment) {
            Some(i) => notes[i] = note,
            None => notes.push(note),
        }
        self.save_notes(&notes)?;
        Ok(notes.len())
    }

    pub fn remove_note(&self, commitment: &Commitment) -> Result<bool, StoreError> {
        let mut notes = self.load_notes()?;
        let before = notes.len();
        notes.retain(|n| &n.commitment != commitment);
        if notes.len() == before {
            return Ok(false);
        }
        self.save_notes(&notes)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Tree
    // ------------------------------------------------------------------

    pub fn load_tree(&self) -> Result<Option<TreeSnapshot>, StoreError> {
        self.read(KEY_TREE)
    }

    pub fn save_tree(&self, snapshot: &TreeSnapshot) -> Result<(), StoreError> {
        debug!(leaf_count = snapshot.leaf_count, "saving tree snapshot");
        self.write(KEY_TREE, snapshot)
    }

    // ------------------------------------------------------------------
    // Pending withdrawals
    // ------------------------------------------------------------------

    pub fn pending_withdrawals(&self) -> Result<Vec<PendingWithdrawal>, StoreError> {
        Ok(self.read(KEY_PENDING_WITHDRAWALS)?.unwrap_or_default())
    }

    pub fn push_pending_withdrawal(&self, pending: PendingWithdrawal) -> Result<(), StoreError> {
        let mut queue = self.pending_withdrawals()?;
        queue.retain(|p| p.commitment != pending.commitment);
        queue.push(pending);
        self.write(KEY_PENDING_WITHDRAWALS, &queue)
    }

    pub fn remove_pending_withdrawal(
        &self,
        commitment: &Commitment,
    ) -> Result<Option<PendingWithdrawal>, StoreError> {
        let mut queue = self.pending_withdrawals()?;
        let Some(i) = queue.iter().position(|p| &p.commitment == commitment) else {
            return Ok(None);
        };
        let removed = queue.remove(i);
        self.write(KEY_PENDING_WITHDRAWALS, &queue)?;
        Ok(Some(removed))
    }

    // ------------------------------------------------------------------
    // Spent nullifiers
    // ------------------------------------------------------------------

    pub fn is_spent(&self, nullifier_hash: &NullifierHash) -> Result<bool, StoreError> {
        let spent: Vec<NullifierHash> = self.read(KEY_SPENT_NULLIFIERS)?.unwrap_or_default();
        Ok(spent.contains(nullifier_hash))
    }

    /// Returns false if it was already marked.
    pub fn mark_spent(&self, nullifier_hash: NullifierHash) -> Result<bool, StoreError> {
        let mut spent: Vec<NullifierHash> = self.read(KEY_SPENT_NULLIFIERS)?.unwrap_or_default();
        if spent.contains(&nullifier_hash) {
            return Ok(false);
        }
        spent.push(nullifier_hash);
        self.write(KEY_SPENT_NULLIFIERS, &spent)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Pending batch
    // ------------------------------------------------------------------

    pub fn load_pending_batch(&self) -> Result<Option<AccountantSnapshot>, StoreError> {
        self.read(KEY_PENDING_BATCH)
    }

    pub fn save_pending_batch(&self, snapshot: &AccountantSnapshot) -> Result<(), StoreError> {
        self.write(KEY_PENDING_BATCH, snapshot)
    }

    // ------------------------------------------------------------------
    // Stealth keys
    // ------------------------------------------------------------------

    pub fn has_stealth_keys(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(KEY_STEALTH_KEYS)?.is_some())
    }

    /// Public half of the stored keys; needs no passphrase.
    pub fn load_meta_address(&self) -> Result<Option<MetaAddress>, StoreError> {
        Ok(self
            .read::<StoredStealthKeys>(KEY_STEALTH_KEYS)?
            .map(|stored| stored.meta))
    }

    pub fn load_stealth_keys(&self, passphrase: &str) -> Result<Option<StealthKeys>, StoreError> {
        let Some(stored) = self.read::<StoredStealthKeys>(KEY_STEALTH_KEYS)? else {
            return Ok(None);
        };
        let plaintext = sealed::open(&stored.sealed, passphrase, KEY_STEALTH_KEYS)?;
        let corrupt = |reason: &str| StoreError::Corrupt {
            key: KEY_STEALTH_KEYS.to_string(),
            reason: reason.to_string(),
        };
        if plaintext.len() != 64 {
            return Err(corrupt("expected 64 bytes of key material"));
        }

        let mut scan = [0u8; 32];
        let mut spend = [0u8; 32];
        scan.copy_from_slice(&plaintext[..32]);
        spend.copy_from_slice(&plaintext[32..]);
        let keys = StealthKeys::from_secrets(&scan, &spend);
        scan.zeroize();
        spend.zeroize();

        if keys.meta_address() != stored.meta {
            return Err(corrupt("secrets do not match the stored meta-address"));
        }
        Ok(Some(keys))
    }

    pub fn save_stealth_keys(&self, keys: &StealthKeys, passphrase: &str) -> Result<(), StoreError> {
        let (mut scan, mut spend) = keys.export_secrets();
        let mut plaintext = [0u8; 64];
        plaintext[..32].copy_from_slice(&scan);
        plaintext[32..].copy_from_slice(&spend);
        scan.zeroize();
        spend.zeroize();

        let sealed = sealed::seal(&plaintext, passphrase, KEY_STEALTH_KEYS, self.seal_params);
        plaintext.zeroize();

        let stored = StoredStealthKeys {
            meta: keys.meta_address(),
            sealed: sealed?,
        };
        debug!("saving sealed stealth keys");
        self.write(KEY_STEALTH_KEYS, &stored)
    }
}
