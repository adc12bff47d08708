//! Key-value persistence.
//!
//! The wallet only needs `get`/`set`/`delete` over opaque bytes; everything
//! structured lives in [`wallet::WalletStore`] on top.

pub mod db;
pub mod memory;
pub mod sealed;
pub mod wallet;

use thiserror::Error;

use shroud_privacy::ErrorClass;

pub use db::RocksStore;
pub use memory::MemoryStore;
pub use sealed::{SealParams, SealedSecret};
pub use wallet::{PendingWithdrawal, WalletStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("failed to encode `{key}`: {reason}")]
    Encode { key: String, reason: String },

    #[error("stored value for `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cannot decrypt `{key}`: wrong passphrase or tampered record")]
    WrongPassphrase { key: String },
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::Backend(_) => ErrorClass::Connection,
            StoreError::Encode { .. } | StoreError::Corrupt { .. } => ErrorClass::Protocol,
            StoreError::WrongPassphrase { .. } => ErrorClass::Cryptographic,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Decoupling logic from the db
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }
}
