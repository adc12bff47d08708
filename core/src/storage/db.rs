use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;

use super::{KeyValueStore, StoreError};

const CF_WALLET: &str = "wallet";

/// A thread-safe wrapper around RocksDB.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    /// Opens the database at the specified path, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = vec![ColumnFamilyDescriptor::new(CF_WALLET, Options::default())];

        let db = DB::open_cf_descriptors(&opts, path, families)
            .map_err(|e| StoreError::Backend(format!("failed to open RocksDB: {e}")))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_WALLET)
            .ok_or_else(|| StoreError::Backend("wallet column family missing".into()))
    }
}

impl KeyValueStore for RocksStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get_cf(self.cf()?, key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db.put_cf(self.cf()?, key, value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db.delete_cf(self.cf()?, key)?;
        Ok(())
    }
}
