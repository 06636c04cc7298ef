//! StateStore: redb-backed persistence of setup outputs.
//!
//! One record per owner id; a newer setup for the same owner replaces the
//! older one. On-disk and in-memory backends are supported, the latter for
//! tests.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use scaleswap_core::Scope;

use crate::error::{StateError, StateResult};
use crate::record::SetupRecord;
use crate::tables::SETUPS;

/// File name of the database inside a state directory.
pub const DB_FILE: &str = "scaleswap.redb";

macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Open the store kept in a state directory, creating the directory.
    pub fn open_dir(dir: &Path) -> StateResult<Self> {
        std::fs::create_dir_all(dir).map_err(map_err!(Open))?;
        Self::open(&dir.join(DB_FILE))
    }

    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SETUPS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace the setup record of its owner.
    pub fn put_setup(&self, record: &SetupRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SETUPS).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            owner = %key,
            scale_set = %record.setup.new_scale_set_name,
            "setup stored"
        );
        Ok(())
    }

    pub fn get_setup(&self, owner_id: &str) -> StateResult<Option<SetupRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SETUPS).map_err(map_err!(Table))?;
        match table.get(owner_id).map_err(map_err!(Storage))? {
            Some(guard) => {
                let record = serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All stored setups, ordered by owner id.
    pub fn list_setups(&self) -> StateResult<Vec<SetupRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SETUPS).map_err(map_err!(Table))?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            records.push(serde_json::from_slice(value.value()).map_err(map_err!(Decode))?);
        }
        Ok(records)
    }

    /// The setup that created scale set `name` in `scope`, if still stored.
    pub fn find_by_scale_set(&self, scope: &Scope, name: &str) -> StateResult<Option<SetupRecord>> {
        Ok(self
            .list_setups()?
            .into_iter()
            .find(|record| record.created(scope, name)))
    }

    /// Remove an owner's record. Returns true if it existed.
    pub fn delete_setup(&self, owner_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SETUPS).map_err(map_err!(Table))?;
            existed = table.remove(owner_id).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(owner = %owner_id, existed, "setup removed");
        Ok(existed)
    }
}
