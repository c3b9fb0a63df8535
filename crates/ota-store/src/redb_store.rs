use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::kv::KvStore;

const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// Persistent [`KvStore`] backed by a redb database file. Survives process
/// restarts and reboots; this is the backend a real device runs with.
#[derive(Clone)]
pub struct RedbKvStore {
    db: Arc<Database>,
}

impl RedbKvStore {
    /// Open (or create) a redb database at `path`. Parent directories are
    /// created automatically.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        let db = Database::create(path).map_err(|e| StoreError::Internal(e.to_string()))?;

        let wtxn = db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
        wtxn.open_table(KV).map_err(|e| StoreError::Internal(e.to_string()))?;
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl KvStore for RedbKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let table = rtxn
            .open_table(KV)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        match table
            .get(key)
            .map_err(|e| StoreError::Internal(e.to_string()))?
        {
            Some(guard) => Ok(Some(guard.value().to_vec())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let wtxn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let mut table = wtxn
                .open_table(KV)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            table
                .insert(key, value)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let wtxn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        {
            let mut table = wtxn
                .open_table(KV)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let rtxn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let table = rtxn
            .open_table(KV)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| StoreError::Internal(e.to_string()))?
        {
            let (k, v) = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
            if k.value().starts_with(prefix) {
                out.push((k.value().to_vec(), v.value().to_vec()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RedbKvStore {
        RedbKvStore::open(&dir.path().join("state.redb")).unwrap()
    }

    #[tokio::test]
    async fn set_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.set(b"k", b"v").await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.redb");
        {
            let store = RedbKvStore::open(&path).unwrap();
            store.set(b"k", b"v").await.unwrap();
        }
        {
            let store = RedbKvStore::open(&path).unwrap();
            assert_eq!(store.get(b"k").await.unwrap(), Some(b"v".to_vec()));
        }
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.set(b"k", b"v").await.unwrap();
        store.delete(b"k").await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_prefix_is_ordered_and_filtered() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.set(b"a/1", b"1").await.unwrap();
        store.set(b"a/2", b"2").await.unwrap();
        store.set(b"b/1", b"3").await.unwrap();
        let got = store.scan_prefix(b"a/").await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, b"a/1");
        assert_eq!(got[1].0, b"a/2");
    }
}
