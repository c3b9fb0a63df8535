use async_trait::async_trait;

use crate::error::StoreError;

/// The only persistence abstraction the core depends on: a transactional,
/// ordered, byte-keyed/byte-valued store, with no backend prescribed.
/// Everything above this layer (the state-data journal, the
/// control-map repository, the auth-token repository) is built purely in
/// terms of `get`/`set`/`delete`/`scan_prefix`.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    async fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Ordered entries whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}
