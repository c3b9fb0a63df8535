use std::sync::Arc;

use ota_domain::AuthToken;

use crate::error::StoreError;
use crate::kv::KvStore;

const TOKEN_KEY: &[u8] = b"auth_token";
const INVALIDATOR_KEY: &[u8] = b"auth_token_cache_invalidator";

/// The cache invalidator fingerprint: `server_url || "___" || tenant_token`.
/// Persisted alongside the token so a later run can tell whether the cached
/// token was issued under the currently configured server/tenant pairing.
pub fn fingerprint(server_url: &str, tenant_token: &str) -> String {
    format!("{server_url}___{tenant_token}")
}

/// Persists the current auth token plus the cache-invalidator fingerprint it
/// was issued under.
pub struct AuthTokenRepository<K: KvStore> {
    store: Arc<K>,
}

impl<K: KvStore> AuthTokenRepository<K> {
    pub fn new(store: Arc<K>) -> Self {
        AuthTokenRepository { store }
    }

    pub async fn save(&self, token: &AuthToken, fingerprint: &str) -> Result<(), StoreError> {
        self.store.set(TOKEN_KEY, &token.0).await?;
        self.store.set(INVALIDATOR_KEY, fingerprint.as_bytes()).await
    }

    pub async fn load(&self) -> Result<Option<AuthToken>, StoreError> {
        Ok(self.store.get(TOKEN_KEY).await?.map(AuthToken))
    }

    pub async fn cache_invalidator(&self) -> Result<Option<String>, StoreError> {
        match self.store.get(INVALIDATOR_KEY).await? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|e| StoreError::Internal(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(TOKEN_KEY).await?;
        self.store.delete(INVALIDATOR_KEY).await
    }

    /// Startup check: if a cache invalidator is already persisted and no
    /// longer matches `fingerprint`, the cached token was issued under a
    /// different server/tenant pairing and must be dropped before the state
    /// machine polls. Returns whether the token was cleared.
    pub async fn invalidate_if_fingerprint_changed(&self, fingerprint: &str) -> Result<bool, StoreError> {
        match self.cache_invalidator().await? {
            Some(persisted) if persisted != fingerprint => {
                self.store.delete(TOKEN_KEY).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKvStore;

    #[tokio::test]
    async fn save_sets_token_and_invalidator() {
        let repo = AuthTokenRepository::new(Arc::new(MemoryKvStore::new()));
        let fp = fingerprint("https://server.example", "tenant-a");
        repo.save(&AuthToken(b"token-a".to_vec()), &fp).await.unwrap();

        assert_eq!(repo.load().await.unwrap().unwrap().0, b"token-a");
        assert_eq!(repo.cache_invalidator().await.unwrap().unwrap(), fp);
    }

    #[tokio::test]
    async fn clear_removes_token_and_invalidator() {
        let repo = AuthTokenRepository::new(Arc::new(MemoryKvStore::new()));
        let fp = fingerprint("https://server.example", "tenant-a");
        repo.save(&AuthToken(b"token-a".to_vec()), &fp).await.unwrap();
        repo.clear().await.unwrap();
        assert!(repo.load().await.unwrap().is_none());
        assert!(repo.cache_invalidator().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unchanged_fingerprint_keeps_cached_token() {
        let repo = AuthTokenRepository::new(Arc::new(MemoryKvStore::new()));
        let fp = fingerprint("https://server.example", "tenant-a");
        repo.save(&AuthToken(b"token-a".to_vec()), &fp).await.unwrap();

        let cleared = repo.invalidate_if_fingerprint_changed(&fp).await.unwrap();
        assert!(!cleared);
        assert_eq!(repo.load().await.unwrap().unwrap().0, b"token-a");
    }

    #[tokio::test]
    async fn changed_fingerprint_clears_cached_token() {
        let repo = AuthTokenRepository::new(Arc::new(MemoryKvStore::new()));
        let fp = fingerprint("https://server.example", "tenant-a");
        repo.save(&AuthToken(b"token-a".to_vec()), &fp).await.unwrap();

        let new_fp = fingerprint("https://server.example", "tenant-b");
        let cleared = repo.invalidate_if_fingerprint_changed(&new_fp).await.unwrap();
        assert!(cleared);
        assert!(repo.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_persisted_invalidator_is_not_treated_as_a_change() {
        let repo = AuthTokenRepository::new(Arc::new(MemoryKvStore::new()));
        let fp = fingerprint("https://server.example", "tenant-a");
        let cleared = repo.invalidate_if_fingerprint_changed(&fp).await.unwrap();
        assert!(!cleared);
    }
}
