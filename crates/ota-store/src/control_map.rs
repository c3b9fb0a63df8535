use std::sync::Arc;

use ota_domain::ControlMap;

use crate::error::StoreError;
use crate::kv::KvStore;

const ACTIVE_KEY: &[u8] = b"control_map_active";
const EXPIRED_KEY: &[u8] = b"control_map_expired";

/// Persists the control-map pool's active and expired sub-pools, so they can
/// be rehydrated on restart. The pool itself (`ota-control`) owns the voting logic and
/// in-memory sub-pool split; this repository only durably round-trips
/// whatever snapshot the pool hands it.
pub struct ControlMapRepository<K: KvStore> {
    store: Arc<K>,
}

impl<K: KvStore> ControlMapRepository<K> {
    pub fn new(store: Arc<K>) -> Self {
        ControlMapRepository { store }
    }

    pub async fn save_active(&self, maps: &[ControlMap]) -> Result<(), StoreError> {
        self.store.set(ACTIVE_KEY, &serde_json::to_vec(maps)?).await
    }

    pub async fn load_active(&self) -> Result<Vec<ControlMap>, StoreError> {
        self.load(ACTIVE_KEY).await
    }

    pub async fn save_expired(&self, maps: &[ControlMap]) -> Result<(), StoreError> {
        self.store.set(EXPIRED_KEY, &serde_json::to_vec(maps)?).await
    }

    pub async fn load_expired(&self) -> Result<Vec<ControlMap>, StoreError> {
        self.load(EXPIRED_KEY).await
    }

    async fn load(&self, key: &[u8]) -> Result<Vec<ControlMap>, StoreError> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKvStore;
    use chrono::{Duration, Utc};
    use ota_domain::DeploymentId;
    use std::collections::BTreeMap;

    fn sample_map(id: &str) -> ControlMap {
        ControlMap {
            id: DeploymentId::new(id),
            priority: 0,
            expiry_time: Utc::now() + Duration::hours(1),
            states: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn active_round_trips() {
        let repo = ControlMapRepository::new(Arc::new(MemoryKvStore::new()));
        let maps = vec![sample_map("m1"), sample_map("m2")];
        repo.save_active(&maps).await.unwrap();
        assert_eq!(repo.load_active().await.unwrap(), maps);
        assert!(repo.load_expired().await.unwrap().is_empty());
    }
}
