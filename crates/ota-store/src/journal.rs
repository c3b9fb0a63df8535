use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use ota_domain::{DeploymentDescriptor, DeploymentId, State};

use crate::error::StoreError;
use crate::kv::KvStore;

pub const STATE_DATA_SCHEMA_VERSION: u32 = 1;

const COMMITTED_KEY: &[u8] = b"journal:committed";
const UNCOMMITTED_KEY: &[u8] = b"journal:uncommitted";
const PROVIDES_KEY: &[u8] = b"journal:provides";

/// Everything needed to resume an in-flight deployment after a restart.
/// One instance is written per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateData {
    pub version: u32,
    pub deployment_id: DeploymentId,
    pub state: State,
    /// Consecutive re-entries into a state that does not permit looping.
    pub store_count: u32,
    pub update_info: Option<DeploymentDescriptor>,
    /// True when this record is a newer-schema rewrite of what is currently
    /// committed. Gates whether `load` may trust an uncommitted record that
    /// was never promoted.
    pub has_schema_update: bool,
}

impl StateData {
    pub fn new(deployment_id: DeploymentId, state: State) -> Self {
        StateData {
            version: STATE_DATA_SCHEMA_VERSION,
            deployment_id,
            state,
            store_count: 0,
            update_info: None,
            has_schema_update: false,
        }
    }
}

/// The persistent state-data journal. Writes go to the uncommitted slot
/// first; `commit_artifact_data` promotes it to the committed slot. This
/// gives crash recovery a consistent last-known-good value to fall back to
/// if the process dies mid-write.
pub struct StateDataJournal<K: KvStore> {
    store: Arc<K>,
}

impl<K: KvStore> StateDataJournal<K> {
    pub fn new(store: Arc<K>) -> Self {
        StateDataJournal { store }
    }

    /// Shadow-write the current transition into the uncommitted slot.
    pub async fn store(&self, data: &StateData) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(data)?;
        self.store.set(UNCOMMITTED_KEY, &bytes).await
    }

    /// Promote the uncommitted slot to committed. Called once a transition
    /// has fully taken effect (its state script/update-module hooks ran and
    /// returned) and it is now safe to treat as the new resume point.
    pub async fn commit_artifact_data(&self) -> Result<(), StoreError> {
        if let Some(bytes) = self.store.get(UNCOMMITTED_KEY).await? {
            self.store.set(COMMITTED_KEY, &bytes).await?;
            self.store.delete(UNCOMMITTED_KEY).await?;
        }
        Ok(())
    }

    /// Load the most trustworthy `StateData`:
    ///
    /// - Uncommitted slot for a *different* deployment than committed → the
    ///   uncommitted write is stale debris from a deployment that was
    ///   superseded before it could commit; discard it and trust committed.
    /// - Uncommitted slot present with `has_schema_update` set → trust it,
    ///   it is a newer-schema rewrite that has not been promoted yet.
    /// - Otherwise → trust committed (or `None`). A shadow-write that was
    ///   never promoted by `commit_artifact_data` is not yet a safe resume
    ///   point.
    pub async fn load(&self) -> Result<Option<StateData>, StoreError> {
        let uncommitted = self.read_slot(UNCOMMITTED_KEY).await?;
        let committed = self.read_slot(COMMITTED_KEY).await?;

        let chosen = match (uncommitted, committed) {
            (Some(u), Some(c)) if u.deployment_id != c.deployment_id => {
                warn!(
                    stale_deployment_id = %u.deployment_id,
                    trusted_deployment_id = %c.deployment_id,
                    "discarding stale uncommitted state data"
                );
                Some(c)
            }
            (Some(u), _) if u.has_schema_update => Some(u),
            (_, c) => c,
        };

        Ok(chosen.map(|d| self.migrate(d)))
    }

    async fn read_slot(&self, key: &[u8]) -> Result<Option<StateData>, StoreError> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Upgrade an older on-disk schema version in place. The only version
    /// today is 1, so this is currently a passthrough; kept as the seam
    /// future schema bumps hook into so loads never need a second code path.
    fn migrate(&self, data: StateData) -> StateData {
        if data.version == STATE_DATA_SCHEMA_VERSION {
            return data;
        }
        warn!(found = data.version, current = STATE_DATA_SCHEMA_VERSION, "migrating state data schema");
        StateData {
            version: STATE_DATA_SCHEMA_VERSION,
            ..data
        }
    }

    /// Clear both slots. Called once a deployment reaches `Idle` with
    /// nothing left to resume.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(COMMITTED_KEY).await?;
        self.store.delete(UNCOMMITTED_KEY).await?;
        Ok(())
    }

    /// The device's own rolling `provides` map, used for dependency checks
    /// against future offers. Written outside the commit protocol above: it tracks what
    /// the device currently is, not an in-flight deployment.
    pub async fn load_provides(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match self.store.get(PROVIDES_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(BTreeMap::new()),
        }
    }

    pub async fn save_provides(&self, provides: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(provides)?;
        self.store.set(PROVIDES_KEY, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKvStore;

    fn journal() -> StateDataJournal<MemoryKvStore> {
        StateDataJournal::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn store_then_commit_round_trips() {
        let j = journal();
        let data = StateData::new(DeploymentId::new("dep-1"), State::UpdateInstall);
        j.store(&data).await.unwrap();
        j.commit_artifact_data().await.unwrap();
        let loaded = j.load().await.unwrap().unwrap();
        assert_eq!(loaded.deployment_id, data.deployment_id);
        assert_eq!(loaded.state, State::UpdateInstall);
    }

    #[tokio::test]
    async fn uncommitted_without_commit_is_not_trusted_as_a_resume_point() {
        let j = journal();
        let data = StateData::new(DeploymentId::new("dep-1"), State::UpdateStore);
        j.store(&data).await.unwrap();
        assert!(j.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn uncommitted_schema_update_is_trusted_without_commit() {
        let j = journal();
        let mut data = StateData::new(DeploymentId::new("dep-1"), State::UpdateStore);
        data.has_schema_update = true;
        j.store(&data).await.unwrap();
        let loaded = j.load().await.unwrap().unwrap();
        assert_eq!(loaded.state, State::UpdateStore);
    }

    #[tokio::test]
    async fn schema_upgrade_write_leaves_older_committed_record_intact() {
        let j = journal();
        let committed = StateData::new(DeploymentId::new("dep-1"), State::UpdateInstall);
        j.store(&committed).await.unwrap();
        j.commit_artifact_data().await.unwrap();

        // A newer-schema rewrite of the same deployment, written but never
        // promoted (simulating a crash before `commit_artifact_data`).
        let mut upgraded = committed.clone();
        upgraded.has_schema_update = true;
        upgraded.store_count = 7;
        j.store(&upgraded).await.unwrap();

        let raw_committed = j.read_slot(COMMITTED_KEY).await.unwrap().unwrap();
        assert_eq!(raw_committed.store_count, 0);
        assert!(!raw_committed.has_schema_update);

        let loaded = j.load().await.unwrap().unwrap();
        assert_eq!(loaded.store_count, 7);

        j.commit_artifact_data().await.unwrap();
        let raw_committed = j.read_slot(COMMITTED_KEY).await.unwrap().unwrap();
        assert_eq!(raw_committed.store_count, 7);
    }

    #[tokio::test]
    async fn stale_uncommitted_id_falls_back_to_committed() {
        let j = journal();
        let committed = StateData::new(DeploymentId::new("dep-1"), State::Idle);
        j.store(&committed).await.unwrap();
        j.commit_artifact_data().await.unwrap();

        // Simulate a torn write: a later deployment's uncommitted slot for a
        // deployment that never got far enough to commit.
        let stale = StateData::new(DeploymentId::new("dep-2"), State::UpdateFetch);
        j.store(&stale).await.unwrap();

        let loaded = j.load().await.unwrap().unwrap();
        assert_eq!(loaded.deployment_id, committed.deployment_id);
    }

    #[tokio::test]
    async fn clear_removes_both_slots() {
        let j = journal();
        let data = StateData::new(DeploymentId::new("dep-1"), State::Idle);
        j.store(&data).await.unwrap();
        j.commit_artifact_data().await.unwrap();
        j.clear().await.unwrap();
        assert!(j.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn provides_round_trips() {
        let j = journal();
        let mut provides = BTreeMap::new();
        provides.insert("rootfs-image.version".to_string(), "1.0".to_string());
        j.save_provides(&provides).await.unwrap();
        assert_eq!(j.load_provides().await.unwrap(), provides);
    }
}
