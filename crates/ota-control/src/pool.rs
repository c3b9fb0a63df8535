use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Notify, RwLock};

use ota_domain::{ControlMap, ControlMapAction, DeploymentId};

use crate::vote::{effective_action, strongest};

type BoundaryKey = (DeploymentId, i64, String);

#[derive(Default)]
struct Inner {
    active: Vec<ControlMap>,
    expired: Vec<ControlMap>,
    activated_at: HashMap<BoundaryKey, DateTime<Utc>>,
    executed: HashSet<BoundaryKey>,
}

/// The control-map pool. Holds every control map the device has
/// received, split into an active and an expired sub-pool, and answers
/// `query_and_update` with the single strongest vote across both.
pub struct ControlMapPool {
    inner: RwLock<Inner>,
    notify: Notify,
}

impl Default for ControlMapPool {
    fn default() -> Self {
        ControlMapPool {
            inner: RwLock::new(Inner::default()),
            notify: Notify::new(),
        }
    }
}

impl ControlMapPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves to the next time any map is inserted, deleted, or otherwise
    /// mutated. `ControlMapPause` waits on this (race it against a timeout)
    /// so a newly-arrived map can cancel a pause early.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub async fn insert(&self, map: ControlMap) {
        let mut inner = self.inner.write().await;
        let key = map.key();
        inner.active.retain(|m| m.key() != key);
        inner.expired.retain(|m| m.key() != key);
        inner.active.push(map);
        drop(inner);
        self.notify.notify_waiters();
    }

    pub async fn delete_all_priorities(&self, id: &DeploymentId) {
        let mut inner = self.inner.write().await;
        inner.active.retain(|m| &m.id != id);
        inner.expired.retain(|m| &m.id != id);
        inner.activated_at.retain(|(mid, _, _), _| mid != id);
        inner.executed.retain(|(mid, _, _)| mid != id);
        drop(inner);
        self.notify.notify_waiters();
    }

    pub async fn get(&self, id: &DeploymentId, priority: i64) -> Option<ControlMap> {
        let inner = self.inner.read().await;
        inner
            .active
            .iter()
            .chain(inner.expired.iter())
            .find(|m| m.id == *id && m.priority == priority)
            .cloned()
    }

    /// Move every active map whose `expiry_time` has passed into the
    /// expired sub-pool. Called periodically alongside `next_half_time`
    /// refresh scheduling, not implicitly from `query_and_update` — queries
    /// treat expiry as a pure function of `now` regardless of which list a
    /// map currently sits in.
    pub async fn clear_expired(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        let (still_active, newly_expired): (Vec<_>, Vec<_>) =
            inner.active.drain(..).partition(|m| !m.is_expired(now));
        inner.active = still_active;
        inner.expired.extend(newly_expired);
    }

    /// Earliest half-life refresh point across all active maps: the
    /// midpoint between `now` and each map's `expiry_time`. The driver loop
    /// schedules a control-map re-fetch at this point so maps get renewed
    /// well before they lapse.
    pub async fn next_half_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().await;
        inner
            .active
            .iter()
            .filter(|m| !m.is_expired(now))
            .map(|m| now + (m.expiry_time - now) / 2)
            .min()
    }

    /// The core voting operation: resolve the strongest action
    /// any map casts for `boundary`, promoting `on_action_executed` once a
    /// vote's `action_timeout_secs` elapses.
    pub async fn query_and_update(&self, now: DateTime<Utc>, boundary: &str) -> ControlMapAction {
        let mut inner = self.inner.write().await;
        let snapshot: Vec<ControlMap> = inner
            .active
            .iter()
            .chain(inner.expired.iter())
            .cloned()
            .collect();

        let mut votes = Vec::new();
        for map in &snapshot {
            let Some(spec) = map.states.get(boundary) else { continue };
            let key: BoundaryKey = (map.id.clone(), map.priority, boundary.to_string());

            if inner.executed.contains(&key) {
                votes.push(spec.on_action_executed.unwrap_or(spec.action));
                continue;
            }

            let Some(vote) = effective_action(map, boundary, now) else { continue };
            let mut action = vote.action();

            if let Some(timeout_secs) = spec.action_timeout_secs {
                let activated = *inner.activated_at.entry(key.clone()).or_insert(now);
                if now - activated >= Duration::seconds(timeout_secs) {
                    action = spec.on_action_executed.unwrap_or(action);
                    inner.executed.insert(key.clone());
                }
            } else {
                inner.activated_at.entry(key.clone()).or_insert(now);
            }

            votes.push(action);
        }

        strongest(votes)
    }

    /// Explicit acknowledgement that the engine has acted on the current
    /// vote for `(id, priority, boundary)`. From this point queries return
    /// `on_action_executed` (if set) regardless of the timeout.
    pub async fn acknowledge(&self, id: &DeploymentId, priority: i64, boundary: &str) {
        let mut inner = self.inner.write().await;
        inner
            .executed
            .insert((id.clone(), priority, boundary.to_string()));
    }

    /// Replace the pool's contents with a persisted snapshot, re-anchoring
    /// any map that has already lapsed to `now + boot_expiration` so it gets
    /// a fresh grace window to be refreshed from the server rather than
    /// being dropped outright.
    pub async fn rehydrate(
        &self,
        persisted_active: Vec<ControlMap>,
        persisted_expired: Vec<ControlMap>,
        now: DateTime<Utc>,
        boot_expiration: StdDuration,
    ) {
        let boot_expiration = Duration::from_std(boot_expiration).unwrap_or(Duration::zero());
        let mut active = Vec::new();
        let mut expired = Vec::new();
        for mut map in persisted_active.into_iter().chain(persisted_expired) {
            if map.is_expired(now) {
                map.expiry_time = now + boot_expiration;
            }
            if map.is_expired(now) {
                expired.push(map);
            } else {
                active.push(map);
            }
        }

        let mut inner = self.inner.write().await;
        inner.active = active;
        inner.expired = expired;
        inner.activated_at.clear();
        inner.executed.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    pub async fn snapshot(&self) -> (Vec<ControlMap>, Vec<ControlMap>) {
        let inner = self.inner.read().await;
        (inner.active.clone(), inner.expired.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_domain::StateActionSpec;
    use std::collections::BTreeMap;

    fn map(id: &str, priority: i64, action: ControlMapAction, expiry: DateTime<Utc>) -> ControlMap {
        let mut states = BTreeMap::new();
        states.insert(
            "ArtifactInstall_Enter".to_string(),
            StateActionSpec {
                action,
                on_map_expire: ControlMapAction::Continue,
                on_action_executed: None,
                action_timeout_secs: None,
            },
        );
        ControlMap {
            id: DeploymentId::new(id),
            priority,
            expiry_time: expiry,
            states,
        }
    }

    #[tokio::test]
    async fn insert_then_query_returns_vote() {
        let pool = ControlMapPool::new();
        let now = Utc::now();
        pool.insert(map("dep-1", 0, ControlMapAction::Pause, now + Duration::hours(1)))
            .await;
        let action = pool.query_and_update(now, "ArtifactInstall_Enter").await;
        assert_eq!(action, ControlMapAction::Pause);
    }

    #[tokio::test]
    async fn higher_priority_fail_wins_over_pause() {
        let pool = ControlMapPool::new();
        let now = Utc::now();
        pool.insert(map("dep-1", 0, ControlMapAction::Pause, now + Duration::hours(1)))
            .await;
        pool.insert(map("dep-2", 1, ControlMapAction::Fail, now + Duration::hours(1)))
            .await;
        let action = pool.query_and_update(now, "ArtifactInstall_Enter").await;
        assert_eq!(action, ControlMapAction::Fail);
    }

    #[tokio::test]
    async fn delete_all_priorities_removes_every_entry_for_id() {
        let pool = ControlMapPool::new();
        let now = Utc::now();
        pool.insert(map("dep-1", 0, ControlMapAction::Pause, now + Duration::hours(1)))
            .await;
        pool.insert(map("dep-1", 1, ControlMapAction::Fail, now + Duration::hours(1)))
            .await;
        pool.delete_all_priorities(&DeploymentId::new("dep-1")).await;
        let action = pool.query_and_update(now, "ArtifactInstall_Enter").await;
        assert_eq!(action, ControlMapAction::Continue);
    }

    #[tokio::test]
    async fn clear_expired_moves_lapsed_maps() {
        let pool = ControlMapPool::new();
        let now = Utc::now();
        pool.insert(map("dep-1", 0, ControlMapAction::Pause, now - Duration::seconds(1)))
            .await;
        pool.clear_expired(now).await;
        let (active, expired) = pool.snapshot().await;
        assert!(active.is_empty());
        assert_eq!(expired.len(), 1);
    }

    #[tokio::test]
    async fn rehydrate_extends_lapsed_maps_by_boot_expiration() {
        let pool = ControlMapPool::new();
        let now = Utc::now();
        let lapsed = map("dep-1", 0, ControlMapAction::Pause, now - Duration::hours(1));
        pool.rehydrate(vec![lapsed], vec![], now, StdDuration::from_secs(600))
            .await;
        let (active, expired) = pool.snapshot().await;
        assert_eq!(active.len(), 1);
        assert!(expired.is_empty());
        assert!(active[0].expiry_time > now);
    }

    #[tokio::test]
    async fn action_timeout_promotes_to_on_action_executed() {
        let pool = ControlMapPool::new();
        let now = Utc::now();
        let mut states = BTreeMap::new();
        states.insert(
            "ArtifactInstall_Enter".to_string(),
            StateActionSpec {
                action: ControlMapAction::Pause,
                on_map_expire: ControlMapAction::Continue,
                on_action_executed: Some(ControlMapAction::ForceContinue),
                action_timeout_secs: Some(5),
            },
        );
        pool.insert(ControlMap {
            id: DeploymentId::new("dep-1"),
            priority: 0,
            expiry_time: now + Duration::hours(1),
            states,
        })
        .await;

        let first = pool.query_and_update(now, "ArtifactInstall_Enter").await;
        assert_eq!(first, ControlMapAction::Pause);

        let later = pool
            .query_and_update(now + Duration::seconds(10), "ArtifactInstall_Enter")
            .await;
        assert_eq!(later, ControlMapAction::ForceContinue);
    }

    #[tokio::test]
    async fn next_half_time_is_midpoint_of_nearest_active_map() {
        let pool = ControlMapPool::new();
        let now = Utc::now();
        pool.insert(map("dep-1", 0, ControlMapAction::Continue, now + Duration::hours(2)))
            .await;
        let half = pool.next_half_time(now).await.unwrap();
        let expected = now + Duration::hours(1);
        assert!((half - expected).num_seconds().abs() < 2);
    }
}
