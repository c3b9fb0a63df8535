use chrono::{DateTime, Utc};

use ota_domain::{ControlMap, ControlMapAction};

/// A single map's vote for one state boundary, tagged with whether the map
/// itself was active or expired at the time it was read. The stored map
/// never encodes "expired" directly — it is always computed lazily from
/// `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveAction {
    Active(ControlMapAction),
    Expired(ControlMapAction),
}

impl EffectiveAction {
    pub fn action(self) -> ControlMapAction {
        match self {
            EffectiveAction::Active(a) | EffectiveAction::Expired(a) => a,
        }
    }
}

/// The vote a single map casts for `boundary` at `now`, ignoring any
/// `on_action_executed`/timeout promotion (that is stateful pool bookkeeping,
/// layered on top in `pool.rs`). `None` if the map has no opinion on this
/// boundary.
pub fn effective_action(map: &ControlMap, boundary: &str, now: DateTime<Utc>) -> Option<EffectiveAction> {
    let spec = map.states.get(boundary)?;
    if map.is_expired(now) {
        Some(EffectiveAction::Expired(spec.on_map_expire))
    } else {
        Some(EffectiveAction::Active(spec.action))
    }
}

/// Pick the winning action across every map's vote: `fail > pause >
/// force_continue > continue`. Ties resolve to whichever action
/// has the higher rank, which is `fail` by construction since it is the sole
/// highest rank.
pub fn strongest(votes: impl IntoIterator<Item = ControlMapAction>) -> ControlMapAction {
    votes
        .into_iter()
        .max_by_key(|a| a.rank())
        .unwrap_or_default()
}
