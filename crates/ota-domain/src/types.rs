use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Deployment identifier, stamped by the server on offer. Empty before that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DeploymentId(pub String);

impl DeploymentId {
    pub fn new(s: impl Into<String>) -> Self {
        DeploymentId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_stamped(&self) -> bool {
        !self.0.is_empty()
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactName(pub String);

impl ArtifactName {
    pub fn new(s: impl Into<String>) -> Self {
        ArtifactName(s.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactGroup(pub String);

impl ArtifactGroup {
    pub fn new(s: impl Into<String>) -> Self {
        ArtifactGroup(s.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadType(pub String);

impl PayloadType {
    pub fn new(s: impl Into<String>) -> Self {
        PayloadType(s.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Identity / auth ────────────────────────────────────────────────────────────

/// Key-unique collector-supplied identity attributes. `BTreeMap` gives a
/// deterministic iteration order so the serialized payload is stable across
/// calls, making the signed payload reproducible for tests even though key
/// order is otherwise irrelevant on the wire.
pub type IdentityData = BTreeMap<String, String>;

/// An opaque token issued by the server. Never interpreted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthToken(pub Vec<u8>);

impl AuthToken {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", self.0.len())
    }
}

// ── Deployment descriptor ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedsReboot {
    Yes,
    No,
    Automatic,
}

impl std::fmt::Display for NeedsReboot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NeedsReboot::Yes => write!(f, "yes"),
            NeedsReboot::No => write!(f, "no"),
            NeedsReboot::Automatic => write!(f, "automatic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SupportsRollback {
    Supported,
    Unsupported,
    #[default]
    Unknown,
}

impl SupportsRollback {
    pub fn is_supported(&self) -> bool {
        matches!(self, SupportsRollback::Supported)
    }
}

impl std::fmt::Display for SupportsRollback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupportsRollback::Supported => write!(f, "supported"),
            SupportsRollback::Unsupported => write!(f, "unsupported"),
            SupportsRollback::Unknown => write!(f, "unknown"),
        }
    }
}

/// `depends` values may be a single string or a list of acceptable strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsValue {
    Single(String),
    Multiple(Vec<String>),
}

impl DependsValue {
    /// Whether `provided` satisfies this dependency value.
    pub fn is_satisfied_by(&self, provided: &str) -> bool {
        match self {
            DependsValue::Single(v) => v == provided,
            DependsValue::Multiple(vs) => vs.iter().any(|v| v == provided),
        }
    }
}

/// Immutable for the lifetime of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    pub deployment_id: DeploymentId,
    pub artifact_name: ArtifactName,
    pub artifact_group: ArtifactGroup,
    pub device_types_compatible: Vec<String>,
    pub payload_types: Vec<PayloadType>,
    #[serde(default)]
    pub provides: BTreeMap<String, String>,
    #[serde(default)]
    pub depends: BTreeMap<String, DependsValue>,
    #[serde(default)]
    pub type_info_provides: BTreeMap<String, String>,
    /// One entry per payload type, in the same order as `payload_types`.
    pub needs_reboot: Vec<NeedsReboot>,
    #[serde(default)]
    pub supports_rollback: SupportsRollback,
    pub download_uri: String,
}

impl DeploymentDescriptor {
    /// Whether any payload in this deployment requires a reboot.
    pub fn reboot_requested(&self) -> bool {
        self.needs_reboot
            .iter()
            .any(|n| matches!(n, NeedsReboot::Yes | NeedsReboot::Automatic))
    }

    /// Whether `self.depends` is satisfied by the device's current `provides`.
    /// Spec §4.4.3: checked before `UpdateStore` is allowed to proceed.
    pub fn depends_satisfied_by(&self, device_provides: &BTreeMap<String, String>) -> bool {
        self.depends.iter().all(|(key, want)| {
            device_provides
                .get(key)
                .map_or(false, |have| want.is_satisfied_by(have))
        })
    }
}

// ── Control map ────────────────────────────────────────────────────────────────

/// Symbolic vote a control map casts for a given state boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControlMapAction {
    #[default]
    Continue,
    Pause,
    Fail,
    ForceContinue,
}

impl std::fmt::Display for ControlMapAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMapAction::Continue => write!(f, "continue"),
            ControlMapAction::Pause => write!(f, "pause"),
            ControlMapAction::Fail => write!(f, "fail"),
            ControlMapAction::ForceContinue => write!(f, "force_continue"),
        }
    }
}

impl ControlMapAction {
    /// Strength in the voting order `fail > pause > force_continue > continue`.
    /// Higher wins. Used by the pool's pure vote function.
    pub fn rank(self) -> u8 {
        match self {
            ControlMapAction::Fail => 3,
            ControlMapAction::Pause => 2,
            ControlMapAction::ForceContinue => 1,
            ControlMapAction::Continue => 0,
        }
    }
}

/// Per-state-boundary policy record. Spec §3: "up to four fields".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StateActionSpec {
    /// Vote cast while the owning map is active.
    #[serde(default)]
    pub action: ControlMapAction,
    /// Vote cast once the owning map has expired.
    #[serde(default)]
    pub on_map_expire: ControlMapAction,
    /// Replaces `action` after `action` has been reported to the engine once.
    /// `None` means `action` keeps applying on repeat queries.
    #[serde(default)]
    pub on_action_executed: Option<ControlMapAction>,
    /// Optional sub-action timer: seconds `action` remains in force before
    /// `on_action_executed` takes over regardless of whether the engine has
    /// observed it yet. `None` disables the timer (the common case).
    #[serde(default)]
    pub action_timeout_secs: Option<i64>,
}

/// A structured policy document that votes on per-state actions.
/// Spec §3 "Update control map".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMap {
    pub id: DeploymentId,
    pub priority: i64,
    pub expiry_time: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub states: BTreeMap<String, StateActionSpec>,
}

impl ControlMap {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.expiry_time
    }

    /// `(id, priority)` identity used for pool replacement semantics.
    pub fn key(&self) -> (DeploymentId, i64) {
        (self.id.clone(), self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depends_single_matches_exact() {
        let d = DependsValue::Single("v1".into());
        assert!(d.is_satisfied_by("v1"));
        assert!(!d.is_satisfied_by("v2"));
    }

    #[test]
    fn depends_multiple_matches_any() {
        let d = DependsValue::Multiple(vec!["v1".into(), "v2".into()]);
        assert!(d.is_satisfied_by("v2"));
        assert!(!d.is_satisfied_by("v3"));
    }

    #[test]
    fn action_rank_orders_fail_highest() {
        assert!(ControlMapAction::Fail.rank() > ControlMapAction::Pause.rank());
        assert!(ControlMapAction::Pause.rank() > ControlMapAction::ForceContinue.rank());
        assert!(ControlMapAction::ForceContinue.rank() > ControlMapAction::Continue.rank());
    }

    #[test]
    fn descriptor_depends_satisfied() {
        let mut desc = sample_descriptor();
        desc.depends.insert("rootfs-image.version".into(), DependsValue::Single("1.0".into()));
        let mut provides = BTreeMap::new();
        provides.insert("rootfs-image.version".into(), "1.0".to_string());
        assert!(desc.depends_satisfied_by(&provides));
        provides.insert("rootfs-image.version".into(), "2.0".to_string());
        assert!(!desc.depends_satisfied_by(&provides));
    }

    fn sample_descriptor() -> DeploymentDescriptor {
        DeploymentDescriptor {
            deployment_id: DeploymentId::new("dep-1"),
            artifact_name: ArtifactName::new("artifact-name"),
            artifact_group: ArtifactGroup::new("group-1"),
            device_types_compatible: vec!["qemux86-64".into()],
            payload_types: vec![PayloadType::new("rootfs-image")],
            provides: BTreeMap::new(),
            depends: BTreeMap::new(),
            type_info_provides: BTreeMap::new(),
            needs_reboot: vec![NeedsReboot::Yes],
            supports_rollback: SupportsRollback::Supported,
            download_uri: "https://example.invalid/artifact".into(),
        }
    }
}
