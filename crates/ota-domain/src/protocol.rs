use serde::{Deserialize, Serialize};

/// The operations an update module understands. The executor in
/// `ota-modules` invokes the module binary with the operation name as its
/// sole argument; `ota-engine` uses the same vocabulary to label log lines
/// and to build control-map state-boundary keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ModuleOperation {
    Download,
    ArtifactInstall,
    NeedsArtifactReboot,
    SupportsRollback,
    ArtifactCommit,
    ArtifactRollback,
    ArtifactReboot,
    ArtifactVerifyReboot,
    ArtifactRollbackReboot,
    ArtifactVerifyRollbackReboot,
    ArtifactFailure,
    Cleanup,
}

impl ModuleOperation {
    pub const fn name(self) -> &'static str {
        match self {
            ModuleOperation::Download => "Download",
            ModuleOperation::ArtifactInstall => "ArtifactInstall",
            ModuleOperation::NeedsArtifactReboot => "NeedsArtifactReboot",
            ModuleOperation::SupportsRollback => "SupportsRollback",
            ModuleOperation::ArtifactCommit => "ArtifactCommit",
            ModuleOperation::ArtifactRollback => "ArtifactRollback",
            ModuleOperation::ArtifactReboot => "ArtifactReboot",
            ModuleOperation::ArtifactVerifyReboot => "ArtifactVerifyReboot",
            ModuleOperation::ArtifactRollbackReboot => "ArtifactRollbackReboot",
            ModuleOperation::ArtifactVerifyRollbackReboot => "ArtifactVerifyRollbackReboot",
            ModuleOperation::ArtifactFailure => "ArtifactFailure",
            ModuleOperation::Cleanup => "Cleanup",
        }
    }
}

impl std::fmt::Display for ModuleOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The three lifecycle hooks a state-script or update-module operation can
/// be invoked for: `_Enter`/`_Leave`/`_Error` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Hook {
    Enter,
    Leave,
    Error,
}

impl Hook {
    pub const fn suffix(self) -> &'static str {
        match self {
            Hook::Enter => "Enter",
            Hook::Leave => "Leave",
            Hook::Error => "Error",
        }
    }
}

/// A `<operation>_<hook>` boundary, e.g. `ArtifactInstall_Enter`. This is the
/// exact string the control-map pool keys its `states` map with, and the
/// stem the module executor appends `_00` to when looking for the on-disk
/// hook script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateBoundary {
    pub operation: ModuleOperation,
    pub hook: Hook,
}

impl StateBoundary {
    pub fn new(operation: ModuleOperation, hook: Hook) -> Self {
        StateBoundary { operation, hook }
    }

    /// Key used to look a vote up in a `ControlMap.states` map.
    pub fn control_map_key(self) -> String {
        format!("{}_{}", self.operation, self.hook.suffix())
    }

    /// On-disk script name the state-script / update-module executor runs.
    pub fn script_name(self) -> String {
        format!("{}_{}_00", self.operation, self.hook.suffix())
    }
}

impl std::fmt::Display for StateBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.operation, self.hook.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_map_key_matches_spec_example() {
        let b = StateBoundary::new(ModuleOperation::ArtifactInstall, Hook::Enter);
        assert_eq!(b.control_map_key(), "ArtifactInstall_Enter");
    }

    #[test]
    fn script_name_has_ordering_suffix() {
        let b = StateBoundary::new(ModuleOperation::ArtifactReboot, Hook::Leave);
        assert_eq!(b.script_name(), "ArtifactReboot_Leave_00");
    }
}
