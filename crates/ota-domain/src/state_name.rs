use serde::{Deserialize, Serialize};

use crate::protocol::ModuleOperation;

/// Every node of the update state machine. Shared between
/// `ota-engine` (which drives it) and `ota-store` (whose journal persists the
/// current state name across restarts), so it lives in the leaf domain crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    // Setup / idle
    Init,
    Idle,
    CheckWait,
    InventoryUpdate,
    InventoryUpdateRetry,
    UpdateCheck,
    AuthorizeWait,

    // Active deployment, nominal forward order
    UpdateFetch,
    UpdateStore,
    UpdateAfterStore,
    FetchControlMap,
    ControlMap,
    UpdateInstall,
    UpdateReboot,
    UpdateVerifyReboot,
    UpdateAfterReboot,
    UpdateCommit,
    UpdateAfterFirstCommit,
    UpdateAfterCommit,
    UpdateCleanup,
    UpdateStatusReport,

    // Rollback
    UpdateRollback,
    UpdateRollbackReboot,
    UpdateVerifyRollbackReboot,
    UpdateAfterRollbackReboot,

    // Error / retry
    UpdateError,
    UpdateStatusReportRetry,
    UpdatePreCommitStatusReportRetry,
    FetchStoreRetry,
    ReportError,
    ErrorState,

    // Control-map
    FetchRetryControlMap,
    ControlMapPause,

    // Terminal
    Final,
}

impl State {
    pub const fn name(self) -> &'static str {
        match self {
            State::Init => "Init",
            State::Idle => "Idle",
            State::CheckWait => "CheckWait",
            State::InventoryUpdate => "InventoryUpdate",
            State::InventoryUpdateRetry => "InventoryUpdateRetry",
            State::UpdateCheck => "UpdateCheck",
            State::AuthorizeWait => "AuthorizeWait",
            State::UpdateFetch => "UpdateFetch",
            State::UpdateStore => "UpdateStore",
            State::UpdateAfterStore => "UpdateAfterStore",
            State::FetchControlMap => "FetchControlMap",
            State::ControlMap => "ControlMap",
            State::UpdateInstall => "UpdateInstall",
            State::UpdateReboot => "UpdateReboot",
            State::UpdateVerifyReboot => "UpdateVerifyReboot",
            State::UpdateAfterReboot => "UpdateAfterReboot",
            State::UpdateCommit => "UpdateCommit",
            State::UpdateAfterFirstCommit => "UpdateAfterFirstCommit",
            State::UpdateAfterCommit => "UpdateAfterCommit",
            State::UpdateCleanup => "UpdateCleanup",
            State::UpdateStatusReport => "UpdateStatusReport",
            State::UpdateRollback => "UpdateRollback",
            State::UpdateRollbackReboot => "UpdateRollbackReboot",
            State::UpdateVerifyRollbackReboot => "UpdateVerifyRollbackReboot",
            State::UpdateAfterRollbackReboot => "UpdateAfterRollbackReboot",
            State::UpdateError => "UpdateError",
            State::UpdateStatusReportRetry => "UpdateStatusReportRetry",
            State::UpdatePreCommitStatusReportRetry => "UpdatePreCommitStatusReportRetry",
            State::FetchStoreRetry => "FetchStoreRetry",
            State::ReportError => "ReportError",
            State::ErrorState => "ErrorState",
            State::FetchRetryControlMap => "FetchRetryControlMap",
            State::ControlMapPause => "ControlMapPause",
            State::Final => "Final",
        }
    }

    pub fn from_name(s: &str) -> Option<State> {
        Some(match s {
            "Init" => State::Init,
            "Idle" => State::Idle,
            "CheckWait" => State::CheckWait,
            "InventoryUpdate" => State::InventoryUpdate,
            "InventoryUpdateRetry" => State::InventoryUpdateRetry,
            "UpdateCheck" => State::UpdateCheck,
            "AuthorizeWait" => State::AuthorizeWait,
            "UpdateFetch" => State::UpdateFetch,
            "UpdateStore" => State::UpdateStore,
            "UpdateAfterStore" => State::UpdateAfterStore,
            "FetchControlMap" => State::FetchControlMap,
            "ControlMap" => State::ControlMap,
            "UpdateInstall" => State::UpdateInstall,
            "UpdateReboot" => State::UpdateReboot,
            "UpdateVerifyReboot" => State::UpdateVerifyReboot,
            "UpdateAfterReboot" => State::UpdateAfterReboot,
            "UpdateCommit" => State::UpdateCommit,
            "UpdateAfterFirstCommit" => State::UpdateAfterFirstCommit,
            "UpdateAfterCommit" => State::UpdateAfterCommit,
            "UpdateCleanup" => State::UpdateCleanup,
            "UpdateStatusReport" => State::UpdateStatusReport,
            "UpdateRollback" => State::UpdateRollback,
            "UpdateRollbackReboot" => State::UpdateRollbackReboot,
            "UpdateVerifyRollbackReboot" => State::UpdateVerifyRollbackReboot,
            "UpdateAfterRollbackReboot" => State::UpdateAfterRollbackReboot,
            "UpdateError" => State::UpdateError,
            "UpdateStatusReportRetry" => State::UpdateStatusReportRetry,
            "UpdatePreCommitStatusReportRetry" => State::UpdatePreCommitStatusReportRetry,
            "FetchStoreRetry" => State::FetchStoreRetry,
            "ReportError" => State::ReportError,
            "ErrorState" => State::ErrorState,
            "FetchRetryControlMap" => State::FetchRetryControlMap,
            "ControlMapPause" => State::ControlMapPause,
            "Final" => State::Final,
            _ => return None,
        })
    }

    /// States that have their own time-based termination and so are exempt
    /// from the journal's loop-detection counter.
    pub fn permits_looping(self) -> bool {
        matches!(
            self,
            State::CheckWait
                | State::InventoryUpdateRetry
                | State::UpdateStatusReportRetry
                | State::UpdatePreCommitStatusReportRetry
                | State::FetchStoreRetry
                | State::ControlMapPause
                | State::FetchRetryControlMap
                | State::AuthorizeWait
        )
    }

    /// Reboot-adjacent states that do not count as a fresh loop iteration when
    /// re-entered via journal resume after a spontaneous reboot — a device
    /// that reboots on its own shouldn't burn down its loop budget for it.
    pub fn is_resume_safe(self) -> bool {
        matches!(
            self,
            State::UpdateVerifyReboot
                | State::UpdateVerifyRollbackReboot
                | State::UpdateAfterReboot
                | State::UpdateAfterRollbackReboot
        )
    }

    /// Whether this state is a blocking control-map boundary — the points
    /// where the engine must consult the pool before proceeding.
    pub fn is_control_map_boundary(self) -> bool {
        matches!(
            self,
            State::UpdateInstall | State::UpdateReboot | State::UpdateCommit
        )
    }

    /// The update-module operation a state corresponds to, if any.
    /// State-script and module hooks are ordered by the state the engine
    /// currently occupies. States with no direct module action
    /// (waiting, bookkeeping, terminal) return `None`.
    pub fn module_operation(self) -> Option<ModuleOperation> {
        match self {
            State::UpdateFetch | State::UpdateStore => Some(ModuleOperation::Download),
            State::UpdateInstall => Some(ModuleOperation::ArtifactInstall),
            State::UpdateReboot => Some(ModuleOperation::ArtifactReboot),
            State::UpdateVerifyReboot => Some(ModuleOperation::ArtifactVerifyReboot),
            State::UpdateCommit | State::UpdateAfterFirstCommit => {
                Some(ModuleOperation::ArtifactCommit)
            }
            State::UpdateRollback => Some(ModuleOperation::ArtifactRollback),
            State::UpdateRollbackReboot => Some(ModuleOperation::ArtifactRollbackReboot),
            State::UpdateVerifyRollbackReboot => {
                Some(ModuleOperation::ArtifactVerifyRollbackReboot)
            }
            State::UpdateCleanup => Some(ModuleOperation::Cleanup),
            State::UpdateError | State::ErrorState => Some(ModuleOperation::ArtifactFailure),
            _ => None,
        }
    }

    /// The status string reported to the deployment server upon entering this
    /// state, if the state itself (rather than the deployment's eventual
    /// outcome) determines it ("downloading" / "installing" / "rebooting").
    /// `UpdateStatusReport` reports "success" or "failure"
    /// depending on how the deployment got there, so it is not modeled here.
    pub fn interim_status(self) -> Option<&'static str> {
        match self {
            State::UpdateFetch | State::UpdateStore | State::UpdateAfterStore => {
                Some("downloading")
            }
            State::UpdateInstall => Some("installing"),
            State::UpdateReboot | State::UpdateVerifyReboot | State::UpdateAfterReboot => {
                Some("rebooting")
            }
            State::UpdateRollback
            | State::UpdateRollbackReboot
            | State::UpdateVerifyRollbackReboot
            | State::UpdateAfterRollbackReboot => Some("rebooting"),
            _ => None,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_name() {
        let all = [
            State::Init, State::Idle, State::CheckWait, State::InventoryUpdate,
            State::InventoryUpdateRetry, State::UpdateCheck, State::AuthorizeWait,
            State::UpdateFetch, State::UpdateStore, State::UpdateAfterStore,
            State::FetchControlMap, State::ControlMap, State::UpdateInstall,
            State::UpdateReboot, State::UpdateVerifyReboot, State::UpdateAfterReboot,
            State::UpdateCommit, State::UpdateAfterFirstCommit, State::UpdateAfterCommit,
            State::UpdateCleanup, State::UpdateStatusReport, State::UpdateRollback,
            State::UpdateRollbackReboot, State::UpdateVerifyRollbackReboot,
            State::UpdateAfterRollbackReboot, State::UpdateError,
            State::UpdateStatusReportRetry, State::UpdatePreCommitStatusReportRetry,
            State::FetchStoreRetry, State::ReportError, State::ErrorState,
            State::FetchRetryControlMap, State::ControlMapPause, State::Final,
        ];
        for s in all {
            assert_eq!(State::from_name(s.name()), Some(s));
        }
    }

    #[test]
    fn resume_safe_states_are_reboot_adjacent() {
        assert!(State::UpdateVerifyReboot.is_resume_safe());
        assert!(!State::UpdateInstall.is_resume_safe());
    }

    #[test]
    fn module_operation_covers_install_boundary() {
        assert_eq!(
            State::UpdateInstall.module_operation(),
            Some(ModuleOperation::ArtifactInstall)
        );
        assert_eq!(State::Idle.module_operation(), None);
    }

    #[test]
    fn interim_status_reports_installing() {
        assert_eq!(State::UpdateInstall.interim_status(), Some("installing"));
        assert_eq!(State::UpdateStatusReport.interim_status(), None);
    }
}
