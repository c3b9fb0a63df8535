pub mod error;
pub mod executor;
pub mod process;
pub mod scripted;

pub use error::ModuleError;
pub use executor::{
    parse_needs_reboot, parse_supports_rollback, ModuleOutcome, Rebooter, StateScriptExecutor,
    UpdateModuleExecutor,
};
pub use process::{ProcessModuleExecutor, ProcessStateScriptExecutor, SystemRebooter};
pub use scripted::{RecordingRebooter, RecordingStateScriptExecutor, ScriptedModuleExecutor};
