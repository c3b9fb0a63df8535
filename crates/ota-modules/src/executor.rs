use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use ota_domain::{ModuleOperation, NeedsReboot, PayloadType, StateBoundary, SupportsRollback};

use crate::error::ModuleError;

/// The full captured result of one module invocation. The module's stdout
/// carries the query answer for `NeedsArtifactReboot` / `SupportsRollback`;
/// its exit code carries success/failure for everything else.
#[derive(Debug, Clone, Default)]
pub struct ModuleOutcome {
    pub stdout: String,
    pub stderr: String,
}

/// Invokes a device's update modules. One module binary per payload type,
/// looked up by name in the configured module directory and run with the
/// operation name as its sole argument.
#[async_trait]
pub trait UpdateModuleExecutor: Send + Sync + 'static {
    async fn run(
        &self,
        payload_type: &PayloadType,
        operation: ModuleOperation,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<ModuleOutcome, ModuleError>;
}

/// Invokes the per-state-boundary hook scripts. Unlike update modules, a
/// missing script is not an error — state scripts are optional; only a
/// script that exists and exits nonzero is a failure.
#[async_trait]
pub trait StateScriptExecutor: Send + Sync + 'static {
    async fn run(
        &self,
        boundary: StateBoundary,
        env: &BTreeMap<String, String>,
    ) -> Result<(), ModuleError>;
}

/// Performs the actual device reboot. Kept as a trait so the engine can be
/// driven end-to-end in tests without ever rebooting the test runner.
#[async_trait]
pub trait Rebooter: Send + Sync + 'static {
    async fn reboot(&self) -> Result<(), ModuleError>;
}

/// Parse a `NeedsArtifactReboot` module query's stdout: `"Yes"`, `"No"`, or
/// `"Automatic"`, trailing whitespace tolerated. Unrecognized
/// output is treated as `Yes` — the safer default when a module's answer
/// can't be trusted.
pub fn parse_needs_reboot(stdout: &str) -> NeedsReboot {
    match stdout.trim() {
        "No" => NeedsReboot::No,
        "Automatic" => NeedsReboot::Automatic,
        _ => NeedsReboot::Yes,
    }
}

/// Parse a `SupportsRollback` module query's stdout: `"Yes"` / `"No"`.
/// Unrecognized output is treated as unknown, which the engine
/// treats the same as unsupported.
pub fn parse_supports_rollback(stdout: &str) -> SupportsRollback {
    match stdout.trim() {
        "Yes" => SupportsRollback::Supported,
        "No" => SupportsRollback::Unsupported,
        _ => SupportsRollback::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_reboot_parses_known_answers() {
        assert_eq!(parse_needs_reboot("No\n"), NeedsReboot::No);
        assert_eq!(parse_needs_reboot("Automatic"), NeedsReboot::Automatic);
        assert_eq!(parse_needs_reboot("garbage"), NeedsReboot::Yes);
    }

    #[test]
    fn supports_rollback_parses_known_answers() {
        assert_eq!(parse_supports_rollback("Yes"), SupportsRollback::Supported);
        assert_eq!(parse_supports_rollback("No"), SupportsRollback::Unsupported);
        assert_eq!(parse_supports_rollback(""), SupportsRollback::Unknown);
    }
}
