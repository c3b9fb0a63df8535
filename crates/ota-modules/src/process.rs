use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use ota_domain::{ModuleOperation, PayloadType, StateBoundary};

use crate::error::ModuleError;
use crate::executor::{ModuleOutcome, Rebooter, StateScriptExecutor, UpdateModuleExecutor};

/// Runs update modules as child processes. The only real implementation a
/// device needs: it shells out to `<module_dir>/<payload_type>` with the
/// operation name as its sole argument.
pub struct ProcessModuleExecutor {
    module_dir: PathBuf,
}

impl ProcessModuleExecutor {
    pub fn new(module_dir: PathBuf) -> Self {
        ProcessModuleExecutor { module_dir }
    }
}

#[async_trait]
impl UpdateModuleExecutor for ProcessModuleExecutor {
    async fn run(
        &self,
        payload_type: &PayloadType,
        operation: ModuleOperation,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<ModuleOutcome, ModuleError> {
        let module_path = self.module_dir.join(payload_type.as_str());
        debug!(module = %module_path.display(), %operation, "invoking update module");

        let output = Command::new(&module_path)
            .arg(operation.name())
            .current_dir(workdir)
            .envs(env)
            .output()
            .await
            .map_err(|e| ModuleError::SpawnFailed {
                module: module_path.display().to_string(),
                source: e,
            })?;

        let outcome = ModuleOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        match output.status.code() {
            Some(0) => Ok(outcome),
            Some(code) => Err(ModuleError::NonZeroExit {
                module: module_path.display().to_string(),
                code,
            }),
            None => Err(ModuleError::KilledBySignal {
                module: module_path.display().to_string(),
            }),
        }
    }
}

/// Runs state-boundary hook scripts as child processes.
pub struct ProcessStateScriptExecutor {
    script_dir: PathBuf,
}

impl ProcessStateScriptExecutor {
    pub fn new(script_dir: PathBuf) -> Self {
        ProcessStateScriptExecutor { script_dir }
    }
}

#[async_trait]
impl StateScriptExecutor for ProcessStateScriptExecutor {
    async fn run(
        &self,
        boundary: StateBoundary,
        env: &BTreeMap<String, String>,
    ) -> Result<(), ModuleError> {
        let script_path = self.script_dir.join(boundary.script_name());
        if !script_path.exists() {
            debug!(script = %script_path.display(), "no state script for this boundary, skipping");
            return Ok(());
        }

        let status = Command::new(&script_path)
            .envs(env)
            .status()
            .await
            .map_err(|e| ModuleError::SpawnFailed {
                module: script_path.display().to_string(),
                source: e,
            })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => {
                warn!(script = %script_path.display(), code, "state script exited nonzero");
                Err(ModuleError::NonZeroExit {
                    module: script_path.display().to_string(),
                    code,
                })
            }
            None => Err(ModuleError::KilledBySignal {
                module: script_path.display().to_string(),
            }),
        }
    }
}

/// Reboots the device via the system `reboot` binary.
pub struct SystemRebooter;

#[async_trait]
impl Rebooter for SystemRebooter {
    async fn reboot(&self) -> Result<(), ModuleError> {
        let status = Command::new("reboot")
            .status()
            .await
            .map_err(|e| ModuleError::SpawnFailed {
                module: "reboot".to_string(),
                source: e,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ModuleError::NonZeroExit {
                module: "reboot".to_string(),
                code: status.code().unwrap_or(-1),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_domain::Hook;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_state_script_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let executor = ProcessStateScriptExecutor::new(dir.path().to_path_buf());
        let boundary = StateBoundary::new(ModuleOperation::ArtifactInstall, Hook::Enter);
        executor.run(boundary, &BTreeMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn module_not_found_is_spawn_failed() {
        let dir = TempDir::new().unwrap();
        let executor = ProcessModuleExecutor::new(dir.path().to_path_buf());
        let result = executor
            .run(
                &PayloadType::new("rootfs-image"),
                ModuleOperation::ArtifactInstall,
                dir.path(),
                &BTreeMap::new(),
            )
            .await;
        assert!(matches!(result, Err(ModuleError::SpawnFailed { .. })));
    }
}
