use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use ota_domain::{ModuleOperation, PayloadType, StateBoundary};

use crate::error::ModuleError;
use crate::executor::{ModuleOutcome, Rebooter, StateScriptExecutor, UpdateModuleExecutor};

/// In-memory update-module stand-in for tests. Scripted answers are keyed by
/// `(payload_type, operation)`; any call not scripted succeeds with empty
/// output, mirroring `LocalDriver`'s no-op-but-successful default.
#[derive(Default)]
pub struct ScriptedModuleExecutor {
    answers: Mutex<HashMap<(String, ModuleOperation), Result<ModuleOutcome, ModuleError>>>,
    calls: Mutex<Vec<(String, ModuleOperation)>>,
}

impl ScriptedModuleExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_success(&self, payload_type: &str, operation: ModuleOperation, stdout: &str) {
        self.answers.lock().unwrap().insert(
            (payload_type.to_string(), operation),
            Ok(ModuleOutcome {
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
    }

    pub fn script_failure(&self, payload_type: &str, operation: ModuleOperation) {
        self.answers.lock().unwrap().insert(
            (payload_type.to_string(), operation),
            Err(ModuleError::NonZeroExit {
                module: payload_type.to_string(),
                code: 1,
            }),
        );
    }

    pub fn calls(&self) -> Vec<(String, ModuleOperation)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateModuleExecutor for ScriptedModuleExecutor {
    async fn run(
        &self,
        payload_type: &PayloadType,
        operation: ModuleOperation,
        _workdir: &Path,
        _env: &BTreeMap<String, String>,
    ) -> Result<ModuleOutcome, ModuleError> {
        let key = (payload_type.as_str().to_string(), operation);
        self.calls.lock().unwrap().push(key.clone());
        debug!(payload_type = %payload_type, %operation, "ScriptedModuleExecutor: run");
        match self.answers.lock().unwrap().get(&key) {
            Some(Ok(outcome)) => Ok(outcome.clone()),
            Some(Err(_)) => Err(ModuleError::NonZeroExit {
                module: payload_type.to_string(),
                code: 1,
            }),
            None => Ok(ModuleOutcome::default()),
        }
    }
}

/// Records every state-script invocation without touching the filesystem.
#[derive(Default)]
pub struct RecordingStateScriptExecutor {
    invocations: Mutex<Vec<String>>,
}

impl RecordingStateScriptExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateScriptExecutor for RecordingStateScriptExecutor {
    async fn run(
        &self,
        boundary: StateBoundary,
        _env: &BTreeMap<String, String>,
    ) -> Result<(), ModuleError> {
        self.invocations.lock().unwrap().push(boundary.to_string());
        Ok(())
    }
}

/// Rebooter that just records that a reboot was requested, for state-machine
/// tests that must never actually reboot the test runner.
#[derive(Default)]
pub struct RecordingRebooter {
    count: Mutex<u32>,
}

impl RecordingRebooter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reboot_count(&self) -> u32 {
        *self.count.lock().unwrap()
    }
}

#[async_trait]
impl Rebooter for RecordingRebooter {
    async fn reboot(&self) -> Result<(), ModuleError> {
        *self.count.lock().unwrap() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_executor_returns_configured_answer() {
        let executor = ScriptedModuleExecutor::new();
        executor.script_success("rootfs-image", ModuleOperation::NeedsArtifactReboot, "Yes");
        let outcome = executor
            .run(
                &PayloadType::new("rootfs-image"),
                ModuleOperation::NeedsArtifactReboot,
                Path::new("/tmp"),
                &BTreeMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "Yes");
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn scripted_executor_propagates_failure() {
        let executor = ScriptedModuleExecutor::new();
        executor.script_failure("rootfs-image", ModuleOperation::ArtifactInstall);
        let result = executor
            .run(
                &PayloadType::new("rootfs-image"),
                ModuleOperation::ArtifactInstall,
                Path::new("/tmp"),
                &BTreeMap::new(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recording_rebooter_counts_calls() {
        let rebooter = RecordingRebooter::new();
        rebooter.reboot().await.unwrap();
        rebooter.reboot().await.unwrap();
        assert_eq!(rebooter.reboot_count(), 2);
    }
}
