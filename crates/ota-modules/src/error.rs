use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("failed to spawn module '{module}': {source}")]
    SpawnFailed {
        module: String,
        #[source]
        source: std::io::Error,
    },

    #[error("module '{module}' exited with status {code}")]
    NonZeroExit { module: String, code: i32 },

    #[error("module '{module}' was terminated by a signal")]
    KilledBySignal { module: String },

    #[error("internal module error: {0}")]
    Internal(String),
}
