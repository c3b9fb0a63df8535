use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),

    #[error("state-data schema version {found} is newer than this binary supports")]
    UnsupportedSchemaVersion { found: u32 },
}
