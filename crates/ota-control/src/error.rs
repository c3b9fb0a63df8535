use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control map for deployment {id} priority {priority} not found")]
    NotFound { id: String, priority: i64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
