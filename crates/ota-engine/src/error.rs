use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] ota_store::StoreError),

    #[error("control map error: {0}")]
    Control(#[from] ota_control::ControlError),

    #[error("module error: {0}")]
    Module(#[from] ota_modules::ModuleError),

    #[error("authorization error: {0}")]
    Auth(#[from] ota_auth::AuthError),

    #[error("deployment server error: {0}")]
    Server(#[from] reqwest::Error),

    #[error("deployment server returned 401 Unauthorized")]
    Unauthorized,

    #[error("deployment descriptor rejected: {0}")]
    DescriptorRejected(String),

    #[error("deployment log error: {0}")]
    Log(#[from] std::io::Error),

    #[error("internal engine error: {0}")]
    Internal(String),
}
