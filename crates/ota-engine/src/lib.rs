pub mod deployment_log;
pub mod engine;
pub mod error;
pub mod retry;
pub mod server;
pub mod status;

pub use deployment_log::DeploymentLog;
pub use engine::Engine;
pub use error::EngineError;
pub use retry::{max_sending_attempts, Backoff};
pub use server::{DeploymentOffer, DeploymentServerClient, ReqwestDeploymentServerClient};
pub use status::StatusTracker;
