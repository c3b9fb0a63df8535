use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("deployment id is not stamped")]
    UnstampedDeploymentId,

    #[error("deployment descriptor depends not satisfied by device provides: {0}")]
    DependsNotSatisfied(String),

    #[error("artifact name mismatch: descriptor says '{descriptor}', deployment promised '{promised}'")]
    ArtifactNameMismatch { descriptor: String, promised: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
