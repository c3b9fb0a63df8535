pub mod error;
pub mod protocol;
pub mod state_name;
pub mod types;

pub use error::DomainError;
pub use protocol::{Hook, ModuleOperation, StateBoundary};
pub use state_name::State;
pub use types::{
    ArtifactGroup, ArtifactName, AuthToken, ControlMap, ControlMapAction, DependsValue,
    DeploymentDescriptor, DeploymentId, IdentityData, NeedsReboot, PayloadType, StateActionSpec,
    SupportsRollback,
};
