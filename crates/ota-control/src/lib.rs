mod error;
mod pool;
mod vote;

pub use error::ControlError;
pub use pool::ControlMapPool;
pub use vote::{effective_action, strongest, EffectiveAction};
