pub mod auth_token;
pub mod control_map;
pub mod error;
pub mod journal;
pub mod kv;
pub mod memory;
pub mod redb_store;

pub use auth_token::{fingerprint, AuthTokenRepository};
pub use control_map::ControlMapRepository;
pub use error::StoreError;
pub use journal::{StateData, StateDataJournal, STATE_DATA_SCHEMA_VERSION};
pub use kv::KvStore;
pub use memory::MemoryKvStore;
pub use redb_store::RedbKvStore;
