use std::path::PathBuf;
use std::time::Duration;

/// Fully-resolved device configuration.
/// Everything the engine, auth manager, control-map pool and module executor
/// need at startup lives here so each of those crates stays free of file I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Servers tried in order on every authorization/update-check round.
    pub servers: Vec<String>,
    pub device_type: String,
    pub tenant_token: Option<String>,

    pub inventory_poll_interval: Duration,
    pub update_poll_interval: Duration,
    pub retry_poll_interval: Duration,

    /// When set, the identity key is never regenerated even if missing —
    /// the device was provisioned with a key injected out-of-band.
    pub static_key: bool,

    pub state_script_dir: PathBuf,
    pub update_module_dir: PathBuf,
    pub data_store_dir: PathBuf,

    /// Window the control-map pool re-anchors its `expiry_time`s to on
    /// every boot.
    pub control_map_boot_expiration: Duration,

    /// Per-state override of the resume loop-counting policy. `None` uses
    /// `State::is_resume_safe` as-is.
    pub resume_is_iteration_override: Option<bool>,
    /// Whether `rebooting` is reported before the control-map vote fires
    /// on `ArtifactReboot_Enter`. Defaults to `true`.
    pub rebooting_report_before_vote: bool,
}

impl DeviceConfig {
    pub fn data_store_path(&self) -> PathBuf {
        self.data_store_dir.join("ota-store.redb")
    }
}
