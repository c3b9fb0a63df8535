use serde::{Deserialize, Serialize};

/// Raw YAML shape of the device configuration file, deserialized as-is and
/// then converted (with defaults applied and paths resolved) into
/// [`crate::DeviceConfig`].
#[derive(Debug, Deserialize, Serialize)]
pub struct RawDeviceConfig {
    pub servers: Vec<String>,
    pub device_type: String,
    #[serde(default)]
    pub tenant_token: Option<String>,

    #[serde(default = "default_inventory_poll_secs")]
    pub inventory_poll_interval_secs: u64,
    #[serde(default = "default_update_poll_secs")]
    pub update_poll_interval_secs: u64,
    #[serde(default = "default_retry_poll_secs")]
    pub retry_poll_interval_secs: u64,

    #[serde(default)]
    pub static_key: bool,

    #[serde(default = "default_state_script_dir")]
    pub state_script_dir: String,
    #[serde(default = "default_update_module_dir")]
    pub update_module_dir: String,
    #[serde(default = "default_data_store_dir")]
    pub data_store_dir: String,

    #[serde(default = "default_control_map_boot_expiration_secs")]
    pub control_map_boot_expiration_secs: i64,

    #[serde(default)]
    pub resume_is_iteration_override: Option<bool>,
    #[serde(default = "default_true")]
    pub rebooting_report_before_vote: bool,
}

fn default_inventory_poll_secs() -> u64 {
    28800
}
fn default_update_poll_secs() -> u64 {
    1800
}
fn default_retry_poll_secs() -> u64 {
    300
}
fn default_state_script_dir() -> String {
    "/etc/ota/scripts".to_string()
}
fn default_update_module_dir() -> String {
    "/usr/share/ota/modules".to_string()
}
fn default_data_store_dir() -> String {
    "/var/lib/ota".to_string()
}
fn default_control_map_boot_expiration_secs() -> i64 {
    600
}
fn default_true() -> bool {
    true
}
