use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::ConfigError;
use crate::raw::RawDeviceConfig;

/// Load the device configuration file at `path`.
pub fn load_config(path: &Path) -> Result<DeviceConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let raw: RawDeviceConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })?;

    debug!(path = %path.display(), servers = raw.servers.len(), "loaded device config");
    convert(raw, path)
}

fn convert(raw: RawDeviceConfig, path: &Path) -> Result<DeviceConfig, ConfigError> {
    if raw.servers.is_empty() {
        return Err(ConfigError::Conversion {
            path: path.display().to_string(),
            message: "servers list must not be empty".to_string(),
        });
    }

    Ok(DeviceConfig {
        servers: raw.servers,
        device_type: raw.device_type,
        tenant_token: raw.tenant_token,
        inventory_poll_interval: Duration::from_secs(raw.inventory_poll_interval_secs),
        update_poll_interval: Duration::from_secs(raw.update_poll_interval_secs),
        retry_poll_interval: Duration::from_secs(raw.retry_poll_interval_secs),
        static_key: raw.static_key,
        state_script_dir: PathBuf::from(raw.state_script_dir),
        update_module_dir: PathBuf::from(raw.update_module_dir),
        data_store_dir: PathBuf::from(raw.data_store_dir),
        control_map_boot_expiration: Duration::from_secs(
            raw.control_map_boot_expiration_secs.max(0) as u64,
        ),
        resume_is_iteration_override: raw.resume_is_iteration_override,
        rebooting_report_before_vote: raw.rebooting_report_before_vote,
    })
}
