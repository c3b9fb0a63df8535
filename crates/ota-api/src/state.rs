use std::sync::Arc;

use ota_auth::AuthorizationManager;
use ota_config::DeviceConfig;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthorizationManager>,
    pub config: Arc<DeviceConfig>,
    /// Authenticates local callers (the CLI) against this loopback surface —
    /// the substitute for D-Bus's own bus-level ACL.
    pub control_token: Arc<String>,
}
