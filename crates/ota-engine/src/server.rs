use std::collections::BTreeMap;

use async_trait::async_trait;
use ota_domain::{
    ArtifactGroup, ArtifactName, AuthToken, ControlMap, DependsValue, DeploymentId, PayloadType,
};
use serde::Deserialize;
use tracing::debug;

use crate::error::EngineError;

/// What the server offers for the next deployment, stripped down to the
/// fields a device actually needs ("id", "artifact { name, source.uri,
/// device_types_compatible, payload_types, provides, depends,
/// type_info_provides }", optional "update_control_map"). `needs_reboot` and
/// `supports_rollback` are *not* server fields — the engine fills them in by
/// querying the device's own update modules once it knows the payload types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOffer {
    pub deployment_id: DeploymentId,
    pub artifact_name: ArtifactName,
    pub artifact_group: ArtifactGroup,
    pub device_types_compatible: Vec<String>,
    pub payload_types: Vec<PayloadType>,
    pub provides: BTreeMap<String, String>,
    pub depends: BTreeMap<String, DependsValue>,
    pub type_info_provides: BTreeMap<String, String>,
    pub download_uri: String,
    pub control_map: Option<ControlMap>,
}

/// The thin slice of the deployment REST protocol the engine consumes.
/// Wire-level bytes beyond these three calls are out of scope; boxed as a
/// trait so engine tests never touch the network.
#[async_trait]
pub trait DeploymentServerClient: Send + Sync + 'static {
    async fn next_deployment(
        &self,
        server: &str,
        device_type: &str,
        token: &AuthToken,
    ) -> Result<Option<DeploymentOffer>, EngineError>;

    async fn report_status(
        &self,
        server: &str,
        deployment_id: &DeploymentId,
        token: &AuthToken,
        status: &str,
    ) -> Result<(), EngineError>;

    async fn fetch_control_map(
        &self,
        server: &str,
        deployment_id: &DeploymentId,
        token: &AuthToken,
    ) -> Result<Option<ControlMap>, EngineError>;
}

pub struct ReqwestDeploymentServerClient {
    client: reqwest::Client,
}

impl Default for ReqwestDeploymentServerClient {
    fn default() -> Self {
        ReqwestDeploymentServerClient {
            client: reqwest::Client::new(),
        }
    }
}

impl ReqwestDeploymentServerClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn bearer(token: &AuthToken) -> String {
        format!("Bearer {}", String::from_utf8_lossy(&token.0))
    }
}

#[derive(Deserialize)]
struct RawSource {
    uri: String,
}

#[derive(Deserialize)]
struct RawArtifact {
    name: String,
    source: RawSource,
    device_types_compatible: Vec<String>,
    payload_types: Vec<String>,
    #[serde(default)]
    provides: BTreeMap<String, String>,
    #[serde(default)]
    depends: BTreeMap<String, DependsValue>,
    #[serde(default)]
    type_info_provides: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawOffer {
    id: String,
    artifact_group: Option<String>,
    artifact: RawArtifact,
    #[serde(default)]
    update_control_map: Option<ControlMap>,
}

#[async_trait]
impl DeploymentServerClient for ReqwestDeploymentServerClient {
    async fn next_deployment(
        &self,
        server: &str,
        device_type: &str,
        token: &AuthToken,
    ) -> Result<Option<DeploymentOffer>, EngineError> {
        let url = format!(
            "{}/api/devices/v1/deployments/device/deployments/next",
            server.trim_end_matches('/')
        );
        let resp = self
            .client
            .get(&url)
            .query(&[("device_type", device_type)])
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EngineError::Unauthorized);
        }
        let raw: RawOffer = resp.error_for_status()?.json().await?;
        debug!(deployment_id = %raw.id, "received deployment offer");
        Ok(Some(DeploymentOffer {
            deployment_id: DeploymentId::new(raw.id),
            artifact_name: ArtifactName::new(raw.artifact.name),
            artifact_group: ArtifactGroup::new(raw.artifact_group.unwrap_or_default()),
            device_types_compatible: raw.artifact.device_types_compatible,
            payload_types: raw
                .artifact
                .payload_types
                .into_iter()
                .map(PayloadType::new)
                .collect(),
            provides: raw.artifact.provides,
            depends: raw.artifact.depends,
            type_info_provides: raw.artifact.type_info_provides,
            download_uri: raw.artifact.source.uri,
            control_map: raw.update_control_map,
        }))
    }

    async fn report_status(
        &self,
        server: &str,
        deployment_id: &DeploymentId,
        token: &AuthToken,
        status: &str,
    ) -> Result<(), EngineError> {
        let url = format!(
            "{}/api/devices/v1/deployments/device/deployments/{}/status",
            server.trim_end_matches('/'),
            deployment_id
        );
        let resp = self
            .client
            .put(&url)
            .header("Authorization", Self::bearer(token))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EngineError::Unauthorized);
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn fetch_control_map(
        &self,
        server: &str,
        deployment_id: &DeploymentId,
        token: &AuthToken,
    ) -> Result<Option<ControlMap>, EngineError> {
        let url = format!(
            "{}/api/devices/v1/deployments/device/deployments/{}/update_control_map",
            server.trim_end_matches('/'),
            deployment_id
        );
        let resp = self
            .client
            .get(&url)
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let map: ControlMap = resp.error_for_status()?.json().await?;
        Ok(Some(map))
    }
}
