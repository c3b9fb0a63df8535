use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use ota_auth::AuthorizationManager;
use ota_config::DeviceConfig;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(
    auth: Arc<AuthorizationManager>,
    config: Arc<DeviceConfig>,
    control_token: Arc<String>,
) -> Router {
    let state = AppState { auth, config, control_token };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/token", get(handlers::get_token))
        .route("/token/fetch", post(handlers::fetch_token))
        .route("/events", get(handlers::events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ota_auth::key::{key_path_for, KeyStore};
    use ota_store::{AuthTokenRepository, MemoryKvStore};
    use std::collections::BTreeMap;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-control-token";

    fn test_config() -> Arc<DeviceConfig> {
        Arc::new(DeviceConfig {
            servers: vec!["http://server.invalid".to_string()],
            device_type: "qemux86-64".to_string(),
            tenant_token: None,
            inventory_poll_interval: std::time::Duration::from_secs(1800),
            update_poll_interval: std::time::Duration::from_secs(1800),
            retry_poll_interval: std::time::Duration::from_secs(300),
            static_key: false,
            state_script_dir: "/tmp/scripts".into(),
            update_module_dir: "/tmp/modules".into(),
            data_store_dir: "/tmp".into(),
            control_map_boot_expiration: std::time::Duration::from_secs(600),
            resume_is_iteration_override: None,
            rebooting_report_before_vote: true,
        })
    }

    fn test_app() -> Router {
        let config = test_config();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKvStore::new());
        let key_store = Arc::new(KeyStore::new(key_path_for(dir.path()), false));
        let auth = Arc::new(AuthorizationManager::spawn(
            key_store,
            AuthTokenRepository::new(store),
            config.servers.clone(),
            None,
            Box::new(|| BTreeMap::new()),
        ));
        build_app(auth, config, Arc::new(TEST_TOKEN.to_string()))
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/health")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn token_returns_empty_token_before_any_fetch() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/token")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["token"], "");
        assert_eq!(json["server_url"], "http://server.invalid");
    }

    #[tokio::test]
    async fn fetch_token_returns_success_true() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/token/fetch"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
    }
}
