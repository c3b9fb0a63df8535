use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use ota_domain::AuthToken;
use ota_store::{AuthTokenRepository, KvStore};
use reqwest::StatusCode;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::key::{serialize_identity, IdentityCollector, KeyStore};

const GET_TOKEN_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_QUEUE_DEPTH: usize = 32;

/// Events broadcast to subscribers of the authorization manager.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    TokenStateChanged(AuthToken),
    Error(String),
}

enum Command {
    GetToken(oneshot::Sender<AuthToken>),
    FetchToken(oneshot::Sender<bool>),
    Subscribe(String, oneshot::Sender<mpsc::Receiver<AuthEvent>>),
    Reauthorize(oneshot::Sender<Result<AuthToken, AuthError>>),
}

#[derive(Serialize)]
struct AuthRequestPayload {
    identity_data: ota_domain::IdentityData,
    public_key: String,
    signature: String,
}

/// Owns the device's authorization token end to end: bootstraps the device
/// key, serializes all fetch attempts behind a single-slot worker, and fans
/// out state changes to named subscribers.
pub struct AuthorizationManager {
    requests: mpsc::Sender<Command>,
    shutdown: Arc<Notify>,
    join: StdMutex<Option<JoinHandle<()>>>,
}

impl AuthorizationManager {
    pub fn spawn<K: KvStore>(
        key_store: Arc<KeyStore>,
        token_repo: AuthTokenRepository<K>,
        servers: Vec<String>,
        tenant_token: Option<String>,
        identity_collector: IdentityCollector,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (fetch_tx, fetch_rx) = mpsc::channel(1);
        let shutdown = Arc::new(Notify::new());
        let shutdown_task = shutdown.clone();
        let client = reqwest::Client::new();

        let join = tokio::spawn(run(
            requests_rx,
            fetch_tx,
            fetch_rx,
            key_store,
            token_repo,
            client,
            servers,
            tenant_token,
            identity_collector,
            shutdown_task,
        ));

        AuthorizationManager {
            requests: requests_tx,
            shutdown,
            join: StdMutex::new(Some(join)),
        }
    }

    /// IPC-equivalent `GetToken`: returns the current cached token. Bounded
    /// by a 5-second timeout.
    pub async fn get_token(&self) -> Result<AuthToken, AuthError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Command::GetToken(reply_tx))
            .await
            .map_err(|_| AuthError::ManagerStopped)?;
        tokio::time::timeout(GET_TOKEN_TIMEOUT, reply_rx)
            .await
            .map_err(|_| AuthError::Timeout)?
            .map_err(|_| AuthError::ManagerStopped)
    }

    /// IPC-equivalent `FetchToken`: enqueues an authorization attempt and
    /// returns whether it was accepted. Does not wait for the fetch itself
    /// to conclude — subscribe for `TOKEN_STATE_CHANGED`/error events.
    pub async fn fetch_token(&self) -> Result<bool, AuthError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Command::FetchToken(reply_tx))
            .await
            .map_err(|_| AuthError::ManagerStopped)?;
        tokio::time::timeout(GET_TOKEN_TIMEOUT, reply_rx)
            .await
            .map_err(|_| AuthError::Timeout)?
            .map_err(|_| AuthError::ManagerStopped)
    }

    /// Registers a named subscriber. If a valid token is already cached, an
    /// immediate startup `TokenStateChanged` is delivered so late
    /// subscribers are not starved until the next natural fetch.
    pub async fn subscribe(
        &self,
        name: impl Into<String>,
    ) -> Result<mpsc::Receiver<AuthEvent>, AuthError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Command::Subscribe(name.into(), reply_tx))
            .await
            .map_err(|_| AuthError::ManagerStopped)?;
        reply_rx.await.map_err(|_| AuthError::ManagerStopped)
    }

    /// Clears the cached token and makes a single synchronous reauthorize
    /// attempt, returning the fresh token on success. For the
    /// clear-then-retry-once path a 401 from the deployment server drives.
    pub async fn reauthorize(&self) -> Result<AuthToken, AuthError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Command::Reauthorize(reply_tx))
            .await
            .map_err(|_| AuthError::ManagerStopped)?;
        reply_rx.await.map_err(|_| AuthError::ManagerStopped)?
    }

    /// Explicit shutdown — no `Drop`-triggered cleanup.
    pub async fn stop(&self) {
        self.shutdown.notify_one();
        let handle = self.join.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run<K: KvStore>(
    mut requests_rx: mpsc::Receiver<Command>,
    fetch_tx: mpsc::Sender<()>,
    mut fetch_rx: mpsc::Receiver<()>,
    key_store: Arc<KeyStore>,
    token_repo: AuthTokenRepository<K>,
    client: reqwest::Client,
    servers: Vec<String>,
    tenant_token: Option<String>,
    identity_collector: IdentityCollector,
    shutdown: Arc<Notify>,
) {
    let fingerprint = ota_store::fingerprint(
        servers.first().map(String::as_str).unwrap_or_default(),
        tenant_token.as_deref().unwrap_or_default(),
    );
    if let Err(e) = token_repo.invalidate_if_fingerprint_changed(&fingerprint).await {
        warn!(error = %e, "failed to check auth token cache invalidator");
    }
    let mut current_token = token_repo.load().await.ok().flatten().unwrap_or_default();
    let mut subscribers: Vec<(String, mpsc::Sender<AuthEvent>)> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("authorization manager stopping");
                break;
            }
            maybe_cmd = requests_rx.recv() => {
                match maybe_cmd {
                    None => break,
                    Some(Command::GetToken(reply)) => {
                        let _ = reply.send(current_token.clone());
                    }
                    Some(Command::FetchToken(reply)) => {
                        let _ = reply.send(true);
                        // try-send semantics: a fetch already queued or in flight
                        // coalesces this request silently.
                        let _ = fetch_tx.try_send(());
                    }
                    Some(Command::Subscribe(name, reply)) => {
                        let (tx, rx) = mpsc::channel(1);
                        if !current_token.is_empty() {
                            let _ = tx.try_send(AuthEvent::TokenStateChanged(current_token.clone()));
                        }
                        subscribers.push((name, tx));
                        let _ = reply.send(rx);
                    }
                    Some(Command::Reauthorize(reply)) => {
                        current_token = AuthToken::default();
                        let _ = token_repo.clear().await;
                        let result = perform_fetch(&key_store, &identity_collector, &client, &servers, &token_repo, &fingerprint).await;
                        match &result {
                            Ok(token) => {
                                current_token = token.clone();
                                broadcast(&subscribers, AuthEvent::TokenStateChanged(token.clone()));
                            }
                            Err(e) => broadcast(&subscribers, AuthEvent::Error(e.to_string())),
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            Some(()) = fetch_rx.recv() => {
                match perform_fetch(&key_store, &identity_collector, &client, &servers, &token_repo, &fingerprint).await {
                    Ok(token) => {
                        current_token = token.clone();
                        broadcast(&subscribers, AuthEvent::TokenStateChanged(token));
                    }
                    Err(e) => {
                        warn!(error = %e, "authorization fetch failed on every server");
                        broadcast(&subscribers, AuthEvent::Error(e.to_string()));
                    }
                }
            }
        }
    }
}

fn broadcast(subscribers: &[(String, mpsc::Sender<AuthEvent>)], event: AuthEvent) {
    for (name, tx) in subscribers {
        if tx.try_send(event.clone()).is_err() {
            debug!(subscriber = %name, "dropped auth event, subscriber slow or full");
        }
    }
}

async fn perform_fetch<K: KvStore>(
    key_store: &KeyStore,
    identity_collector: &IdentityCollector,
    client: &reqwest::Client,
    servers: &[String],
    token_repo: &AuthTokenRepository<K>,
    fingerprint: &str,
) -> Result<AuthToken, AuthError> {
    key_store.ensure_key()?;

    let identity = identity_collector();
    let payload = serialize_identity(&identity);
    let signature = key_store.sign(&payload)?;
    let public_key = key_store.public_key_pem().ok_or(crate::error::KeyError::NoKeys)?;

    let signature_b64 = {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        STANDARD.encode(signature.to_bytes())
    };

    let body = AuthRequestPayload {
        identity_data: identity,
        public_key,
        signature: signature_b64,
    };

    let mut last_error = None;
    for server in servers {
        let url = format!(
            "{}/api/devices/v1/authentication/auth_requests",
            server.trim_end_matches('/')
        );
        match client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                let bytes = match resp.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        last_error = Some(format!("{server}: {e}"));
                        continue;
                    }
                };
                let token = AuthToken(bytes.to_vec());
                token_repo.save(&token, fingerprint).await?;
                return Ok(token);
            }
            Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                token_repo.clear().await?;
                last_error = Some(format!("{server}: unauthorized"));
            }
            Ok(resp) => {
                last_error = Some(format!("{server}: http {}", resp.status()));
            }
            Err(e) => {
                last_error = Some(format!("{server}: {e}"));
            }
        }
    }

    Err(AuthError::AllServersFailed(
        last_error.unwrap_or_else(|| "no servers configured".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_store::MemoryKvStore;
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity_collector() -> IdentityCollector {
        Box::new(|| {
            let mut map = BTreeMap::new();
            map.insert("mac".to_string(), "00:11:22:33:44:55".to_string());
            map
        })
    }

    #[tokio::test]
    async fn get_token_returns_empty_before_any_fetch() {
        let key_store = Arc::new(KeyStore::new(
            tempfile::tempdir().unwrap().path().join("key"),
            false,
        ));
        let repo = AuthTokenRepository::new(Arc::new(MemoryKvStore::new()));
        let manager = AuthorizationManager::spawn(
            key_store,
            repo,
            vec!["http://127.0.0.1:1".into()],
            None,
            identity_collector(),
        );

        let token = manager.get_token().await.unwrap();
        assert!(token.is_empty());
        manager.stop().await;
    }

    #[tokio::test]
    async fn fetch_token_broadcasts_token_state_changed_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/devices/v1/authentication/auth_requests"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"opaque-token".to_vec(), "application/octet-stream"))
            .mount(&server)
            .await;

        let key_store = Arc::new(KeyStore::new(
            tempfile::tempdir().unwrap().path().join("key"),
            false,
        ));
        let repo = AuthTokenRepository::new(Arc::new(MemoryKvStore::new()));
        let manager = AuthorizationManager::spawn(
            key_store,
            repo,
            vec![server.uri()],
            None,
            identity_collector(),
        );

        let mut events = manager.subscribe("test").await.unwrap();
        assert!(manager.fetch_token().await.unwrap());

        let event = events.recv().await.unwrap();
        match event {
            AuthEvent::TokenStateChanged(token) => assert_eq!(token.0, b"opaque-token"),
            other => panic!("unexpected event: {other:?}"),
        }

        manager.stop().await;
    }

    #[tokio::test]
    async fn startup_broadcast_replays_cached_token_to_late_subscriber() {
        let store = Arc::new(MemoryKvStore::new());
        let repo = AuthTokenRepository::new(store.clone());
        let fp = ota_store::fingerprint("http://127.0.0.1:1", "");
        repo.save(&AuthToken(b"already-on-disk".to_vec()), &fp).await.unwrap();

        let key_store = Arc::new(KeyStore::new(
            tempfile::tempdir().unwrap().path().join("key"),
            false,
        ));
        let manager = AuthorizationManager::spawn(
            key_store,
            AuthTokenRepository::new(store),
            vec!["http://127.0.0.1:1".into()],
            None,
            identity_collector(),
        );

        let mut events = manager.subscribe("late").await.unwrap();
        let event = events.recv().await.unwrap();
        match event {
            AuthEvent::TokenStateChanged(token) => assert_eq!(token.0, b"already-on-disk"),
            other => panic!("unexpected event: {other:?}"),
        }
        manager.stop().await;
    }

    #[tokio::test]
    async fn unauthorized_response_clears_cached_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/devices/v1/authentication/auth_requests"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryKvStore::new());
        let repo = AuthTokenRepository::new(store.clone());
        let fp = ota_store::fingerprint(&server.uri(), "");
        repo.save(&AuthToken(b"stale".to_vec()), &fp).await.unwrap();

        let key_store = Arc::new(KeyStore::new(
            tempfile::tempdir().unwrap().path().join("key"),
            false,
        ));
        let manager = AuthorizationManager::spawn(
            key_store,
            AuthTokenRepository::new(store.clone()),
            vec![server.uri()],
            None,
            identity_collector(),
        );

        let mut events = manager.subscribe("test").await.unwrap();
        manager.fetch_token().await.unwrap();
        match events.recv().await.unwrap() {
            AuthEvent::Error(_) => {}
            other => panic!("unexpected event: {other:?}"),
        }

        let repo = AuthTokenRepository::new(store);
        assert!(repo.load().await.unwrap().is_none());
        manager.stop().await;
    }

    #[tokio::test]
    async fn startup_with_changed_fingerprint_discards_cached_token() {
        let store = Arc::new(MemoryKvStore::new());
        let repo = AuthTokenRepository::new(store.clone());
        let stale_fp = ota_store::fingerprint("http://127.0.0.1:1", "old-tenant");
        repo.save(&AuthToken(b"under-old-tenant".to_vec()), &stale_fp).await.unwrap();

        let key_store = Arc::new(KeyStore::new(
            tempfile::tempdir().unwrap().path().join("key"),
            false,
        ));
        let manager = AuthorizationManager::spawn(
            key_store,
            AuthTokenRepository::new(store),
            vec!["http://127.0.0.1:1".into()],
            Some("new-tenant".to_string()),
            identity_collector(),
        );

        let token = manager.get_token().await.unwrap();
        assert!(token.is_empty());
        manager.stop().await;
    }

    #[tokio::test]
    async fn reauthorize_clears_token_and_fetches_a_fresh_one() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/devices/v1/authentication/auth_requests"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"fresh-token".to_vec(), "application/octet-stream"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryKvStore::new());
        let repo = AuthTokenRepository::new(store.clone());
        let fp = ota_store::fingerprint(&server.uri(), "");
        repo.save(&AuthToken(b"stale".to_vec()), &fp).await.unwrap();

        let key_store = Arc::new(KeyStore::new(
            tempfile::tempdir().unwrap().path().join("key"),
            false,
        ));
        let manager = AuthorizationManager::spawn(
            key_store,
            AuthTokenRepository::new(store),
            vec![server.uri()],
            None,
            identity_collector(),
        );

        let fresh = manager.reauthorize().await.unwrap();
        assert_eq!(fresh.0, b"fresh-token");
        assert_eq!(manager.get_token().await.unwrap().0, b"fresh-token");
        manager.stop().await;
    }
}
