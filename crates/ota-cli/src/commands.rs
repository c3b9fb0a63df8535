use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ota_auth::{key_path_for, AuthorizationManager, IdentityCollector, KeyStore};
use ota_config::{load_config, DeviceConfig};
use ota_control::ControlMapPool;
use ota_engine::{Engine, ReqwestDeploymentServerClient};
use ota_modules::{ProcessModuleExecutor, ProcessStateScriptExecutor, SystemRebooter};
use ota_store::{AuthTokenRepository, ControlMapRepository, KvStore, RedbKvStore, StateDataJournal};
use uuid::Uuid;

// ── Bootstrap ─────────────────────────────────────────────────────────────

pub async fn bootstrap(config_path: PathBuf, force: bool) -> Result<()> {
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    std::fs::create_dir_all(&config.data_store_dir)
        .with_context(|| format!("failed to create {}", config.data_store_dir.display()))?;

    let key_store = KeyStore::new(key_path_for(&config.data_store_dir), config.static_key);
    if force {
        key_store.generate().context("failed to generate device key")?;
        key_store.save().context("failed to persist device key")?;
        println!("Generated new device key.");
    } else {
        key_store.ensure_key().context("failed to bootstrap device key")?;
        println!("Device key present.");
    }

    let token_path = control_token_path(&config.data_store_dir);
    if force || !token_path.exists() {
        let token = generate_control_token();
        write_control_token(&token_path, &token)?;
        println!("Generated control token (written to {}).", token_path.display());
    } else {
        println!("Control token already present at {}.", token_path.display());
    }

    Ok(())
}

// ── Run ───────────────────────────────────────────────────────────────────

pub async fn run(config_path: PathBuf, port: u16) -> Result<()> {
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    std::fs::create_dir_all(&config.data_store_dir)
        .with_context(|| format!("failed to create {}", config.data_store_dir.display()))?;
    let config = Arc::new(config);

    let key_store = Arc::new(KeyStore::new(key_path_for(&config.data_store_dir), config.static_key));
    key_store.ensure_key().context("failed to bootstrap device key")?;

    let kv = Arc::new(
        RedbKvStore::open(&config.data_store_path()).with_context(|| {
            format!("failed to open store at {}", config.data_store_path().display())
        })?,
    );

    let journal = StateDataJournal::new(kv.clone());
    let control_repo = ControlMapRepository::new(kv.clone());
    let control_pool = Arc::new(ControlMapPool::new());
    let token_repo = AuthTokenRepository::new(kv.clone());

    let auth = Arc::new(AuthorizationManager::spawn(
        key_store,
        token_repo,
        config.servers.clone(),
        config.tenant_token.clone(),
        identity_collector(&config),
    ));

    let module_executor = Arc::new(ProcessModuleExecutor::new(config.update_module_dir.clone()));
    let script_executor = Arc::new(ProcessStateScriptExecutor::new(config.state_script_dir.clone()));
    let rebooter = Arc::new(SystemRebooter);
    let server_client = Arc::new(ReqwestDeploymentServerClient::new());

    let engine = Engine::new(
        config.clone(),
        journal,
        control_repo,
        control_pool,
        module_executor,
        script_executor,
        rebooter,
        auth.clone(),
        server_client,
    );

    let control_token = Arc::new(read_or_generate_control_token(&config.data_store_dir)?);
    let app = ota_api::build_app(auth, config.clone(), control_token);
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind control API to {addr}"))?;
    tracing::info!(%addr, "control API listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "control API server exited");
        }
    });

    drive(engine, config).await
}

async fn drive<K: KvStore>(mut engine: Engine<K>, config: Arc<DeviceConfig>) -> Result<()> {
    engine
        .rehydrate_control_maps()
        .await
        .context("failed to rehydrate control maps")?;

    loop {
        match engine.run_once().await {
            Ok(state) => tracing::debug!(%state, "update cycle settled"),
            Err(e) => tracing::warn!(error = %e, "update cycle failed, will retry"),
        }
        tokio::time::sleep(config.update_poll_interval).await;
    }
}

fn identity_collector(config: &DeviceConfig) -> IdentityCollector {
    let device_type = config.device_type.clone();
    let device_id = device_id(&config.data_store_dir).unwrap_or_default();
    Box::new(move || {
        let mut identity = BTreeMap::new();
        identity.insert("device_type".to_string(), device_type.clone());
        identity.insert("id".to_string(), device_id.clone());
        identity
    })
}

/// A stable random identifier for this device, generated once and persisted
/// alongside the device key. Stands in for whatever hardware-derived
/// attributes (MAC address, serial number) a real identity collector would
/// report — none of those are available in a portable way here.
fn device_id(data_store_dir: &Path) -> Result<String> {
    let path = data_store_dir.join("device-id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim().to_string();
        if !existing.is_empty() {
            return Ok(existing);
        }
    }
    let id = Uuid::new_v4().to_string();
    std::fs::write(&path, &id).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(id)
}

// ── Status ────────────────────────────────────────────────────────────────

pub async fn status(config_path: PathBuf, port: u16) -> Result<()> {
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let token = read_control_token(&config.data_store_dir)?;
    let url = format!("http://127.0.0.1:{port}/token");

    let body: serde_json::Value = authed_client(&token)
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach control API at {url}"))?
        .json()
        .await
        .context("failed to parse control API response")?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

// ── Control token helpers ─────────────────────────────────────────────────

fn control_token_path(data_store_dir: &Path) -> PathBuf {
    data_store_dir.join("control-token")
}

fn generate_control_token() -> String {
    let a = Uuid::new_v4().to_string().replace('-', "");
    let b = Uuid::new_v4().to_string().replace('-', "");
    format!("{a}{b}")
}

fn write_control_token(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, token)
        .with_context(|| format!("failed to write control token to {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

fn read_control_token(data_store_dir: &Path) -> Result<String> {
    let path = control_token_path(data_store_dir);
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .with_context(|| {
            format!(
                "no control token at {}. Run `ota-client bootstrap` first.",
                path.display()
            )
        })
}

fn read_or_generate_control_token(data_store_dir: &Path) -> Result<String> {
    let path = control_token_path(data_store_dir);
    if let Ok(existing) = std::fs::read_to_string(&path).map(|s| s.trim().to_string()) {
        if !existing.is_empty() {
            return Ok(existing);
        }
    }
    let token = generate_control_token();
    write_control_token(&path, &token)?;
    Ok(token)
}

fn authed_client(token: &str) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    let bearer = format!("Bearer {token}");
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&bearer)
            .expect("token contains invalid header characters"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .expect("failed to build HTTP client")
}
