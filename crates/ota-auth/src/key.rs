use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use ota_domain::IdentityData;
use rand::rngs::OsRng;
use tracing::{debug, info};

use crate::error::KeyError;

/// Opaque producer of the device's identity attributes. No caching inside
/// the core — callers trigger collection when a request is enqueued. Boxed
/// so the CLI can supply whatever attribute source fits the device (serial
/// number file, cloud metadata endpoint, static map).
pub type IdentityCollector = Box<dyn Fn() -> IdentityData + Send + Sync>;

/// Device signing key, backed by a single file on disk. Ed25519 resolves the
/// spec's open "RSA or EC" choice.
pub struct KeyStore {
    path: PathBuf,
    static_key: bool,
    signing_key: RwLock<Option<SigningKey>>,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>, static_key: bool) -> Self {
        KeyStore {
            path: path.into(),
            static_key,
            signing_key: RwLock::new(None),
        }
    }

    /// Loads the key from disk into memory, if present. Missing file is not
    /// an error — it just leaves `has_key()` false (cold-start, needs
    /// bootstrap).
    pub fn load(&self) -> Result<(), KeyError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no device key on disk yet");
            return Ok(());
        }
        let bytes = std::fs::read(&self.path).map_err(|e| KeyError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::Malformed("device key is not 32 bytes".to_string()))?;
        *self.signing_key.write().unwrap() = Some(SigningKey::from_bytes(&array));
        Ok(())
    }

    /// Generates a fresh key, replacing any in-memory key. Refuses when
    /// `static_key` is set — a provisioned device must keep its injected key.
    pub fn generate(&self) -> Result<(), KeyError> {
        if self.static_key {
            return Err(KeyError::StaticKeyRefused);
        }
        let key = SigningKey::generate(&mut OsRng);
        *self.signing_key.write().unwrap() = Some(key);
        info!("generated new device key");
        Ok(())
    }

    /// Persists the in-memory key to disk.
    pub fn save(&self) -> Result<(), KeyError> {
        let guard = self.signing_key.read().unwrap();
        let key = guard.as_ref().ok_or(KeyError::NoKeys)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KeyError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(&self.path, key.to_bytes()).map_err(|e| KeyError::Io {
            path: self.path.display().to_string(),
            source: e,
        })
    }

    pub fn has_key(&self) -> bool {
        self.signing_key.read().unwrap().is_some()
    }

    /// Ensures a key exists in memory, bootstrapping (generate + save) if
    /// necessary. Used by the authorization manager's fetch algorithm step 1.
    pub fn ensure_key(&self) -> Result<(), KeyError> {
        if self.has_key() {
            return Ok(());
        }
        self.load()?;
        if self.has_key() {
            return Ok(());
        }
        self.generate()?;
        self.save()
    }

    pub fn public_key_pem(&self) -> Option<String> {
        let guard = self.signing_key.read().unwrap();
        let key = guard.as_ref()?;
        Some(encode_public_key_pem(&key.verifying_key()))
    }

    pub fn sign(&self, bytes: &[u8]) -> Result<Signature, KeyError> {
        let guard = self.signing_key.read().unwrap();
        let key = guard.as_ref().ok_or(KeyError::NoKeys)?;
        Ok(key.sign(bytes))
    }
}

/// Minimal PEM envelope around a raw Ed25519 public key (no ASN.1/SPKI
/// wrapper — the reference spec only asks for "a PEM-shaped string the
/// server can store", not X.509 compatibility).
fn encode_public_key_pem(key: &VerifyingKey) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let encoded = STANDARD.encode(key.as_bytes());
    let mut body = String::new();
    for chunk in encoded.as_bytes().chunks(64) {
        body.push_str(std::str::from_utf8(chunk).unwrap());
        body.push('\n');
    }
    format!("-----BEGIN PUBLIC KEY-----\n{body}-----END PUBLIC KEY-----\n")
}

/// Serializes identity attributes deterministically (`BTreeMap` already
/// orders keys) for inclusion in the signed authorization payload.
pub fn serialize_identity(identity: &IdentityData) -> Vec<u8> {
    serde_json::to_vec(identity).expect("IdentityData is always serializable")
}

pub fn key_path_for(data_store_dir: &Path) -> PathBuf {
    data_store_dir.join("device-key")
}
