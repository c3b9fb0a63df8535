use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no device key present, bootstrap required")]
    NoKeys,

    #[error("key regeneration refused: static_key is set")]
    StaticKeyRefused,

    #[error("key I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed key material on disk: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] ota_store::StoreError),

    #[error("every configured server rejected the identity payload: {0}")]
    AllServersFailed(String),

    #[error("authorization manager request timed out")]
    Timeout,

    #[error("authorization manager has shut down")]
    ManagerStopped,
}
