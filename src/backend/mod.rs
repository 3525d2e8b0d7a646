//! Backend client boundary: the handful of Vault calls setup and teardown need.

pub mod http;
#[cfg(any(test, feature = "backend-mock"))]
pub mod mock;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

pub use http::{HttpBackend, HttpBackendOptions};

/// Body of a `sys/mounts/<path>` call.
#[derive(Clone, Debug, Serialize)]
pub struct MountInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub options: BTreeMap<String, String>,
}

impl MountInput {
    /// Versioned key-value engine (`kv` with `version = 2`).
    pub fn kv_v2() -> Self {
        let mut options = BTreeMap::new();
        options.insert("version".to_string(), "2".to_string());
        Self {
            kind: "kv".to_string(),
            options,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("request: {0}")]
    Request(String),
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("decode: {0}")]
    Decode(String),
}

/// Authenticated client for the store under test.
///
/// Paths are logical Vault paths (`<mount>/data/<key>`, `sys/mounts/<mount>`);
/// implementations add the `/v1/` API prefix themselves.
#[async_trait::async_trait]
pub trait VaultBackend: Send + Sync {
    /// Base address, e.g. `http://127.0.0.1:8200`.
    fn address(&self) -> &str;
    fn token(&self) -> &str;
    fn namespace(&self) -> Option<&str>;

    async fn mount(&self, path: &str, input: &MountInput) -> Result<(), BackendError>;
    async fn write(&self, path: &str, body: Value) -> Result<(), BackendError>;
    /// `Ok(None)` when the path does not exist.
    async fn read(&self, path: &str) -> Result<Option<Value>, BackendError>;
    async fn delete(&self, path: &str) -> Result<(), BackendError>;
}
