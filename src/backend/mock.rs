//! In-memory stand-in for a Vault server (feature `backend-mock`).
//!
//! Models just enough of the KV v2 surface for provisioning tests: mounts,
//! `data/` entries, mount removal, and the brief unavailability window a fresh
//! KV v2 mount goes through while it upgrades to versioned storage.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;

use super::{BackendError, MountInput, VaultBackend};

const UPGRADING: &str = "Upgrading from non-versioned to versioned data. This backend will be unavailable for a brief period and will resume service shortly.";

struct MockMount {
    input: MountInput,
    created: Instant,
    entries: BTreeMap<String, Value>,
}

#[derive(Default)]
struct MockState {
    mounts: BTreeMap<String, MockMount>,
    settle: Duration,
    fail_mount: Option<String>,
    fail_write_suffix: Option<String>,
    fail_delete: Option<String>,
    writes: usize,
    probes: usize,
}

#[derive(Clone)]
pub struct MockBackend {
    address: String,
    token: String,
    namespace: Option<String>,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            address: "http://vault.mock:8200".to_string(),
            token: "mock-token".to_string(),
            namespace: None,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// New mounts reject writes and readiness probes for `settle` after creation.
    pub fn with_settle(self, settle: Duration) -> Self {
        self.lock().settle = settle;
        self
    }

    pub fn fail_mounts(&self, message: impl Into<String>) {
        self.lock().fail_mount = Some(message.into());
    }

    /// Reject any write whose path ends with `suffix`.
    pub fn fail_writes_ending_with(&self, suffix: impl Into<String>) {
        self.lock().fail_write_suffix = Some(suffix.into());
    }

    pub fn fail_deletes(&self, message: impl Into<String>) {
        self.lock().fail_delete = Some(message.into());
    }

    pub fn mounts(&self) -> Vec<String> {
        self.lock().mounts.keys().cloned().collect()
    }

    pub fn mount_options(&self, mount: &str) -> Option<MountInput> {
        self.lock().mounts.get(mount).map(|m| m.input.clone())
    }

    /// Keys stored under `<mount>/data/`, in key order.
    pub fn keys(&self, mount: &str) -> Vec<String> {
        self.lock()
            .mounts
            .get(mount)
            .map(|m| m.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn probe_count(&self) -> usize {
        self.lock().probes
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // Poisoning is ignored; state stays readable after a test thread panics.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Split `<mount>/<rest>` against the known mounts (longest match wins).
fn resolve<'a>(state: &MockState, path: &'a str) -> Option<(String, &'a str)> {
    let path = path.trim_matches('/');
    state
        .mounts
        .keys()
        .filter(|m| path == m.as_str() || path.starts_with(&format!("{m}/")))
        .max_by_key(|m| m.len())
        .map(|m| (m.clone(), path[m.len()..].trim_start_matches('/')))
}

fn status(status: u16, message: impl Into<String>) -> BackendError {
    BackendError::Status {
        status,
        message: message.into(),
    }
}

#[async_trait::async_trait]
impl VaultBackend for MockBackend {
    fn address(&self) -> &str {
        &self.address
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    async fn mount(&self, path: &str, input: &MountInput) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_mount {
            return Err(status(403, message.clone()));
        }
        let path = path.trim_matches('/').to_string();
        if state.mounts.contains_key(&path) {
            return Err(status(400, format!("path is already in use at {path}/")));
        }
        state.mounts.insert(
            path,
            MockMount {
                input: input.clone(),
                created: Instant::now(),
                entries: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn write(&self, path: &str, body: Value) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(suffix) = &state.fail_write_suffix {
            if path.ends_with(suffix.as_str()) {
                return Err(status(500, format!("injected write failure at {path}")));
            }
        }
        let settle = state.settle;
        let (mount, rest) =
            resolve(&state, path).ok_or_else(|| status(404, format!("no handler for route {path}")))?;
        let rest = rest.to_string();
        let entry = state
            .mounts
            .get_mut(&mount)
            .ok_or_else(|| status(404, format!("no handler for route {path}")))?;
        if entry.created.elapsed() < settle {
            return Err(status(503, UPGRADING));
        }
        let key = rest
            .strip_prefix("data/")
            .ok_or_else(|| status(405, format!("unsupported path {path}")))?
            .to_string();
        if body.get("data").is_none() {
            return Err(status(400, "no data provided"));
        }
        entry.entries.insert(key, body);
        state.writes += 1;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Value>, BackendError> {
        let mut state = self.lock();
        let settle = state.settle;
        let Some((mount, rest)) = resolve(&state, path) else {
            return Ok(None);
        };
        let rest = rest.to_string();
        if rest == "config" {
            state.probes += 1;
        }
        let Some(entry) = state.mounts.get(&mount) else {
            return Ok(None);
        };
        if entry.created.elapsed() < settle {
            return Err(status(503, UPGRADING));
        }
        if rest == "config" {
            return Ok(Some(json!({"data": {"max_versions": 0, "cas_required": false}})));
        }
        Ok(rest
            .strip_prefix("data/")
            .and_then(|key| entry.entries.get(key))
            .cloned())
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_delete {
            return Err(status(403, message.clone()));
        }
        match path.trim_matches('/').strip_prefix("sys/mounts/") {
            Some(mount) => {
                state.mounts.remove(mount);
                Ok(())
            }
            None => {
                let (mount, rest) = resolve(&state, path)
                    .ok_or_else(|| status(404, format!("no handler for route {path}")))?;
                let rest = rest.to_string();
                if let Some(entry) = state.mounts.get_mut(&mount) {
                    if let Some(key) = rest.strip_prefix("data/") {
                        entry.entries.remove(key);
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_under_mount() {
        let backend = MockBackend::new();
        backend.mount("bench", &MountInput::kv_v2()).await.expect("mount");
        backend
            .write("bench/data/secret-1", json!({"data": {"foo": 1}}))
            .await
            .expect("write");
        let got = backend.read("bench/data/secret-1").await.expect("read");
        assert_eq!(got, Some(json!({"data": {"foo": 1}})));
        assert_eq!(backend.keys("bench"), vec!["secret-1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_mount_is_rejected() {
        let backend = MockBackend::new();
        backend.mount("bench", &MountInput::kv_v2()).await.expect("mount");
        let err = backend.mount("bench", &MountInput::kv_v2()).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn unmount_removes_entries() {
        let backend = MockBackend::new();
        backend.mount("bench", &MountInput::kv_v2()).await.expect("mount");
        backend
            .write("bench/data/secret-1", json!({"data": {"foo": 1}}))
            .await
            .expect("write");
        backend.delete("sys/mounts/bench").await.expect("delete");
        assert!(backend.mounts().is_empty());
        assert_eq!(backend.read("bench/data/secret-1").await.expect("read"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_mount_rejects_writes_until_settled() {
        let backend = MockBackend::new().with_settle(Duration::from_secs(2));
        backend.mount("bench", &MountInput::kv_v2()).await.expect("mount");
        let err = backend
            .write("bench/data/secret-1", json!({"data": {"foo": 1}}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Upgrading"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        backend
            .write("bench/data/secret-1", json!({"data": {"foo": 1}}))
            .await
            .expect("write after settle");
    }
}
