//! KV version 2 read and write tests (`kvv2_read`, `kvv2_write`).
//!
//! Setup mounts a fresh KV v2 engine and fills it with `numkvs` placeholder
//! secrets named `secret-1` .. `secret-N`. Each generated target then reads or
//! overwrites one of those secrets, picked uniformly at random.
use bytes::Bytes;
use rand::Rng;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::json;
use tracing::{debug, info};

use super::config::ConfigBlock;
use super::{
    ConfigDecodeError, ProvisioningError, ReadyTarget, Registry, RegistryError, SetupOptions,
    TargetDescriptor, TargetInfo, TargetProvider, TeardownError,
};
use crate::backend::{MountInput, VaultBackend};

pub const KVV2_READ_TEST_TYPE: &str = "kvv2_read";
pub const KVV2_WRITE_TEST_TYPE: &str = "kvv2_write";

const DEFAULT_KV_SIZE: usize = 1;
const DEFAULT_NUM_KVS: usize = 1000;
const FILLER: char = 'a';

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(KVV2_READ_TEST_TYPE, || {
        Box::new(KvV2Provider::new(KvAction::Read)) as Box<dyn TargetProvider>
    })?;
    registry.register(KVV2_WRITE_TEST_TYPE, || {
        Box::new(KvV2Provider::new(KvAction::Write)) as Box<dyn TargetProvider>
    })?;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KvAction {
    Read,
    Write,
}

impl KvAction {
    pub fn method(self) -> Method {
        match self {
            KvAction::Read => Method::GET,
            KvAction::Write => Method::POST,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KvV2Config {
    /// Length of each written value.
    pub kvsize: usize,
    /// Number of secrets in the corpus.
    pub numkvs: usize,
}

impl Default for KvV2Config {
    fn default() -> Self {
        Self {
            kvsize: DEFAULT_KV_SIZE,
            numkvs: DEFAULT_NUM_KVS,
        }
    }
}

impl KvV2Config {
    pub fn decode(block: &serde_yaml::Value) -> Result<Self, ConfigDecodeError> {
        let mut block = ConfigBlock::new(block)?;
        let config = Self {
            kvsize: block.take_positive("kvsize", DEFAULT_KV_SIZE)?,
            numkvs: block.take_positive("numkvs", DEFAULT_NUM_KVS)?,
        };
        block.finish()?;
        Ok(config)
    }
}

pub struct KvV2Provider {
    action: KvAction,
    config: KvV2Config,
}

impl KvV2Provider {
    pub fn new(action: KvAction) -> Self {
        Self {
            action,
            config: KvV2Config::default(),
        }
    }

    pub fn config(&self) -> KvV2Config {
        self.config
    }
}

#[async_trait::async_trait]
impl TargetProvider for KvV2Provider {
    fn parse_config(&mut self, block: &serde_yaml::Value) -> Result<(), ConfigDecodeError> {
        self.config = KvV2Config::decode(block)?;
        Ok(())
    }

    async fn setup(
        &self,
        backend: &dyn VaultBackend,
        opts: &SetupOptions,
    ) -> Result<Box<dyn ReadyTarget>, ProvisioningError> {
        let mount = opts.naming.resolve();
        backend
            .mount(&mount, &MountInput::kv_v2())
            .await
            .map_err(|source| ProvisioningError::Mount {
                path: mount.clone(),
                source,
            })?;
        info!(%mount, numkvs = self.config.numkvs, "mounted kv v2");

        opts.readiness.wait(backend, &mount).await?;

        let placeholder = json!({"data": {"foo": 1}});
        for index in 1..=self.config.numkvs {
            let path = format!("{mount}/data/secret-{index}");
            backend
                .write(&path, placeholder.clone())
                .await
                .map_err(|source| ProvisioningError::Populate {
                    index,
                    path: path.clone(),
                    source,
                })?;
            debug!(%path, "wrote placeholder");
        }
        info!(%mount, count = self.config.numkvs, "corpus populated");

        let target = KvV2Target::new(
            self.action,
            backend.address(),
            format!("/v1/{mount}"),
            vault_headers(backend.token(), backend.namespace())?,
            self.config,
        );
        Ok(Box::new(target))
    }
}

fn vault_headers(token: &str, namespace: Option<&str>) -> Result<HeaderMap, ProvisioningError> {
    let value = |v: &str| {
        HeaderValue::from_str(v).map_err(|e| ProvisioningError::Header(e.to_string()))
    };
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("x-vault-token"), value(token)?);
    headers.insert(
        HeaderName::from_static("x-vault-namespace"),
        value(namespace.unwrap_or_default())?,
    );
    Ok(headers)
}

/// Ready KV v2 test: everything `target` reads is fixed at construction.
#[derive(Clone, Debug)]
pub struct KvV2Target {
    action: KvAction,
    address: String,
    path_prefix: String,
    headers: HeaderMap,
    numkvs: usize,
    write_body: Bytes,
}

impl KvV2Target {
    pub fn new(
        action: KvAction,
        address: &str,
        path_prefix: String,
        headers: HeaderMap,
        config: KvV2Config,
    ) -> Self {
        let value: String = std::iter::repeat_n(FILLER, config.kvsize).collect();
        let write_body = Bytes::from(json!({"data": {"foo": value}}).to_string());
        Self {
            action,
            address: address.trim_end_matches('/').to_string(),
            path_prefix,
            headers,
            numkvs: config.numkvs,
            write_body,
        }
    }

    fn secret_url(&self, index: usize) -> String {
        format!("{}{}/data/secret-{}", self.address, self.path_prefix, index)
    }
}

/// `/v1/<mount>` to the `sys/mounts/<mount>` path that removes it.
pub fn management_path(path_prefix: &str) -> String {
    let mount = path_prefix.strip_prefix("/v1/").unwrap_or(path_prefix);
    format!("sys/mounts/{}", mount.trim_matches('/'))
}

#[async_trait::async_trait]
impl ReadyTarget for KvV2Target {
    fn target(&self) -> TargetDescriptor {
        let index = rand::rng().random_range(1..=self.numkvs);
        let body = match self.action {
            KvAction::Read => None,
            KvAction::Write => Some(self.write_body.clone()),
        };
        TargetDescriptor {
            method: self.action.method(),
            url: self.secret_url(index),
            headers: self.headers.clone(),
            body,
        }
    }

    fn info(&self) -> TargetInfo {
        TargetInfo {
            method: self.action.method(),
            path_prefix: self.path_prefix.clone(),
        }
    }

    async fn cleanup(&self, backend: &dyn VaultBackend) -> Result<(), TeardownError> {
        let path = management_path(&self.path_prefix);
        backend
            .delete(&path)
            .await
            .map_err(|source| TeardownError { path: path.clone(), source })?;
        info!(%path, "unmounted kv v2");
        Ok(())
    }
}
