//! Target-provider contract: trait, types, and the registry of test types.
//!
//! A provider goes through two states. The unconfigured [`TargetProvider`]
//! decodes its config block and provisions backend state in `setup`, which
//! hands back a [`ReadyTarget`]. The ready value only carries what request
//! generation needs and is shared, read-only, by every caller of `target`.

pub mod config;
pub mod kvv2;
pub mod readiness;
pub mod registry;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;

use crate::backend::{BackendError, VaultBackend};

pub use readiness::Readiness;
pub use registry::{ProviderFactory, Registry, RegistryError};

/// One synthesized request handed to the harness.
#[derive(Clone, Debug)]
pub struct TargetDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Labels for reporting; never used to build requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetInfo {
    pub method: Method,
    pub path_prefix: String,
}

/// How setup picks the mount path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountNaming {
    Fixed(String),
    /// Fresh UUIDv4 per setup.
    Random,
}

impl MountNaming {
    pub fn resolve(&self) -> String {
        match self {
            MountNaming::Fixed(name) => name.trim_matches('/').to_string(),
            MountNaming::Random => uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SetupOptions {
    pub naming: MountNaming,
    pub readiness: Readiness,
}

impl SetupOptions {
    pub fn new(naming: MountNaming) -> Self {
        Self {
            naming,
            readiness: Readiness::default(),
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigDecodeError {
    #[error("config field `{field}`: {message}")]
    Field { field: String, message: String },
    #[error("config block: {0}")]
    Malformed(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ProvisioningError {
    #[error("mount {path}: {source}")]
    Mount {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("mount {path} not ready after {waited_ms} ms")]
    NotReady { path: String, waited_ms: u128 },
    #[error("populate secret {index} at {path}: {source}")]
    Populate {
        index: usize,
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("header: {0}")]
    Header(String),
}

#[derive(thiserror::Error, Debug)]
#[error("cleanup {path}: {source}")]
pub struct TeardownError {
    pub path: String,
    #[source]
    pub source: BackendError,
}

/// An unconfigured test type, as produced by a [`Registry`] factory.
#[async_trait::async_trait]
pub trait TargetProvider: Send + Sync {
    /// Decode the test's config block; an absent block means defaults.
    fn parse_config(&mut self, block: &serde_yaml::Value) -> Result<(), ConfigDecodeError>;

    /// Provision backend state and return the request-generating half.
    async fn setup(
        &self,
        backend: &dyn VaultBackend,
        opts: &SetupOptions,
    ) -> Result<Box<dyn ReadyTarget>, ProvisioningError>;

    /// Add provider-specific command line flags.
    fn register_flags(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }
}

/// Post-setup state. `target` runs on the hot path from many tasks at once.
#[async_trait::async_trait]
pub trait ReadyTarget: Send + Sync {
    fn target(&self) -> TargetDescriptor;
    fn info(&self) -> TargetInfo;
    async fn cleanup(&self, backend: &dyn VaultBackend) -> Result<(), TeardownError>;
}
