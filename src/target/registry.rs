use std::collections::BTreeMap;

use super::{TargetProvider, kvv2};

pub type ProviderFactory = Box<dyn Fn() -> Box<dyn TargetProvider> + Send + Sync>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown test type: {0}")]
    UnknownTestType(String),
    #[error("test type already registered: {0}")]
    Duplicate(String),
}

/// Test-type name to factory. Owned by the harness; providers add themselves
/// through their module's `register` function.
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every provider shipped with this crate.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        kvv2::register(&mut registry)?;
        Ok(registry)
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn TargetProvider> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.factories.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    /// Fresh, unconfigured provider for `name`.
    pub fn build(&self, name: &str) -> Result<Box<dyn TargetProvider>, RegistryError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| RegistryError::UnknownTestType(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Let every registered provider add its flags to `cmd`.
    pub fn register_flags(&self, mut cmd: clap::Command) -> clap::Command {
        for factory in self.factories.values() {
            cmd = factory().register_flags(cmd);
        }
        cmd
    }
}
