//! Benchmark config file (YAML).
//!
//! ```yaml
//! duration_secs: 10
//! rate: 100
//! workers: 10
//! random_mounts: true
//! cleanup: true
//! tests:
//!   - type: kvv2_read
//!     name: static_read
//!     weight: 80
//!     config:
//!       numkvs: 100
//!       kvsize: 16
//! ```
use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::target::MountNaming;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    /// Requests per second across all tests; absent or <= 0 means unthrottled.
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "yes")]
    pub random_mounts: bool,
    #[serde(default = "yes")]
    pub cleanup: bool,
    pub tests: Vec<TestBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Handed to the provider's `parse_config` untouched.
    #[serde(default)]
    pub config: serde_yaml::Value,
}

fn default_duration_secs() -> u64 {
    10
}

fn default_workers() -> usize {
    10
}

fn default_weight() -> u32 {
    1
}

fn yes() -> bool {
    true
}

impl BenchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("in config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: BenchConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tests.is_empty() {
            bail!("no tests configured");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.duration_secs == 0 {
            bail!("duration_secs must be at least 1");
        }
        let mut names = HashSet::new();
        for test in &self.tests {
            if !names.insert(test.name.as_str()) {
                bail!("duplicate test name: {}", test.name);
            }
            if test.weight == 0 {
                bail!("test {}: weight must be positive", test.name);
            }
        }
        Ok(())
    }

    /// Effective rate, `None` when unthrottled.
    pub fn effective_rate(&self) -> Option<f64> {
        self.rate.filter(|r| *r > 0.0)
    }

    /// Random mounts get a fresh UUID; otherwise the test name is the mount path.
    pub fn naming_for(&self, test: &TestBlock) -> MountNaming {
        if self.random_mounts {
            MountNaming::Random
        } else {
            MountNaming::Fixed(test.name.clone())
        }
    }
}
