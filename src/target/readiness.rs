//! Waiting out a freshly created mount before writing to it.
//!
//! A new KV v2 mount is briefly unavailable while Vault upgrades it to
//! versioned storage; writes issued in that window fail with
//! "Upgrading from non-versioned to versioned data".
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use super::ProvisioningError;
use crate::backend::VaultBackend;

pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Sleep for a fixed interval.
    Fixed(Duration),
    /// Probe `<mount>/config` every `interval` until it answers or `timeout` passes.
    Poll { interval: Duration, timeout: Duration },
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness::Fixed(DEFAULT_SETTLE)
    }
}

impl Readiness {
    pub async fn wait(&self, backend: &dyn VaultBackend, mount: &str) -> Result<(), ProvisioningError> {
        match self {
            Readiness::Fixed(delay) => {
                if !delay.is_zero() {
                    debug!(mount, delay_ms = delay.as_millis() as u64, "waiting for mount to settle");
                    sleep(*delay).await;
                }
                Ok(())
            }
            Readiness::Poll { interval, timeout } => {
                let start = Instant::now();
                let probe = format!("{mount}/config");
                loop {
                    match backend.read(&probe).await {
                        Ok(Some(_)) => {
                            debug!(mount, waited_ms = start.elapsed().as_millis() as u64, "mount ready");
                            return Ok(());
                        }
                        Ok(None) => debug!(mount, "mount config not found yet"),
                        Err(e) => debug!(mount, error = %e, "mount not ready"),
                    }
                    if start.elapsed() >= *timeout {
                        return Err(ProvisioningError::NotReady {
                            path: mount.to_string(),
                            waited_ms: start.elapsed().as_millis(),
                        });
                    }
                    sleep(*interval).await;
                }
            }
        }
    }
}
