//! Test lifecycle around the attack: decode every block, set every test up,
//! and tear the mounts down again.
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::backend::VaultBackend;
use crate::config::BenchConfig;
use crate::target::{ReadyTarget, Readiness, Registry, SetupOptions, TargetProvider};

/// Build a provider per test and decode its config block, before any backend call.
pub fn decode_all(registry: &Registry, bench: &BenchConfig) -> Result<Vec<Box<dyn TargetProvider>>> {
    let mut providers: Vec<Box<dyn TargetProvider>> = Vec::with_capacity(bench.tests.len());
    for test in &bench.tests {
        let mut provider = registry
            .build(&test.kind)
            .with_context(|| format!("test {}", test.name))?;
        provider
            .parse_config(&test.config)
            .with_context(|| format!("test {} ({})", test.name, test.kind))?;
        providers.push(provider);
    }
    Ok(providers)
}

/// Set up every test in order; on failure, tear down the ones already set up.
pub async fn setup_all(
    backend: &dyn VaultBackend,
    bench: &BenchConfig,
    providers: Vec<Box<dyn TargetProvider>>,
    readiness: &Readiness,
) -> Result<Vec<Arc<dyn ReadyTarget>>> {
    let mut ready: Vec<Arc<dyn ReadyTarget>> = Vec::with_capacity(providers.len());
    for (test, provider) in bench.tests.iter().zip(providers) {
        let opts = SetupOptions::new(bench.naming_for(test)).with_readiness(readiness.clone());
        info!(test = %test.name, kind = %test.kind, "setting up");
        match provider.setup(backend, &opts).await {
            Ok(target) => ready.push(Arc::from(target)),
            Err(e) => {
                error!(test = %test.name, error = %e, "setup failed");
                cleanup_all(backend, bench, &ready).await;
                return Err(e).with_context(|| format!("setting up test {}", test.name));
            }
        }
    }
    Ok(ready)
}

/// Tear down each ready test; failures are logged and the rest still run.
pub async fn cleanup_all(backend: &dyn VaultBackend, bench: &BenchConfig, ready: &[Arc<dyn ReadyTarget>]) {
    for (test, target) in bench.tests.iter().zip(ready) {
        if let Err(e) = target.cleanup(backend).await {
            warn!(test = %test.name, error = %e, "cleanup failed");
        }
    }
}
