// Tracing setup
use anyhow::{Result, anyhow};

pub fn init(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("tracing init: {e}"))?;
    Ok(())
}
