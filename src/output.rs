use crate::metrics::stats::StatsSnapshot;
use anyhow::{Context, Result};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

pub enum OutputWriter {
    Csv(BufWriter<tokio::fs::File>),
    Stdout,
}

impl OutputWriter {
    pub async fn new_csv(path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let file = File::create(path)
            .await
            .with_context(|| format!("creating {path}"))?;
        let mut writer = BufWriter::new(file);
        let header = StatsSnapshot::csv_header().context("encoding csv header")?;
        writer.write_all(header.as_bytes()).await?;

        info!(%path, "writing csv output");
        Ok(Self::Csv(writer))
    }

    pub fn new_stdout() -> Self {
        Self::Stdout
    }

    pub async fn write_snapshot(&mut self, snapshot: &StatsSnapshot) -> Result<()> {
        match self {
            Self::Csv(writer) => {
                let row = snapshot.to_csv_row().context("encoding csv row")?;
                writer.write_all(row.as_bytes()).await?;
                writer.flush().await?;
            }
            Self::Stdout => {
                let s = snapshot;
                println!(
                    "{} ({} {}): sent={} ok={} err={} rate={:.2}/s success={:.2}% p50={:.3}ms p95={:.3}ms p99={:.3}ms max={:.3}ms",
                    s.label.name,
                    s.label.method,
                    s.label.path_prefix,
                    s.sent_count,
                    s.success_count,
                    s.error_count,
                    s.throughput(),
                    s.success_ratio() * 100.0,
                    s.latency_ns_p50 as f64 / 1e6,
                    s.latency_ns_p95 as f64 / 1e6,
                    s.latency_ns_p99 as f64 / 1e6,
                    s.latency_ns_max as f64 / 1e6,
                );
            }
        }
        Ok(())
    }
}
