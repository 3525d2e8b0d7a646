use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vault_bench::attack::{AttackConfig, AttackTest, TargetMix, run_attack};
use vault_bench::backend::{HttpBackend, HttpBackendOptions};
use vault_bench::config::BenchConfig;
use vault_bench::{harness, logging};
use vault_bench::metrics::stats::{Stats, StatsLabel};
use vault_bench::output::OutputWriter;
use vault_bench::target::readiness::{DEFAULT_POLL_INTERVAL, DEFAULT_SETTLE};
use vault_bench::target::{Readiness, Registry};

#[derive(Parser)]
#[command(name = "vault-bench")]
#[command(about = "Vault secret store load testing harness")]
struct Cli {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tests from a config file
    Run {
        /// Benchmark config file (YAML)
        #[arg(long, short = 'c')]
        config: String,

        /// Vault address
        #[arg(long, env = "VAULT_ADDR", default_value = "http://127.0.0.1:8200")]
        vault_addr: String,

        /// Vault token
        #[arg(long, env = "VAULT_TOKEN", hide_env_values = true)]
        vault_token: String,

        /// Vault namespace
        #[arg(long, env = "VAULT_NAMESPACE")]
        vault_namespace: Option<String>,

        /// Total requests per second (overrides config). <= 0 runs unthrottled
        #[arg(long, allow_hyphen_values = true)]
        rate: Option<f64>,

        /// In-flight request limit (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Duration in seconds (overrides config)
        #[arg(long)]
        duration: Option<u64>,

        /// Per-request timeout (ms)
        #[arg(long, default_value = "10000")]
        timeout: u64,

        /// Accept invalid TLS certificates
        #[arg(long)]
        insecure_skip_tls: bool,

        /// Mount each test at its name instead of a random UUID
        #[arg(long)]
        fixed_mounts: bool,

        /// Leave provisioned mounts in place after the run
        #[arg(long)]
        no_cleanup: bool,

        /// Fixed wait after creating a mount (ms)
        #[arg(long, default_value_t = DEFAULT_SETTLE.as_millis() as u64)]
        settle_ms: u64,

        /// Poll the mount until it answers instead of sleeping; value is the timeout (ms)
        #[arg(long)]
        poll_ready: Option<u64>,

        /// Optional CSV output file path (stdout if omitted)
        #[arg(long)]
        csv: Option<String>,
    },
    /// List registered test types
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let registry = Registry::builtin()?;

    // Providers may contribute flags before the command line is parsed
    let matches = registry.register_flags(Cli::command()).get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    logging::init(&cli.log_level)?;

    match cli.command {
        Commands::List => {
            for name in registry.names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Run {
            config,
            vault_addr,
            vault_token,
            vault_namespace,
            rate,
            workers,
            duration,
            timeout,
            insecure_skip_tls,
            fixed_mounts,
            no_cleanup,
            settle_ms,
            poll_ready,
            csv,
        } => {
            let mut bench = BenchConfig::load(&config)?;
            if let Some(r) = rate {
                bench.rate = Some(r);
            }
            if let Some(w) = workers {
                bench.workers = w.max(1);
            }
            if let Some(d) = duration {
                bench.duration_secs = d.max(1);
            }
            if fixed_mounts {
                bench.random_mounts = false;
            }
            if no_cleanup {
                bench.cleanup = false;
            }
            let readiness = match poll_ready {
                Some(ms) => Readiness::Poll {
                    interval: DEFAULT_POLL_INTERVAL,
                    timeout: Duration::from_millis(ms),
                },
                None => Readiness::Fixed(Duration::from_millis(settle_ms)),
            };

            let backend = HttpBackend::connect(HttpBackendOptions {
                address: vault_addr,
                token: vault_token,
                namespace: vault_namespace,
                timeout: Duration::from_millis(timeout),
                insecure_skip_tls,
            })
            .context("building vault client")?;

            let mut output = match csv {
                Some(ref path) => OutputWriter::new_csv(path).await?,
                None => OutputWriter::new_stdout(),
            };

            let providers = harness::decode_all(&registry, &bench)?;
            let ready = harness::setup_all(&backend, &bench, providers, &readiness).await?;

            let mut tests = Vec::with_capacity(ready.len());
            for (test, target) in bench.tests.iter().zip(&ready) {
                let info = target.info();
                let label = StatsLabel {
                    name: test.name.clone(),
                    method: info.method.to_string(),
                    path_prefix: info.path_prefix,
                };
                tests.push(AttackTest {
                    name: test.name.clone(),
                    weight: test.weight,
                    target: target.clone(),
                    stats: Arc::new(Stats::new(label)?),
                });
            }
            let mix = Arc::new(TargetMix::new(tests));

            let attack = run_attack(
                backend.client().clone(),
                mix.clone(),
                AttackConfig {
                    rate: bench.effective_rate(),
                    workers: bench.workers,
                    duration: Duration::from_secs(bench.duration_secs),
                },
            )
            .await;

            if bench.cleanup {
                harness::cleanup_all(&backend, &bench, &ready).await;
            } else {
                info!("cleanup disabled, leaving mounts in place");
            }

            let summary = attack?;
            println!(
                "\nDispatched {} requests in {:.2}s",
                summary.dispatched,
                summary.elapsed.as_secs_f64()
            );
            for test in mix.tests() {
                let snap = test.stats.snapshot().await;
                output.write_snapshot(&snap).await?;
            }
            Ok(())
        }
    }
}
