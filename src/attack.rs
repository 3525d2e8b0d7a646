//! Attack loop: dispatch generated targets over HTTP for a fixed duration.
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use rand::Rng;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::metrics::stats::Stats;
use crate::rate::RateController;
use crate::target::{ReadyTarget, TargetDescriptor};

/// One ready test in the mix, with its own stats collector.
pub struct AttackTest {
    pub name: String,
    pub weight: u32,
    pub target: Arc<dyn ReadyTarget>,
    pub stats: Arc<Stats>,
}

/// Weighted choice between tests, drawn per request.
pub struct TargetMix {
    tests: Vec<AttackTest>,
    cumulative: Vec<u64>,
}

impl TargetMix {
    pub fn new(tests: Vec<AttackTest>) -> Self {
        let mut total = 0u64;
        let cumulative = tests
            .iter()
            .map(|t| {
                total += u64::from(t.weight.max(1));
                total
            })
            .collect();
        Self { tests, cumulative }
    }

    pub fn tests(&self) -> &[AttackTest] {
        &self.tests
    }

    /// Index of the next test to hit.
    pub fn pick(&self) -> usize {
        let total = self.cumulative.last().copied().unwrap_or(0);
        if total == 0 {
            return 0;
        }
        let roll = rand::rng().random_range(0..total);
        self.cumulative.partition_point(|c| *c <= roll)
    }
}

#[derive(Clone, Debug)]
pub struct AttackConfig {
    pub rate: Option<f64>,
    pub workers: usize,
    pub duration: Duration,
}

#[derive(Clone, Debug)]
pub struct AttackSummary {
    pub dispatched: u64,
    pub elapsed: Duration,
}

#[derive(Clone, Copy)]
enum Ev {
    Sent(usize),
    Done(usize, u64, bool),
    Err(usize),
}

pub async fn run_attack(client: Client, mix: Arc<TargetMix>, config: AttackConfig) -> Result<AttackSummary> {
    if mix.tests().is_empty() {
        anyhow::bail!("attack needs at least one test");
    }
    info!(
        tests = mix.tests().len(),
        workers = config.workers,
        rate = ?config.rate,
        duration_secs = config.duration.as_secs_f64(),
        "starting attack"
    );

    // Stats worker channel: batch updates away from the request tasks
    let (tx, rx) = flume::bounded::<Ev>(10_000);
    let stats_worker = {
        let mix = mix.clone();
        tokio::spawn(async move {
            while let Ok(ev) = rx.recv_async().await {
                match ev {
                    Ev::Sent(i) => mix.tests[i].stats.record_sent().await,
                    Ev::Done(i, ns, ok) => mix.tests[i].stats.record_response(ns, ok).await,
                    Ev::Err(i) => mix.tests[i].stats.record_error().await,
                }
            }
        })
    };

    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + config.duration;
    let permits = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut rate = config.rate.filter(|r| *r > 0.0).map(RateController::new);
    let mut inflight: JoinSet<()> = JoinSet::new();
    let mut dispatched = 0u64;

    let dispatch = async {
        loop {
            if let Some(rc) = &mut rate {
                if tokio::time::timeout_at(deadline, rc.wait_for_next()).await.is_err() {
                    break;
                }
            }
            let permit = match tokio::time::timeout_at(deadline, permits.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                _ => break,
            };
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            let idx = mix.pick();
            let target = mix.tests[idx].target.target();
            let client = client.clone();
            let tx = tx.clone();
            let _ = tx.send_async(Ev::Sent(idx)).await;
            inflight.spawn(async move {
                let t0 = Instant::now();
                let ev = match execute(&client, target).await {
                    Ok(ok) => Ev::Done(idx, t0.elapsed().as_nanos() as u64, ok),
                    Err(e) => {
                        debug!(error = %e, "request failed");
                        Ev::Err(idx)
                    }
                };
                let _ = tx.send_async(ev).await;
                drop(permit);
            });
            dispatched += 1;
            // Reap finished tasks so the set does not grow with the run
            while inflight.try_join_next().is_some() {}
        }
    };

    tokio::select! {
        _ = dispatch => {
            info!("duration limit reached, stopping attack");
        }
        _ = signal::ctrl_c() => {
            warn!("ctrl+c received, stopping attack");
        }
    }

    // Drain remaining inflight
    while inflight.join_next().await.is_some() {}
    drop(tx);
    let _ = stats_worker.await;

    Ok(AttackSummary {
        dispatched,
        elapsed: start.elapsed(),
    })
}

/// Send one target; `Ok(true)` for a 2xx response.
pub async fn execute(client: &Client, target: TargetDescriptor) -> Result<bool, reqwest::Error> {
    let mut request = client.request(target.method, &target.url).headers(target.headers);
    if let Some(body) = target.body {
        request = request
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body);
    }
    let response = request.send().await?;
    let status = response.status();
    // Read the body so the connection goes back to the pool
    let _ = response.bytes().await;
    Ok(status.is_success())
}
