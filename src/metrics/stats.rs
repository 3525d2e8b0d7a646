use hdrhistogram::Histogram;
use hdrhistogram::CreationError;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Per-test statistics: request outcomes and latency
pub struct Stats {
    label: StatsLabel,

    // Latency histogram (nanosecond precision), all completed requests
    latency_hist: RwLock<Histogram<u64>>,

    // Counters
    pub sent_count: RwLock<u64>,
    pub success_count: RwLock<u64>,
    pub error_count: RwLock<u64>,

    start_time: Instant,
}

/// Identifies which test a row belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsLabel {
    pub name: String,
    pub method: String,
    pub path_prefix: String,
}

impl Stats {
    pub fn new(label: StatsLabel) -> Result<Self, CreationError> {
        Ok(Self {
            label,
            // 1ns to 60s range, 3 significant digits
            latency_hist: RwLock::new(Histogram::new_with_bounds(1, 60_000_000_000, 3)?),
            sent_count: RwLock::new(0),
            success_count: RwLock::new(0),
            error_count: RwLock::new(0),
            start_time: Instant::now(),
        })
    }

    /// Record a dispatched request
    pub async fn record_sent(&self) {
        *self.sent_count.write().await += 1;
    }

    /// Record a completed request; `ok` is false for non-2xx responses
    pub async fn record_response(&self, latency_ns: u64, ok: bool) {
        if ok {
            *self.success_count.write().await += 1;
        } else {
            *self.error_count.write().await += 1;
        }
        // Values past the upper bound are clamped rather than dropped
        self.latency_hist.write().await.saturating_record(latency_ns.max(1));
    }

    /// Record a request that never produced a response
    pub async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let sent = *self.sent_count.read().await;
        let success = *self.success_count.read().await;
        let errors = *self.error_count.read().await;

        let hist = self.latency_hist.read().await;
        StatsSnapshot {
            label: self.label.clone(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            sent_count: sent,
            success_count: success,
            error_count: errors,
            total_duration: self.start_time.elapsed(),
            latency_ns_p50: hist.value_at_quantile(0.5),
            latency_ns_p95: hist.value_at_quantile(0.95),
            latency_ns_p99: hist.value_at_quantile(0.99),
            latency_ns_min: hist.min(),
            latency_ns_max: hist.max(),
            latency_ns_mean: hist.mean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub label: StatsLabel,
    pub timestamp: u64,
    pub sent_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_duration: Duration,
    pub latency_ns_p50: u64,
    pub latency_ns_p95: u64,
    pub latency_ns_p99: u64,
    pub latency_ns_min: u64,
    pub latency_ns_max: u64,
    pub latency_ns_mean: f64,
}

impl StatsSnapshot {
    /// Completed requests per second over the whole run
    pub fn throughput(&self) -> f64 {
        let total_secs = self.total_duration.as_secs_f64();
        if total_secs > 0.0 {
            (self.success_count + self.error_count) as f64 / total_secs
        } else {
            0.0
        }
    }

    /// Fraction of completed requests that succeeded
    pub fn success_ratio(&self) -> f64 {
        let done = self.success_count + self.error_count;
        if done > 0 {
            self.success_count as f64 / done as f64
        } else {
            0.0
        }
    }

    /// Column values in `CSV_HEADER` order
    pub fn csv_record(&self) -> [String; 15] {
        [
            self.timestamp.to_string(),
            self.label.name.clone(),
            self.label.method.clone(),
            self.label.path_prefix.clone(),
            self.sent_count.to_string(),
            self.success_count.to_string(),
            self.error_count.to_string(),
            format!("{:.2}", self.throughput()),
            format!("{:.4}", self.success_ratio()),
            self.latency_ns_p50.to_string(),
            self.latency_ns_p95.to_string(),
            self.latency_ns_p99.to_string(),
            self.latency_ns_min.to_string(),
            self.latency_ns_max.to_string(),
            format!("{:.2}", self.latency_ns_mean),
        ]
    }

    /// Convert to a newline-terminated CSV row, quoting fields as needed
    pub fn to_csv_row(&self) -> Result<String, csv::Error> {
        encode_record(self.csv_record())
    }

    /// CSV header line
    pub fn csv_header() -> Result<String, csv::Error> {
        encode_record(CSV_HEADER)
    }
}

pub const CSV_HEADER: [&str; 15] = [
    "timestamp",
    "test",
    "method",
    "path_prefix",
    "sent_count",
    "success_count",
    "error_count",
    "throughput",
    "success_ratio",
    "latency_ns_p50",
    "latency_ns_p95",
    "latency_ns_p99",
    "latency_ns_min",
    "latency_ns_max",
    "latency_ns_mean",
];

fn encode_record<I, T>(record: I) -> Result<String, csv::Error>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(record)?;
    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> StatsLabel {
        StatsLabel {
            name: "static_read".into(),
            method: "GET".into(),
            path_prefix: "/v1/bench".into(),
        }
    }

    #[tokio::test]
    async fn counts_outcomes_separately() {
        let stats = Stats::new(label()).unwrap();
        for _ in 0..3 {
            stats.record_sent().await;
        }
        stats.record_response(1_000, true).await;
        stats.record_response(2_000, false).await;
        stats.record_error().await;
        let snap = stats.snapshot().await;
        assert_eq!(snap.sent_count, 3);
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.error_count, 2);
        assert!(snap.latency_ns_max >= 2_000);
        assert!((snap.success_ratio() - 1.0 / 3.0).abs() < 1e-9);
    }

    fn parse_row(row: &str) -> csv::StringRecord {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(row.as_bytes());
        reader.records().next().expect("one row").expect("valid csv")
    }

    #[tokio::test]
    async fn csv_row_matches_header_columns() {
        let stats = Stats::new(label()).unwrap();
        let row = stats.snapshot().await.to_csv_row().unwrap();
        let header = StatsSnapshot::csv_header().unwrap();
        assert_eq!(parse_row(&header).len(), CSV_HEADER.len());
        let record = parse_row(&row);
        assert_eq!(record.len(), CSV_HEADER.len());
        assert_eq!(&record[1], "static_read");
        assert_eq!(&record[2], "GET");
        assert_eq!(&record[3], "/v1/bench");
    }

    #[tokio::test]
    async fn csv_row_quotes_awkward_test_names() {
        for name in ["reads, hot", "say \"hi\"", "two\nlines"] {
            let stats = Stats::new(StatsLabel {
                name: name.into(),
                ..label()
            })
            .unwrap();
            let row = stats.snapshot().await.to_csv_row().unwrap();
            assert!(row.ends_with('\n'));
            let record = parse_row(&row);
            assert_eq!(record.len(), CSV_HEADER.len(), "{row}");
            assert_eq!(&record[1], name);
            assert_eq!(&record[2], "GET");
        }
    }
}
