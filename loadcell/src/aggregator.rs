use loadcell_core::{
    LatencyWindow, RunConfig, StatsReport, ThroughputWindow, LATENCY_WINDOW_SIZE,
    THROUGHPUT_WINDOW,
};
use pdatastructs::tdigest::{TDigest, K1};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Thread-safe holder of run statistics.
///
/// A single coarse mutex guards the completion counter and both windows, so
/// the three updates a worker makes per invocation land as one transaction.
/// Degenerate inputs (empty windows, zero spans) resolve to zero-valued
/// statistics; this component never surfaces an error.
pub(crate) struct StatsAggregator {
    inner: Mutex<Inner>,
}

struct Inner {
    completed: u64,
    latencies: LatencyWindow,
    timestamps: ThroughputWindow,
    digest: TDigest<K1>,
    started_at: Option<Instant>,
    frozen_elapsed: Option<Duration>,
}

impl Inner {
    fn fresh(started_at: Option<Instant>) -> Self {
        Self {
            completed: 0,
            latencies: LatencyWindow::new(LATENCY_WINDOW_SIZE),
            timestamps: ThroughputWindow::new(THROUGHPUT_WINDOW),
            digest: default_tdigest(),
            started_at,
            frozen_elapsed: None,
        }
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::fresh(None)),
        }
    }

    // A poisoned lock just means a worker panicked mid-record; the counters
    // themselves are plain values and remain usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discard all prior state and mark the run as started at `now`.
    pub fn reset(&self, now: Instant) {
        *self.lock() = Inner::fresh(Some(now));
    }

    /// Pin the elapsed time at stop. Subsequent snapshots report this value
    /// rather than a live measurement.
    pub fn freeze(&self, now: Instant) {
        let mut inner = self.lock();
        if let Some(started_at) = inner.started_at {
            inner.frozen_elapsed = Some(now.saturating_duration_since(started_at));
        }
    }

    /// Record one successful invocation: counter, latency window, and
    /// timestamp queue under a single lock acquisition.
    pub fn record(&self, latency: Duration, completed_at: Instant) {
        {
            let mut inner = self.lock();
            inner.completed += 1;
            inner.latencies.push(latency);
            inner.timestamps.push(completed_at);
            inner.digest.insert(latency.as_secs_f64());
        }

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("loadcell.completed").increment(1);
            metrics::histogram!("loadcell.latency").record(latency.as_secs_f64());
        }
    }

    pub fn completed(&self) -> u64 {
        self.lock().completed
    }

    pub fn snapshot(&self, now: Instant, include_target_rate: bool, config: &RunConfig) -> StatsReport {
        let mut inner = self.lock();

        let elapsed = inner.frozen_elapsed.unwrap_or_else(|| {
            inner
                .started_at
                .map(|started_at| now.saturating_duration_since(started_at))
                .unwrap_or(Duration::ZERO)
        });

        let completed = inner.completed * config.batch_size() as u64;
        let average_rate = if elapsed.is_zero() {
            0.0
        } else {
            completed as f64 / elapsed.as_secs_f64()
        };
        let current_rate = inner.timestamps.rate(now, config.batch_size());

        StatsReport {
            worker_count: config.worker_count(),
            batch_size: config.batch_size(),
            target_rate: include_target_rate.then(|| config.target_rate()),
            elapsed,
            completed,
            average_latency: inner.latencies.mean(),
            current_rate,
            average_rate,
            latency_p50: latency_quantile(&inner.digest, 0.5),
            latency_p90: latency_quantile(&inner.digest, 0.9),
            latency_p99: latency_quantile(&inner.digest, 0.99),
        }
    }
}

fn latency_quantile(digest: &TDigest<K1>, quantile: f64) -> Duration {
    let secs = digest.quantile(quantile);

    // TDigest returns NaN on an empty digest; fold that into the
    // zero-valued-statistics contract.
    if secs.is_finite() {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}
