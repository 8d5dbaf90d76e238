use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Bounded FIFO window over recent invocation latencies.
///
/// Once full, pushing a new sample evicts the oldest one, so the mean always
/// reflects the most recent `capacity` invocations rather than the whole run.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn contains(&self, sample: Duration) -> bool {
        self.samples.contains(&sample)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Unbounded-but-pruned queue of completion timestamps.
///
/// Entries falling outside the trailing horizon are evicted lazily whenever
/// the rate is computed, never on insertion.
#[derive(Debug, Clone)]
pub struct ThroughputWindow {
    stamps: VecDeque<Instant>,
    horizon: Duration,
}

impl ThroughputWindow {
    pub fn new(horizon: Duration) -> Self {
        Self {
            stamps: VecDeque::new(),
            horizon,
        }
    }

    pub fn push(&mut self, completed_at: Instant) {
        self.stamps.push_back(completed_at);
    }

    /// Drop timestamps at or beyond the horizon, keeping only those strictly
    /// newer than `now - horizon`.
    pub fn prune(&mut self, now: Instant) {
        let cutoff = match now.checked_sub(self.horizon) {
            Some(cutoff) => cutoff,
            None => return,
        };
        while let Some(front) = self.stamps.front() {
            if *front <= cutoff {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Requests per second over the span of the surviving timestamps,
    /// counting `batch_size` logical items per entry. Zero when the window is
    /// empty or the span degenerates.
    pub fn rate(&mut self, now: Instant, batch_size: u32) -> f64 {
        self.prune(now);
        let Some(earliest) = self.stamps.front() else {
            return 0.0;
        };
        let span = now.saturating_duration_since(*earliest);
        if span.is_zero() {
            return 0.0;
        }
        (self.stamps.len() as u64 * batch_size as u64) as f64 / span.as_secs_f64()
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
    }
}
