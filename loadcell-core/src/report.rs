use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Point-in-time statistics for a load run.
///
/// All fields are plain values detached from the aggregator's internal
/// state, so a caller can hold and display a report without further locking.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub worker_count: usize,
    pub batch_size: u32,
    /// Configured aggregate rate; `None` when the caller asked for it to be
    /// omitted from the report.
    pub target_rate: Option<NonZeroU32>,
    /// Time since the run started, frozen at stop-time once stopped.
    pub elapsed: Duration,
    /// Completed invocations multiplied by the batch size.
    pub completed: u64,
    /// Mean latency over the bounded recent-sample window.
    pub average_latency: Duration,
    /// Throughput over the trailing timestamp window.
    pub current_rate: f64,
    /// Lifetime throughput: completed over elapsed.
    pub average_rate: f64,
    pub latency_p50: Duration,
    pub latency_p90: Duration,
    pub latency_p99: Duration,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "load run statistics:")?;
        writeln!(f, "workers: {}", self.worker_count)?;
        writeln!(f, "batch size: {}", self.batch_size)?;
        if let Some(rate) = self.target_rate {
            writeln!(f, "target rate: {rate} req/s")?;
        }
        writeln!(f, "elapsed: {}", humantime::format_duration(self.elapsed))?;
        writeln!(f, "completed: {}", self.completed)?;
        writeln!(
            f,
            "average latency: {:.2}ms",
            self.average_latency.as_secs_f64() * 1e3
        )?;
        writeln!(f, "current rate: {:.2} req/s", self.current_rate)?;
        write!(f, "average rate: {:.2} req/s", self.average_rate)
    }
}
