use std::num::NonZeroU32;
use std::time::Duration;

/// Default aggregate target rate when none is configured.
pub const DEFAULT_TARGET_RATE: NonZeroU32 = unsafe { NonZeroU32::new_unchecked(100) };

/// Capacity of the bounded recent-latency window.
pub const LATENCY_WINDOW_SIZE: usize = 100;

/// Trailing window over completion timestamps used for the current-rate figure.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(3);

/// Length of one worker scheduling tick.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long `stop()` waits for each worker before abandoning it.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
