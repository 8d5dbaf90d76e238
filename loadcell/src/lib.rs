//! A concurrent load-generation and consistency-verification harness.
//!
//! Loadcell stress-tests a black-box operation under a configurable worker
//! count and aggregate request rate, and can optionally verify that
//! concurrent invocations of that operation return identical results (a
//! correctness check for race conditions in the thing being tested).
//!
//! # Architecture
//!
//! - [`LoadRunner`]: owns the worker pool. Each worker repeatedly invokes
//!   the registered operation at its share of the target rate, one burst per
//!   one-second tick, until stopped.
//! - Statistics aggregation: a thread-safe holder of a bounded
//!   recent-latency window and a trailing-window queue of completion
//!   timestamps, surfaced on demand as a [`StatsReport`] snapshot.
//! - [`ConsistencyController`]: an optional layer that captures a baseline
//!   from the first completed invocation, compares every subsequent result
//!   against it, and aborts the run on the first divergence.
//!
//! Rate control is intentionally simple: each worker bursts its per-tick
//! quota and sleeps out the remainder of the second. A tick that overruns
//! proceeds straight to the next one with no catch-up, so throughput falls
//! below target under contention rather than oscillating.
//!
//! # Example
//!
//! ```no_run
//! use loadcell::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut runner = LoadRunner::new(RunConfig::new(4, 100, 1));
//!     runner.set_operation(
//!         |input: u32| async move {
//!             tokio::time::sleep(Duration::from_millis(5)).await;
//!             Ok::<u32, InvocationError>(input * 2)
//!         },
//!         21,
//!     );
//!
//!     runner.start().unwrap();
//!     tokio::time::sleep(Duration::from_secs(10)).await;
//!     println!("{}", runner.snapshot(true));
//!     runner.stop().await;
//! }
//! ```

pub mod clock;
pub mod consistency;
pub mod operation;
pub mod runner;

pub(crate) mod aggregator;
pub(crate) mod worker;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use consistency::{CompareMode, ConsistencyController, Divergence, DivergenceKind};
pub use loadcell_core::{RunConfig, StatsReport};
pub use operation::{ConfigError, EncodeError, InvocationError};
pub use runner::{LoadRunner, RunState};

pub mod prelude {
    pub use crate::clock::{Clock, MonotonicClock};
    pub use crate::consistency::{CompareMode, ConsistencyController, Divergence};
    pub use crate::operation::{ConfigError, InvocationError};
    pub use crate::runner::{LoadRunner, RunState};
    pub use loadcell_core::{RunConfig, StatsReport};
}
