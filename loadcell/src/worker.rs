use crate::consistency::{Checked, Divergence, DivergenceKind};
use crate::operation::InvocationError;
use crate::runner::{Encoder, RunContext};
use loadcell_core::TICK_INTERVAL;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// The per-worker tick loop.
///
/// Each tick bursts this worker's share of the aggregate rate, timing every
/// invocation, then sleeps out the remainder of the second. A tick that
/// overruns proceeds straight into the next one; there is no catch-up
/// scheduling, so throughput simply falls below target under contention.
pub(crate) async fn run_worker<Op, F, I, R>(
    ctx: Arc<RunContext>,
    op: Op,
    input: I,
    encoder: Option<Encoder<R>>,
) where
    Op: Fn(I) -> F + Send + Sync + 'static,
    F: Future<Output = Result<R, InvocationError>> + Send,
    I: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    let quota = ctx.config.per_worker_quota();

    while ctx.keep_running() {
        let tick_start = ctx.clock.now();

        for _ in 0..quota {
            if !ctx.keep_running() {
                break;
            }

            let begun = ctx.clock.now();
            match op(input.clone()).await {
                Ok(result) => {
                    let completed_at = ctx.clock.now();
                    let latency = completed_at.saturating_duration_since(begun);
                    on_success(&ctx, &encoder, &result, latency, completed_at);
                }
                Err(err) => on_error(&ctx, err),
            }
        }

        let elapsed = ctx.clock.now().saturating_duration_since(tick_start);
        if elapsed < TICK_INTERVAL && ctx.keep_running() {
            tokio::time::sleep(TICK_INTERVAL - elapsed).await;
        }
    }
}

fn on_success<R>(
    ctx: &RunContext,
    encoder: &Option<Encoder<R>>,
    result: &R,
    latency: Duration,
    completed_at: Instant,
) {
    let (Some(encoder), Some(verify)) = (encoder, &ctx.verify) else {
        ctx.stats.record(latency, completed_at);
        return;
    };

    let candidate = match encoder(result) {
        Ok(candidate) => candidate,
        Err(err) => {
            // An unencodable result cannot be checked; treat it like an
            // operation failure under verification.
            if ctx.raise_abort() {
                error!("result encoding failed during verification: {err}");
                verify.report(Divergence {
                    baseline: verify.baseline(),
                    kind: DivergenceKind::OperationError {
                        message: err.to_string(),
                    },
                });
            }
            ctx.halt();
            return;
        }
    };

    match verify.check(candidate) {
        Checked::Installed | Checked::Matched => ctx.stats.record(latency, completed_at),
        Checked::Diverged {
            baseline,
            candidate,
        } => {
            if ctx.raise_abort() {
                error!("divergent result detected; aborting run");
                verify.report(Divergence {
                    baseline: Some((*baseline).clone()),
                    kind: DivergenceKind::Mismatch { candidate },
                });
            }
            ctx.halt();
        }
    }
}

fn on_error(ctx: &RunContext, err: InvocationError) {
    #[cfg(feature = "metrics")]
    metrics::counter!("loadcell.errors").increment(1);

    if let Some(verify) = &ctx.verify {
        // Under verification any operation error is promoted to a
        // divergence-grade abort.
        if ctx.raise_abort() {
            error!("operation failed during verification: {err}");
            verify.report(Divergence {
                baseline: verify.baseline(),
                kind: DivergenceKind::OperationError {
                    message: err.to_string(),
                },
            });
        }
        ctx.halt();
        return;
    }

    match err {
        InvocationError::Recoverable(_) => {
            debug!("invocation failed, continuing: {err}");
        }
        InvocationError::Fatal(_) => {
            error!("fatal invocation error, winding the run down: {err}");
            ctx.raise_abort();
            ctx.halt();
        }
    }
}
