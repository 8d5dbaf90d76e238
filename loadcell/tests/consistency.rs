use loadcell::prelude::*;
use loadcell::DivergenceKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Returns "A" on the first call and "B" on every call after it.
fn flaky_op() -> (
    impl Fn(Arc<AtomicU64>) -> std::future::Ready<Result<String, InvocationError>>
        + Clone
        + Send
        + Sync,
    Arc<AtomicU64>,
) {
    let calls = Arc::new(AtomicU64::new(0));
    let op = |calls: Arc<AtomicU64>| {
        let result = if calls.fetch_add(1, Ordering::Relaxed) == 0 {
            "A".to_string()
        } else {
            "B".to_string()
        };
        std::future::ready(Ok(result))
    };
    (op, calls)
}

#[tracing_test::traced_test]
#[tokio::test(start_paused = true)]
async fn divergence_aborts_the_run() {
    let mut controller = ConsistencyController::new(CompareMode::Structural);
    let mut runner = LoadRunner::new(RunConfig::new(4, 100, 1));
    let (op, calls) = flaky_op();
    runner.set_verified_operation(op, calls, &controller);

    runner.start().unwrap();
    let divergence = timeout(Duration::from_secs(5), controller.diverged())
        .await
        .expect("expected a divergence notification");

    assert_eq!(
        divergence.baseline,
        Some(bincode::serialize(&"A".to_string()).unwrap())
    );
    assert_eq!(
        divergence.kind,
        DivergenceKind::Mismatch {
            candidate: bincode::serialize(&"B".to_string()).unwrap()
        }
    );

    assert!(runner.aborted());
    assert!(!runner.is_running());
    // Exactly one notification per run, however many workers raced.
    assert!(controller.try_diverged().is_none());

    runner.stop().await;
    assert_eq!(runner.state(), RunState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn operation_error_is_promoted_to_divergence() {
    let mut controller = ConsistencyController::new(CompareMode::Structural);
    let mut runner = LoadRunner::new(RunConfig::new(1, 10, 1));

    let calls = Arc::new(AtomicU64::new(0));
    runner.set_verified_operation(
        move |calls: Arc<AtomicU64>| async move {
            if calls.fetch_add(1, Ordering::Relaxed) == 0 {
                Ok("A".to_string())
            } else {
                Err(InvocationError::recoverable("sporadic backend failure"))
            }
        },
        calls,
        &controller,
    );

    runner.start().unwrap();
    let divergence = timeout(Duration::from_secs(5), controller.diverged())
        .await
        .expect("expected the error to be promoted");

    assert_eq!(
        divergence.baseline,
        Some(bincode::serialize(&"A".to_string()).unwrap())
    );
    assert!(matches!(
        divergence.kind,
        DivergenceKind::OperationError { ref message }
            if message.contains("sporadic backend failure")
    ));
    assert!(runner.aborted());

    runner.stop().await;
}

#[tokio::test(start_paused = true)]
async fn consistent_results_never_notify() {
    let mut controller = ConsistencyController::new(CompareMode::Structural);
    let mut runner = LoadRunner::new(RunConfig::new(4, 40, 1));
    runner.set_verified_operation(
        |_: ()| async {
            sleep(Duration::from_millis(2)).await;
            Ok::<_, InvocationError>(vec![1u32, 2, 3])
        },
        (),
        &controller,
    );

    runner.start().unwrap();
    sleep(Duration::from_secs(2)).await;

    assert!(controller.try_diverged().is_none());
    assert!(!runner.aborted());
    assert!(runner.completed() > 0);

    runner.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restart_captures_a_fresh_baseline() {
    let mut controller = ConsistencyController::new(CompareMode::Structural);
    let mut runner = LoadRunner::new(RunConfig::new(2, 20, 1));
    let (op, calls) = flaky_op();
    runner.set_verified_operation(op, calls, &controller);

    runner.start().unwrap();
    let divergence = timeout(Duration::from_secs(5), controller.diverged())
        .await
        .expect("first run should diverge");
    assert_eq!(
        divergence.baseline,
        Some(bincode::serialize(&"A".to_string()).unwrap())
    );
    runner.stop().await;

    // The operation now answers "B" consistently, and the new run must
    // baseline on "B" rather than remembering "A".
    runner.start().unwrap();
    sleep(Duration::from_secs(2)).await;

    assert!(controller.try_diverged().is_none());
    assert!(!runner.aborted());
    assert!(runner.completed() > 0);

    runner.stop().await;
}

#[tokio::test(start_paused = true)]
async fn legacy_mode_compares_json_text() {
    #[derive(Serialize, Clone)]
    struct Detection {
        label: String,
        score: f64,
    }

    let mut controller = ConsistencyController::new(CompareMode::LegacyJson);
    let mut runner = LoadRunner::new(RunConfig::new(1, 10, 1));

    let calls = Arc::new(AtomicU64::new(0));
    runner.set_verified_operation(
        move |calls: Arc<AtomicU64>| async move {
            let score = if calls.fetch_add(1, Ordering::Relaxed) == 0 {
                0.5
            } else {
                0.75
            };
            Ok::<_, InvocationError>(Detection {
                label: "scratch".to_string(),
                score,
            })
        },
        calls,
        &controller,
    );

    runner.start().unwrap();
    let divergence = timeout(Duration::from_secs(5), controller.diverged())
        .await
        .expect("scores differ, so the run should abort");

    let baseline = divergence.baseline.unwrap();
    assert_eq!(
        baseline,
        serde_json::to_vec(&Detection {
            label: "scratch".to_string(),
            score: 0.5,
        })
        .unwrap()
    );
    match divergence.kind {
        DivergenceKind::Mismatch { candidate } => {
            let text = String::from_utf8(candidate).unwrap();
            assert!(text.contains("0.75"));
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }

    runner.stop().await;
}

#[tokio::test(start_paused = true)]
async fn in_flight_invocations_drain_after_abort() {
    // Cancellation is eventual: workers already inside an invocation finish
    // it after the abort signal is raised, but only one notification fires
    // and no further ticks start.
    let calls = Arc::new(AtomicU64::new(0));
    let mut controller = ConsistencyController::new(CompareMode::Structural);
    let mut runner = LoadRunner::new(RunConfig::new(4, 4, 1));
    runner.set_verified_operation(
        move |calls: Arc<AtomicU64>| async move {
            sleep(Duration::from_millis(10)).await;
            let result = if calls.fetch_add(1, Ordering::Relaxed) == 0 {
                "A".to_string()
            } else {
                "B".to_string()
            };
            Ok::<_, InvocationError>(result)
        },
        calls.clone(),
        &controller,
    );

    runner.start().unwrap();
    let _divergence = timeout(Duration::from_secs(5), controller.diverged())
        .await
        .expect("expected a divergence");

    sleep(Duration::from_secs(2)).await;
    assert!(controller.try_diverged().is_none());
    assert!(!runner.is_running());
    // Every worker got at most one tick's worth of invocations in.
    assert!(calls.load(Ordering::Relaxed) <= 4);

    runner.stop().await;
}
