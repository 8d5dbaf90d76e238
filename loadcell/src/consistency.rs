use crate::operation::EncodeError;
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// How an operation result is turned into its canonical comparable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
    /// Deterministic structural encoding. Two results compare equal iff
    /// their serialized structure is byte-identical.
    Structural,
    /// JSON-text comparison, kept for parity with older tooling that
    /// serialized results to JSON strings and compared those. Sensitive to
    /// floating-point formatting; prefer [`CompareMode::Structural`].
    LegacyJson,
}

impl CompareMode {
    pub(crate) fn encode<R: Serialize>(self, result: &R) -> Result<Vec<u8>, EncodeError> {
        match self {
            CompareMode::Structural => Ok(bincode::serialize(result)?),
            CompareMode::LegacyJson => Ok(serde_json::to_vec(result)?),
        }
    }
}

/// A detected mismatch between a result and the run's baseline, or an
/// operation error promoted to one. Carries both sides for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Canonical encoding of the baseline, when one had been established.
    pub baseline: Option<Vec<u8>>,
    pub kind: DivergenceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivergenceKind {
    /// A completed invocation returned something other than the baseline.
    Mismatch { candidate: Vec<u8> },
    /// The operation failed while the run was being verified.
    OperationError { message: String },
}

/// Caller-facing handle for consistency-verification runs.
///
/// Register it alongside the operation via
/// [`set_verified_operation`](crate::LoadRunner::set_verified_operation),
/// then await [`diverged`](Self::diverged) (or poll
/// [`try_diverged`](Self::try_diverged)) while the run executes. At most one
/// notification is delivered per run; the detecting worker also halts the
/// run, so after a notification `stop()` returns promptly.
pub struct ConsistencyController {
    mode: CompareMode,
    tx: mpsc::UnboundedSender<Divergence>,
    rx: mpsc::UnboundedReceiver<Divergence>,
}

impl ConsistencyController {
    pub fn new(mode: CompareMode) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { mode, tx, rx }
    }

    pub fn mode(&self) -> CompareMode {
        self.mode
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Divergence> {
        self.tx.clone()
    }

    /// Wait for a divergence notification. Resolves only when a worker
    /// detects one; pair with a timeout (or `try_diverged`) when the run is
    /// expected to stay consistent.
    pub async fn diverged(&mut self) -> Divergence {
        match self.rx.recv().await {
            Some(divergence) => divergence,
            // The controller holds a sender itself, so the channel can only
            // close once this struct is being torn down.
            None => unreachable!("divergence channel closed while controller alive"),
        }
    }

    pub fn try_diverged(&mut self) -> Option<Divergence> {
        self.rx.try_recv().ok()
    }
}

/// Per-run verification state shared by all workers.
///
/// The baseline is installed first-writer-wins: of several workers racing to
/// complete their first invocation, exactly one result becomes the baseline
/// and the rest are compared against it.
pub(crate) struct VerifyState {
    baseline: ArcSwapOption<Vec<u8>>,
    notify: mpsc::UnboundedSender<Divergence>,
}

pub(crate) enum Checked {
    /// This result became the run's baseline; it establishes ground truth
    /// rather than being checked against it.
    Installed,
    Matched,
    Diverged {
        baseline: Arc<Vec<u8>>,
        candidate: Vec<u8>,
    },
}

impl VerifyState {
    pub fn new(notify: mpsc::UnboundedSender<Divergence>) -> Self {
        Self {
            baseline: ArcSwapOption::empty(),
            notify,
        }
    }

    pub fn check(&self, candidate: Vec<u8>) -> Checked {
        let candidate = Arc::new(candidate);
        let previous = self
            .baseline
            .compare_and_swap(&None::<Arc<Vec<u8>>>, Some(candidate.clone()));

        match &*previous {
            None => Checked::Installed,
            Some(baseline) if **baseline == *candidate => Checked::Matched,
            Some(baseline) => Checked::Diverged {
                baseline: baseline.clone(),
                candidate: (*candidate).clone(),
            },
        }
    }

    pub fn baseline(&self) -> Option<Vec<u8>> {
        self.baseline.load().as_deref().cloned()
    }

    pub fn report(&self, divergence: Divergence) {
        // The receiver outlives the run; a send can only fail if the caller
        // dropped the controller, in which case nobody is listening anyway.
        let _ = self.notify.send(divergence);
    }

    /// Clear the baseline so the next completion re-establishes it. Runs
    /// rebuild this state on start, so this is only needed for in-place
    /// reuse.
    #[allow(unused)]
    pub fn reset(&self) {
        self.baseline.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn state() -> (VerifyState, mpsc::UnboundedReceiver<Divergence>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (VerifyState::new(tx), rx)
    }

    #[test]
    fn first_result_installs_the_baseline() {
        let (state, _rx) = state();

        assert!(matches!(state.check(b"alpha".to_vec()), Checked::Installed));
        assert!(matches!(state.check(b"alpha".to_vec()), Checked::Matched));
        assert_eq!(state.baseline(), Some(b"alpha".to_vec()));
    }

    #[test]
    fn mismatch_carries_both_sides() {
        let (state, _rx) = state();
        state.check(b"alpha".to_vec());

        match state.check(b"beta".to_vec()) {
            Checked::Diverged {
                baseline,
                candidate,
            } => {
                assert_eq!(*baseline, b"alpha".to_vec());
                assert_eq!(candidate, b"beta".to_vec());
            }
            _ => panic!("expected divergence"),
        }
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn racing_writers_install_exactly_one_baseline() {
        for _ in 0..100 {
            let (state, _rx) = state();
            let state = Arc::new(state);
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = [b"left".to_vec(), b"right".to_vec()]
                .into_iter()
                .map(|payload| {
                    let state = Arc::clone(&state);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        matches!(state.check(payload), Checked::Installed)
                    })
                })
                .collect();

            let installs = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|installed| *installed)
                .count();
            assert_eq!(installs, 1);

            let baseline = state.baseline().unwrap();
            assert!(baseline == b"left".to_vec() || baseline == b"right".to_vec());
        }
    }

    #[test]
    fn reset_clears_the_baseline() {
        let (state, _rx) = state();
        state.check(b"alpha".to_vec());
        state.reset();

        assert_eq!(state.baseline(), None);
        assert!(matches!(state.check(b"beta".to_vec()), Checked::Installed));
    }

    #[test]
    fn structural_and_legacy_encodings_differ() {
        let value = String::from("alpha");
        let structural = CompareMode::Structural.encode(&value).unwrap();
        let legacy = CompareMode::LegacyJson.encode(&value).unwrap();

        assert_eq!(legacy, b"\"alpha\"".to_vec());
        assert_ne!(structural, legacy);
    }
}
