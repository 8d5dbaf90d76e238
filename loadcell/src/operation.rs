use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by the operation under test for a single invocation.
///
/// The two kinds drive different behavior in the worker loop: a recoverable
/// error is logged and skipped in performance mode, while a fatal error
/// raises the shared abort signal and winds the run down. In consistency
/// mode both kinds are promoted to a divergence.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("recoverable operation failure: {0}")]
    Recoverable(#[source] BoxError),

    #[error("fatal operation failure: {0}")]
    Fatal(#[source] BoxError),
}

impl InvocationError {
    pub fn recoverable(err: impl Into<BoxError>) -> Self {
        Self::Recoverable(err.into())
    }

    pub fn fatal(err: impl Into<BoxError>) -> Self {
        Self::Fatal(err.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Invalid setup, surfaced synchronously from [`start`](crate::LoadRunner::start).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no operation registered; call set_operation before start")]
    NoOperation,
}

/// Failure to encode an operation result into its canonical comparable form.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("structural encoding failed: {0}")]
    Structural(#[from] bincode::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
