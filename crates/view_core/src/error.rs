use shared::error::FetchFailure;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Error)]
pub enum ViewError {
    /// Programmer error. Debug builds panic before this is ever returned.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchFailure),
}

/// Logs the violation, asserts in debug builds and hands back the error
/// release builds return instead of touching state.
pub(crate) fn invariant_violation(message: impl Into<String>) -> ViewError {
    let message = message.into();
    error!("view: invariant violation: {message}");
    if cfg!(debug_assertions) {
        panic!("invariant violation: {message}");
    }
    ViewError::InvariantViolation(message)
}
