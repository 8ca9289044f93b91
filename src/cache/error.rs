use thiserror::Error;

/// Errors surfaced by the model cache.
///
/// Teardown failures are deliberately absent: they are logged by the cache and
/// never reach a caller.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Malformed or unsupported key parameters. Raised before any lock is taken.
    #[error("invalid model parameters: {0}")]
    InvalidKey(String),

    /// The backend failed to construct an instance. Never cached; the next
    /// `acquire` for the same key retries from scratch.
    #[error("failed to initialize model {key}: {reason}")]
    ModelInitialization { key: String, reason: String },
}
