use thiserror::Error;

/// Errors returned by cache operations and by the cache builder.
///
/// A failed operation leaves the cache unchanged, so it is safe to retry
/// once the input has been corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  /// An argument was outside the range the operation accepts, such as a
  /// negative time-to-live or a non-positive unit factor.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),
  /// The operation is not valid for the current state of the cache, such as
  /// a unit calculator returning a negative weight or changing the unit
  /// factor of a populated cache.
  #[error("invalid state: {0}")]
  InvalidState(String),
}

impl CacheError {
  pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
    CacheError::InvalidArgument(msg.into())
  }

  pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
    CacheError::InvalidState(msg.into())
  }
}
