use std::fmt;

use tandem_cache::CacheError;
use thiserror::Error;

/// A rejection raised by a [`Validator`](crate::Validator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {message}")]
pub struct ValidationError {
  message: String,
}

impl ValidationError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }

  /// A conflict on `key`, which changed in the backing map after the
  /// transaction first saw it.
  pub fn conflict<K: fmt::Debug>(key: &K) -> Self {
    Self::new(format!("key {key:?} was changed by another writer"))
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

/// Errors returned by transaction operations.
///
/// A `ConcurrentModification` means the transaction lost a race for a key;
/// the whole transaction should be retried from the start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError<K: fmt::Debug> {
  #[error("concurrent modification of key {key:?}")]
  ConcurrentModification { key: K },
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error("invalid transaction state: {0}")]
  InvalidState(String),
  #[error("backing map rejected the write: {0}")]
  Cache(#[from] CacheError),
}

impl<K: fmt::Debug> TxError<K> {
  pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
    TxError::InvalidState(msg.into())
  }

  /// Returns `true` if retrying the whole transaction may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, TxError::ConcurrentModification { .. } | TxError::Validation(_))
  }
}
