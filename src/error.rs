//! Errors surfaced by the query cache.

use thiserror::Error;

/// Result alias for cache operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Errors produced by the query cache.
///
/// Cloneable so a single failure can be handed to every caller that joined the
/// same in-flight request and stored on the entry for subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
  /// The query arguments could not be turned into a key. Raised before any
  /// cache mutation.
  #[error("invalid query key for {scope}/{entity}: {reason}")]
  InvalidKey {
    scope: String,
    entity: String,
    reason: String,
  },

  /// The fetch function rejected (network or HTTP failure).
  #[error("fetch failed for {key}: {message}")]
  Fetch { key: String, message: String },

  /// The same key was used with two different data types.
  #[error("cached data for {key} has a different type than requested")]
  TypeMismatch { key: String },

  /// The descriptor is disabled and nothing is cached for it yet.
  #[error("query {key} is disabled")]
  Disabled { key: String },

  /// The spawned fetch task never produced a result.
  #[error("fetch for {key} was cancelled: {reason}")]
  Cancelled { key: String, reason: String },
}

impl QueryError {
  pub fn is_fetch(&self) -> bool {
    matches!(self, QueryError::Fetch { .. })
  }

  pub(crate) fn invalid_key(scope: &str, entity: &str, reason: impl Into<String>) -> Self {
    QueryError::InvalidKey {
      scope: scope.to_string(),
      entity: entity.to_string(),
      reason: reason.into(),
    }
  }
}
