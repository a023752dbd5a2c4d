//! Cache entries and their lifecycle states.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::key::QueryKey;
use crate::error::QueryError;

/// Type-erased cached payload. Typed access goes through [`CacheEntry::data_as`].
pub type QueryData = Arc<dyn Any + Send + Sync>;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
  /// Known key, never fetched
  #[default]
  Idle,
  /// A fetch is in flight
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed
  Error,
}

/// Snapshot of what the store holds for one key.
///
/// Consumers always get a clone; the store owns the original. `data` survives
/// a later `Loading` or `Error` transition so stale data can still be shown.
#[derive(Clone)]
pub struct CacheEntry {
  pub key: QueryKey,
  pub data: Option<QueryData>,
  pub status: QueryStatus,
  pub error: Option<QueryError>,
  /// Monotonic time of the last successful commit
  pub fetched_at: Option<Instant>,
  /// Wall-clock time of the last successful commit, for display
  pub cached_at: Option<DateTime<Utc>>,
  /// Stale time the data was last requested with
  pub stale_time: Duration,
  /// Generation of the request whose data is currently stored (0 = none)
  pub(crate) committed: u64,
  /// Highest generation that has settled, successfully or not
  pub(crate) settled: u64,
  pub(crate) invalidated: bool,
}

impl CacheEntry {
  pub fn new(key: QueryKey) -> Self {
    Self {
      key,
      data: None,
      status: QueryStatus::Idle,
      error: None,
      fetched_at: None,
      cached_at: None,
      stale_time: Duration::ZERO,
      committed: 0,
      settled: 0,
      invalidated: false,
    }
  }

  /// Typed view of the cached data. `None` when empty or of another type.
  pub fn data_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.data.clone().and_then(|d| d.downcast::<T>().ok())
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// Whether the entry was explicitly marked stale after a mutation.
  pub fn is_invalidated(&self) -> bool {
    self.invalidated
  }

  /// Fresh iff it succeeded, was not invalidated and is younger than `stale_time`.
  pub fn is_fresh(&self, stale_time: Duration) -> bool {
    if self.status != QueryStatus::Success || self.invalidated {
      return false;
    }
    match self.fetched_at {
      Some(at) => Instant::now().saturating_duration_since(at) < stale_time,
      None => false,
    }
  }
}

impl fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("key", &self.key)
      .field("status", &self.status)
      .field("has_data", &self.data.is_some())
      .field("error", &self.error)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .field("invalidated", &self.invalidated)
      .finish_non_exhaustive()
  }
}
