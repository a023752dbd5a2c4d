//! Query descriptors: everything the executor needs to run one query.

use color_eyre::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::entry::QueryData;
use super::key::QueryKey;

/// Boxed future returned by a fetch function.
pub type FetchFuture<T> = BoxFuture<'static, Result<T>>;

/// One-shot fetch function. The executor calls it at most once, and only when
/// the request actually goes to the network.
pub type FetchFn<T> = Box<dyn FnOnce() -> FetchFuture<T> + Send>;

/// Per-call options for the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
  /// How long a successful result is served without refetching
  pub stale_time: Duration,
}

impl RunOptions {
  pub const fn stale_time(stale_time: Duration) -> Self {
    Self { stale_time }
  }

  /// Data that never goes stale within the session.
  pub const fn forever() -> Self {
    Self {
      stale_time: Duration::MAX,
    }
  }
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::ZERO,
    }
  }
}

/// `{ key, fetch, stale_time, enabled }`, as produced by the per-resource
/// query factories.
pub struct QueryDescriptor<T> {
  pub key: QueryKey,
  pub fetch: FetchFn<T>,
  pub stale_time: Duration,
  pub enabled: bool,
}

impl<T: Any + Send + Sync> QueryDescriptor<T> {
  pub fn new<F, Fut>(key: QueryKey, fetch: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      key,
      fetch: Box::new(move || fetch().boxed()),
      stale_time: Duration::ZERO,
      enabled: true,
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn options(&self) -> RunOptions {
    RunOptions::stale_time(self.stale_time)
  }

  /// Forget the data type so descriptors of different resources can be run
  /// side by side.
  pub fn erase(self) -> AnyQuery {
    let fetch = self.fetch;
    AnyQuery {
      key: self.key,
      fetch: Box::new(move || {
        fetch()
          .map(|result| result.map(|data| Arc::new(data) as QueryData))
          .boxed()
      }),
      stale_time: self.stale_time,
      enabled: self.enabled,
    }
  }
}

impl<T> fmt::Debug for QueryDescriptor<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryDescriptor")
      .field("key", &self.key)
      .field("stale_time", &self.stale_time)
      .field("enabled", &self.enabled)
      .finish_non_exhaustive()
  }
}

/// Type-erased descriptor, used for auxiliary queries.
pub struct AnyQuery {
  pub key: QueryKey,
  pub fetch: FetchFn<QueryData>,
  pub stale_time: Duration,
  pub enabled: bool,
}

impl AnyQuery {
  pub fn options(&self) -> RunOptions {
    RunOptions::stale_time(self.stale_time)
  }
}

impl fmt::Debug for AnyQuery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AnyQuery")
      .field("key", &self.key)
      .field("stale_time", &self.stale_time)
      .field("enabled", &self.enabled)
      .finish_non_exhaustive()
  }
}
