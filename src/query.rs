//! Per-view query handle on top of the shared executor.
//!
//! Inspired by TanStack Query's `useQuery`: a `Query<T>` is bound to a
//! descriptor factory, fetches through the [`QueryExecutor`] on a spawned
//! task, and watches its cache entry so refetches triggered elsewhere show up
//! on the next `poll()`.
//!
//! # Example
//!
//! ```ignore
//! let queries = queries.clone();
//! let mut query = Query::new(executor.clone(), move || {
//!     queries.list(Resource::Products, PageState::first(), None)
//! });
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(page) => render_page(page),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::{
  AnyQuery, CacheEntry, PrefetchCoordinator, QueryDescriptor, QueryExecutor, QueryKey, QueryStatus,
  Subscription,
};
use crate::error::QueryResult;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Builds the descriptor for the next fetch
type DescriptorFn<T> = Box<dyn Fn() -> QueryResult<QueryDescriptor<T>> + Send + Sync>;

/// Builds the auxiliary queries fetched alongside the primary one
type AuxiliaryFn = Box<dyn Fn() -> QueryResult<Vec<AnyQuery>> + Send + Sync>;

/// Outcome of one spawned fetch
struct Settled<T> {
  primary: QueryResult<Arc<T>>,
  auxiliary: Option<String>,
}

/// Async query bound to one cache entry.
///
/// Query<T> encapsulates:
/// - The descriptor factory (key, fetch function, stale time)
/// - Loading/success/error states
/// - Async result handling via channels
/// - A watch on the cache entry, which also keeps it from being collected
pub struct Query<T> {
  state: QueryState<Arc<T>>,
  executor: QueryExecutor,
  descriptor: DescriptorFn<T>,
  auxiliaries: Option<AuxiliaryFn>,
  key: Option<QueryKey>,
  stale_time: Duration,
  watch: Option<(Subscription, mpsc::UnboundedReceiver<CacheEntry>)>,
  receiver: Option<mpsc::UnboundedReceiver<Settled<T>>>,
  warning: Option<String>,
}

impl<T: Any + Send + Sync> Query<T> {
  /// Create a new query with the given descriptor factory.
  ///
  /// The factory is called each time `fetch()` or `refetch()` is invoked,
  /// so it may read state that changes between fetches.
  pub fn new<F>(executor: QueryExecutor, descriptor: F) -> Self
  where
    F: Fn() -> QueryResult<QueryDescriptor<T>> + Send + Sync + 'static,
  {
    Self {
      state: QueryState::Idle,
      executor,
      descriptor: Box::new(descriptor),
      auxiliaries: None,
      key: None,
      stale_time: Duration::ZERO,
      watch: None,
      receiver: None,
      warning: None,
    }
  }

  /// Fetch these queries together with the primary one, through the
  /// prefetch coordinator.
  pub fn with_auxiliaries<F>(mut self, auxiliaries: F) -> Self
  where
    F: Fn() -> QueryResult<Vec<AnyQuery>> + Send + Sync + 'static,
  {
    self.auxiliaries = Some(Box::new(auxiliaries));
    self
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<Arc<T>> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&Arc<T>> {
    self.state.data()
  }

  /// Key of the last fetch, if any.
  pub fn key(&self) -> Option<&QueryKey> {
    self.key.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Get the error message if the query failed.
  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Failure of an auxiliary query while the primary data did arrive.
  pub fn warning(&self) -> Option<&str> {
    self.warning.as_deref()
  }

  /// Check if the data is older than the descriptor's stale time.
  pub fn is_stale(&self) -> bool {
    match (&self.state, &self.key) {
      (QueryState::Success(_), Some(key)) => !self.executor.store().is_fresh(key, self.stale_time),
      _ => false,
    }
  }

  /// Start fetching data if not already loading.
  ///
  /// Fresh cached data is taken as is, without a task.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch(false);
  }

  /// Force a refetch, even if already loading or data is fresh.
  pub fn refetch(&mut self) {
    // The previous task still commits to the cache; only its reply is dropped
    self.receiver = None;
    self.start_fetch(true);
  }

  /// Poll for cache updates and results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.drain_watch();

    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return changed,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(settled) => {
        self.receiver = None;
        self.settle(settled);
        changed = true;
      }
      Err(mpsc::error::TryRecvError::Empty) => {}
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        changed = true;
      }
    }
    changed
  }

  /// Wait until the pending fetch settles. Returns immediately when idle.
  pub async fn settled(&mut self) -> &QueryState<Arc<T>> {
    if let Some(receiver) = &mut self.receiver {
      let settled = receiver.recv().await;
      self.receiver = None;
      self.drain_watch();
      match settled {
        Some(settled) => self.settle(settled),
        None => self.state = QueryState::Error("Query was cancelled".to_string()),
      }
    }
    &self.state
  }

  fn start_fetch(&mut self, replace: bool) {
    let descriptor = match (self.descriptor)() {
      Ok(descriptor) => descriptor,
      Err(e) => {
        self.state = QueryState::Error(e.to_string());
        return;
      }
    };
    self.stale_time = descriptor.stale_time;
    self.watch_key(&descriptor.key);

    if !replace && descriptor.enabled && self.executor.store().is_fresh(&descriptor.key, descriptor.stale_time) {
      if let Some(data) = self.executor.cached::<T>(&descriptor.key) {
        self.state = QueryState::Success(data);
        return;
      }
    }

    let auxiliary = match self.auxiliaries.as_ref().map(|build| build()).transpose() {
      Ok(auxiliary) => auxiliary.unwrap_or_default(),
      Err(e) => {
        self.state = QueryState::Error(e.to_string());
        return;
      }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let coordinator = PrefetchCoordinator::new(self.executor.clone());
    tokio::spawn(async move {
      let settled = run(coordinator, descriptor, auxiliary, replace).await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(settled);
    });
  }

  fn watch_key(&mut self, key: &QueryKey) {
    if self.key.as_ref() == Some(key) && self.watch.is_some() {
      return;
    }
    self.key = Some(key.clone());
    self.watch = Some(self.executor.store().watch(key));
  }

  /// Apply cache updates made by anyone, including refetches started by
  /// other views of the same key.
  fn drain_watch(&mut self) -> bool {
    let Some((_, updates)) = &mut self.watch else {
      return false;
    };

    let mut latest = None;
    while let Ok(entry) = updates.try_recv() {
      latest = Some(entry);
    }
    let Some(entry) = latest else {
      return false;
    };

    match entry.status {
      QueryStatus::Success => match entry.data_as::<T>() {
        Some(data) => {
          let same = matches!(&self.state, QueryState::Success(current) if Arc::ptr_eq(current, &data));
          self.state = QueryState::Success(data);
          !same
        }
        None => false,
      },
      QueryStatus::Error => {
        let message = entry.error.map(|e| e.to_string()).unwrap_or_default();
        self.state = QueryState::Error(message);
        true
      }
      // Keep showing the current data while a background refetch runs
      QueryStatus::Loading if !self.state.is_success() => {
        let changed = !self.state.is_loading();
        self.state = QueryState::Loading;
        changed
      }
      QueryStatus::Loading | QueryStatus::Idle => false,
    }
  }

  fn settle(&mut self, settled: Settled<T>) {
    self.warning = settled.auxiliary;
    self.state = match settled.primary {
      Ok(data) => QueryState::Success(data),
      Err(e) => QueryState::Error(e.to_string()),
    };
  }
}

async fn run<T: Any + Send + Sync>(
  coordinator: PrefetchCoordinator,
  descriptor: QueryDescriptor<T>,
  auxiliary: Vec<AnyQuery>,
  replace: bool,
) -> Settled<T> {
  let executor = coordinator.executor();

  if replace {
    let options = descriptor.options();
    let key = descriptor.key;
    let (primary, auxiliary) = futures::join!(
      executor.refetch(&key, descriptor.fetch, options),
      coordinator.prefetch_all(auxiliary)
    );
    return Settled {
      primary,
      auxiliary: auxiliary.err().map(|e| e.to_string()),
    };
  }

  if auxiliary.is_empty() {
    return Settled {
      primary: executor.fetch_query(descriptor).await,
      auxiliary: None,
    };
  }

  // The coordinator reports the first failure; the primary data may still
  // have been committed
  let key = descriptor.key.clone();
  match coordinator.prefetch(descriptor, auxiliary).await {
    Ok(data) => Settled {
      primary: Ok(data),
      auxiliary: None,
    },
    Err(e) => match executor.get(&key).filter(|entry| entry.is_success()) {
      Some(entry) => match entry.data_as::<T>() {
        Some(data) => Settled {
          primary: Ok(data),
          auxiliary: Some(e.to_string()),
        },
        None => Settled {
          primary: Err(e),
          auxiliary: None,
        },
      },
      None => Settled {
        primary: Err(e),
        auxiliary: None,
      },
    },
  }
}

// Query is not Clone because the factory is boxed and the receivers are owned.
// Two views of the same key share data through the executor instead.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("key", &self.key)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}
