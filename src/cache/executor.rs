//! Fetch executor: fresh hits, single-flight de-duplication and ordered commits.

use chrono::Utc;
use color_eyre::Result;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::descriptor::{AnyQuery, QueryDescriptor, RunOptions};
use super::entry::{CacheEntry, QueryData, QueryStatus};
use super::key::QueryKey;
use super::store::CacheStore;
use crate::error::{QueryError, QueryResult};

type SharedFetch = Shared<BoxFuture<'static, QueryResult<QueryData>>>;

struct InFlight {
  generation: u64,
  op: SharedFetch,
}

type InFlightRegistry = Arc<Mutex<HashMap<QueryKey, InFlight>>>;

fn lock(registry: &Mutex<HashMap<QueryKey, InFlight>>) -> MutexGuard<'_, HashMap<QueryKey, InFlight>> {
  registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs queries against a [`CacheStore`].
///
/// - Fresh data is returned without touching the network.
/// - Concurrent requests for the same key share one network operation.
/// - Fetches run on their own task: dropping the caller never aborts them, and
///   a late result is still committed unless a request that started later has
///   already stored its data.
///
/// Cloning yields another handle to the same store and in-flight registry.
#[derive(Clone)]
pub struct QueryExecutor {
  store: CacheStore,
  in_flight: InFlightRegistry,
  generation: Arc<AtomicU64>,
}

impl QueryExecutor {
  pub fn new(store: CacheStore) -> Self {
    Self {
      store,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      generation: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Fetch `key`, serving cached data while it is younger than
  /// `options.stale_time`.
  ///
  /// 1. Fresh cache → return immediately
  /// 2. Same key already in flight → wait for that operation
  /// 3. Otherwise mark the entry loading, run `fetch` and commit its result
  ///
  /// Errors are stored on the entry and returned; nothing is retried.
  pub async fn run<T, F, Fut>(&self, key: &QueryKey, fetch: F, options: RunOptions) -> QueryResult<Arc<T>>
  where
    T: Any + Send + Sync,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let data = self
      .execute(key, options.stale_time, false, move || erase(fetch()))
      .await?;
    downcast(key, data)
  }

  /// Fetch `key` even if fresh, replacing any operation already in flight.
  /// The replaced operation still settles, but its result is dropped if this
  /// one commits first.
  pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, fetch: F, options: RunOptions) -> QueryResult<Arc<T>>
  where
    T: Any + Send + Sync,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let data = self
      .execute(key, options.stale_time, true, move || erase(fetch()))
      .await?;
    downcast(key, data)
  }

  /// Run a descriptor. A disabled descriptor never fetches: it returns
  /// whatever is cached, or [`QueryError::Disabled`].
  pub async fn fetch_query<T: Any + Send + Sync>(&self, query: QueryDescriptor<T>) -> QueryResult<Arc<T>> {
    if !query.enabled {
      return self.disabled(&query.key).and_then(|data| downcast(&query.key, data));
    }
    let options = query.options();
    self.run(&query.key, query.fetch, options).await
  }

  /// Run a type-erased descriptor.
  pub async fn fetch_any(&self, query: AnyQuery) -> QueryResult<QueryData> {
    if !query.enabled {
      return self.disabled(&query.key);
    }
    let fetch = query.fetch;
    self.execute(&query.key, query.stale_time, false, fetch).await
  }

  /// Typed read of whatever is cached for `key`, fresh or not.
  pub fn cached<T: Any + Send + Sync>(&self, key: &QueryKey) -> Option<Arc<T>> {
    self.store.get(key).and_then(|e| e.data_as::<T>())
  }

  pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
    self.store.get(key)
  }

  pub fn is_fetching(&self, key: &QueryKey) -> bool {
    lock(&self.in_flight).contains_key(key)
  }

  pub fn in_flight_count(&self) -> usize {
    lock(&self.in_flight).len()
  }

  pub fn invalidate(&self, key: &QueryKey) -> bool {
    self.store.invalidate(key)
  }

  /// Mark every cached query of `scope` (optionally one entity) stale. Used
  /// after a mutation so the next read goes to the network.
  pub fn invalidate_matching(&self, scope: &str, entity: Option<&str>) -> usize {
    let count = self.store.invalidate_matching(scope, entity);
    debug!(scope, entity, count, "invalidated cached queries");
    count
  }

  fn disabled(&self, key: &QueryKey) -> QueryResult<QueryData> {
    self
      .store
      .get(key)
      .and_then(|e| e.data)
      .ok_or_else(|| QueryError::Disabled {
        key: key.to_string(),
      })
  }

  async fn execute<M>(&self, key: &QueryKey, stale_time: Duration, replace: bool, make: M) -> QueryResult<QueryData>
  where
    M: FnOnce() -> BoxFuture<'static, Result<QueryData>>,
  {
    if !replace {
      if let Some(data) = self.fresh_data(key, stale_time) {
        trace!(key = %key, "serving fresh cache entry");
        return Ok(data);
      }
    }

    let op = self.join_or_start(key, stale_time, replace, make);
    op.await
  }

  fn fresh_data(&self, key: &QueryKey, stale_time: Duration) -> Option<QueryData> {
    let entry = self.store.get(key)?;
    if entry.is_fresh(stale_time) {
      entry.data
    } else {
      None
    }
  }

  fn join_or_start<M>(&self, key: &QueryKey, stale_time: Duration, replace: bool, make: M) -> SharedFetch
  where
    M: FnOnce() -> BoxFuture<'static, Result<QueryData>>,
  {
    let (op, generation) = {
      let mut in_flight = lock(&self.in_flight);
      if !replace {
        if let Some(existing) = in_flight.get(key) {
          trace!(key = %key, generation = existing.generation, "joining in-flight fetch");
          return existing.op.clone();
        }
      }

      let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
      debug!(key = %key, generation, replace, "starting fetch");

      // Registered while the lock is held, so the task cannot deregister
      // before the registration exists.
      let task = tokio::spawn(self.clone().settle(key.clone(), generation, stale_time, make()));
      let executor = self.clone();
      let task_key = key.clone();
      let op = async move {
        match task.await {
          Ok(outcome) => outcome,
          // Aborted or torn down with the runtime
          Err(e) => executor.abandon(&task_key, generation, e.to_string()),
        }
      }
      .boxed()
      .shared();

      in_flight.insert(
        key.clone(),
        InFlight {
          generation,
          op: op.clone(),
        },
      );
      (op, generation)
    };

    // Notifies subscribers, so it must run without the registry lock.
    self.store.update(key, |entry| {
      if entry.settled >= generation {
        // Our own result already landed
        return false;
      }
      entry.status = QueryStatus::Loading;
      entry.stale_time = stale_time;
      true
    });

    op
  }

  async fn settle(
    self,
    key: QueryKey,
    generation: u64,
    stale_time: Duration,
    fetch: BoxFuture<'static, Result<QueryData>>,
  ) -> QueryResult<QueryData> {
    let outcome = match AssertUnwindSafe(fetch).catch_unwind().await {
      Ok(result) => result.map_err(|report| QueryError::Fetch {
        key: key.to_string(),
        message: format!("{report:#}"),
      }),
      Err(panic) => Err(QueryError::Cancelled {
        key: key.to_string(),
        reason: format!("fetch panicked: {}", panic_message(panic.as_ref())),
      }),
    };

    let committed = self.store.update(&key, |entry| {
      if generation < entry.committed {
        return false;
      }
      // Checked under the store lock: a replacing op that already settled
      // has deregistered and no longer holds the entry in loading.
      let superseded = self.is_replaced(&key, generation);
      entry.settled = entry.settled.max(generation);
      match &outcome {
        Ok(data) => {
          entry.data = Some(Arc::clone(data));
          entry.error = None;
          entry.cached_at = Some(Utc::now());
          entry.committed = generation;
          entry.invalidated = false;
          entry.stale_time = stale_time;
          if superseded {
            entry.status = QueryStatus::Loading;
          } else {
            entry.fetched_at = Some(Instant::now());
            entry.status = QueryStatus::Success;
          }
        }
        Err(error) => {
          entry.error = Some(error.clone());
          entry.status = if superseded {
            QueryStatus::Loading
          } else {
            QueryStatus::Error
          };
        }
      }
      true
    });

    self.deregister(&key, generation);

    match committed {
      Some(_) => {
        match &outcome {
          Ok(_) => debug!(key = %key, generation, "committed fetch result"),
          Err(e) => debug!(key = %key, generation, error = %e, "committed fetch error"),
        }
        outcome
      }
      None => {
        debug!(key = %key, generation, "discarded out-of-order response");
        // Hand waiters the newer data instead of the superseded result.
        match self.store.get(&key).and_then(|e| e.data) {
          Some(data) => Ok(data),
          None => outcome,
        }
      }
    }
  }

  /// True if a newer operation than `generation` is registered for `key`.
  fn is_replaced(&self, key: &QueryKey, generation: u64) -> bool {
    lock(&self.in_flight)
      .get(key)
      .is_some_and(|f| f.generation != generation)
  }

  fn deregister(&self, key: &QueryKey, generation: u64) {
    let mut in_flight = lock(&self.in_flight);
    if in_flight.get(key).is_some_and(|f| f.generation == generation) {
      in_flight.remove(key);
    }
  }

  /// Settle an operation whose task died before committing, so the key can
  /// be fetched again.
  fn abandon(&self, key: &QueryKey, generation: u64, reason: String) -> QueryResult<QueryData> {
    let error = QueryError::Cancelled {
      key: key.to_string(),
      reason,
    };
    warn!(key = %key, generation, error = %error, "fetch task ended without a result");

    self.deregister(key, generation);
    self.store.update(key, |entry| {
      if generation < entry.committed || entry.settled >= generation {
        return false;
      }
      entry.settled = generation;
      entry.error = Some(error.clone());
      entry.status = if self.is_replaced(key, generation) {
        QueryStatus::Loading
      } else {
        QueryStatus::Error
      };
      true
    });
    Err(error)
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  payload
    .downcast_ref::<&str>()
    .copied()
    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    .unwrap_or("non-string payload")
}

fn erase<T, Fut>(fut: Fut) -> BoxFuture<'static, Result<QueryData>>
where
  T: Any + Send + Sync,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  fut.map(|result| result.map(|data| Arc::new(data) as QueryData)).boxed()
}

fn downcast<T: Any + Send + Sync>(key: &QueryKey, data: QueryData) -> QueryResult<Arc<T>> {
  data.downcast::<T>().map_err(|_| QueryError::TypeMismatch {
    key: key.to_string(),
  })
}
