//! In-memory key → entry table with subscribers and delayed garbage collection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

use super::entry::CacheEntry;
use super::key::QueryKey;

/// Callback invoked with a snapshot every time an entry changes.
pub type Subscriber = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

/// Default delay before an unobserved entry is dropped.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

struct Slot {
  entry: CacheEntry,
  subscribers: Vec<(u64, Subscriber)>,
  /// Bumped whenever the subscriber set changes or an unobserved entry is
  /// written; a pending GC only fires if the epoch it captured is still
  /// current.
  gc_epoch: u64,
}

impl Slot {
  fn new(key: QueryKey) -> Self {
    Self {
      entry: CacheEntry::new(key),
      subscribers: Vec::new(),
      gc_epoch: 0,
    }
  }

  fn callbacks(&self) -> Vec<Subscriber> {
    self.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
  }
}

#[derive(Default)]
struct Inner {
  slots: HashMap<QueryKey, Slot>,
  next_subscriber: u64,
}

type Shared = Arc<Mutex<Inner>>;

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
  // Critical sections never run user code, so a poisoned lock still holds
  // consistent data.
  inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The cache store. Cloning yields another handle to the same table.
///
/// All reads and writes are synchronous. Subscribers are notified after the
/// internal lock is released, so a callback may read the store again.
#[derive(Clone)]
pub struct CacheStore {
  inner: Shared,
  gc_time: Duration,
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner::default())),
      gc_time: DEFAULT_GC_TIME,
    }
  }

  /// Set how long an entry without subscribers is kept.
  pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
    self.gc_time = gc_time;
    self
  }

  pub fn gc_time(&self) -> Duration {
    self.gc_time
  }

  /// Snapshot of the entry for `key`.
  pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
    lock(&self.inner).slots.get(key).map(|s| s.entry.clone())
  }

  /// Create or replace the entry for `key` and notify its subscribers.
  pub fn set<F>(&self, key: &QueryKey, updater: F) -> CacheEntry
  where
    F: FnOnce(&mut CacheEntry),
  {
    self
      .update(key, |entry| {
        updater(entry);
        true
      })
      .unwrap_or_else(|| CacheEntry::new(key.clone()))
  }

  /// Like [`set`](Self::set), but the updater decides whether the change is
  /// kept. Returning `false` must leave the entry untouched; nobody is
  /// notified and `None` is returned.
  ///
  /// Writing an entry nobody subscribes to schedules its collection after the
  /// GC delay, so entries only ever fetched through the executor are dropped
  /// too.
  pub(crate) fn update<F>(&self, key: &QueryKey, updater: F) -> Option<CacheEntry>
  where
    F: FnOnce(&mut CacheEntry) -> bool,
  {
    let (snapshot, callbacks, gc_epoch) = {
      let mut inner = lock(&self.inner);
      let created = !inner.slots.contains_key(key);
      let slot = inner
        .slots
        .entry(key.clone())
        .or_insert_with(|| Slot::new(key.clone()));

      let mut draft = slot.entry.clone();
      if !updater(&mut draft) {
        if created {
          inner.slots.remove(key);
        }
        return None;
      }
      slot.entry = draft;

      // An unobserved entry restarts its GC delay on every write
      let gc_epoch = slot.subscribers.is_empty().then(|| {
        slot.gc_epoch += 1;
        slot.gc_epoch
      });
      (slot.entry.clone(), slot.callbacks(), gc_epoch)
    };

    if let Some(epoch) = gc_epoch {
      schedule_gc(&self.inner, key.clone(), epoch, self.gc_time);
    }

    for callback in callbacks {
      callback(&snapshot);
    }
    Some(snapshot)
  }

  /// Register `callback` for changes to `key`. The entry is created (idle) if
  /// it does not exist yet.
  pub fn subscribe<F>(&self, key: &QueryKey, callback: F) -> Subscription
  where
    F: Fn(&CacheEntry) + Send + Sync + 'static,
  {
    let mut inner = lock(&self.inner);
    inner.next_subscriber += 1;
    let id = inner.next_subscriber;

    let slot = inner
      .slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(key.clone()));
    slot.subscribers.push((id, Arc::new(callback)));
    slot.gc_epoch += 1;

    Subscription {
      store: Arc::downgrade(&self.inner),
      key: key.clone(),
      id,
      gc_time: self.gc_time,
      active: true,
    }
  }

  /// Message-passing form of [`subscribe`](Self::subscribe): every change is
  /// sent as a snapshot on the returned channel.
  pub fn watch(&self, key: &QueryKey) -> (Subscription, mpsc::UnboundedReceiver<CacheEntry>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = self.subscribe(key, move |entry| {
      // Receiver gone means the watcher is shutting down
      let _ = tx.send(entry.clone());
    });
    (subscription, rx)
  }

  /// True iff the entry succeeded less than `stale_time` ago and was not
  /// invalidated since.
  pub fn is_fresh(&self, key: &QueryKey, stale_time: Duration) -> bool {
    lock(&self.inner)
      .slots
      .get(key)
      .is_some_and(|s| s.entry.is_fresh(stale_time))
  }

  /// Mark the entry stale without dropping its data. Returns false if the key
  /// is unknown.
  pub fn invalidate(&self, key: &QueryKey) -> bool {
    if !self.contains(key) {
      return false;
    }
    self.set(key, |entry| entry.invalidated = true);
    true
  }

  /// Invalidate every entry of `scope`, optionally restricted to one entity.
  /// Returns the number of entries touched.
  pub fn invalidate_matching(&self, scope: &str, entity: Option<&str>) -> usize {
    let keys: Vec<QueryKey> = self
      .keys()
      .into_iter()
      .filter(|k| k.matches(scope, entity))
      .collect();

    for key in &keys {
      self.set(key, |entry| entry.invalidated = true);
    }
    keys.len()
  }

  pub fn contains(&self, key: &QueryKey) -> bool {
    lock(&self.inner).slots.contains_key(key)
  }

  /// Drop an entry immediately, regardless of subscribers.
  pub fn remove(&self, key: &QueryKey) -> Option<CacheEntry> {
    lock(&self.inner).slots.remove(key).map(|s| s.entry)
  }

  pub fn keys(&self) -> Vec<QueryKey> {
    lock(&self.inner).slots.keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    lock(&self.inner).slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Disposer returned by [`CacheStore::subscribe`].
///
/// Dropping it unsubscribes. Once a key has no subscribers left, its entry is
/// removed after the store's GC delay unless someone subscribes again first.
pub struct Subscription {
  store: Weak<Mutex<Inner>>,
  key: QueryKey,
  id: u64,
  gc_time: Duration,
  active: bool,
}

impl Subscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn unsubscribe(mut self) {
    self.release();
  }

  fn release(&mut self) {
    if !self.active {
      return;
    }
    self.active = false;

    let Some(store) = self.store.upgrade() else {
      return;
    };

    let epoch = {
      let mut inner = lock(&store);
      // Entry already collected: nothing to do
      let Some(slot) = inner.slots.get_mut(&self.key) else {
        return;
      };
      slot.subscribers.retain(|(id, _)| *id != self.id);
      if !slot.subscribers.is_empty() {
        return;
      }
      slot.gc_epoch += 1;
      slot.gc_epoch
    };

    if self.gc_time.is_zero() {
      collect(&store, &self.key, epoch);
    } else {
      schedule_gc(&store, self.key.clone(), epoch, self.gc_time);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.release();
  }
}

fn schedule_gc(store: &Shared, key: QueryKey, epoch: u64, gc_time: Duration) {
  // Without a runtime there is no timer; the entry simply stays.
  let Ok(handle) = tokio::runtime::Handle::try_current() else {
    return;
  };

  let store = Arc::downgrade(store);
  handle.spawn(async move {
    tokio::time::sleep(gc_time).await;
    if let Some(store) = store.upgrade() {
      collect(&store, &key, epoch);
    }
  });
}

fn collect(store: &Mutex<Inner>, key: &QueryKey, epoch: u64) {
  let mut inner = lock(store);
  let expired = inner
    .slots
    .get(key)
    .is_some_and(|s| s.subscribers.is_empty() && s.gc_epoch == epoch);
  if expired {
    inner.slots.remove(key);
    trace!(key = %key, "collected unobserved cache entry");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::entry::QueryStatus;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn key(name: &str) -> QueryKey {
    QueryKey::simple("products", name).unwrap()
  }

  #[test]
  fn test_get_missing_is_none() {
    let store = CacheStore::new();
    assert!(store.get(&key("list")).is_none());
    assert!(store.is_empty());
  }

  #[test]
  fn test_set_creates_and_replaces() {
    let store = CacheStore::new();
    let k = key("list");

    store.set(&k, |e| e.status = QueryStatus::Loading);
    assert_eq!(store.get(&k).unwrap().status, QueryStatus::Loading);

    store.set(&k, |e| {
      e.status = QueryStatus::Success;
      e.data = Some(Arc::new(vec![1, 2, 3]));
    });
    let entry = store.get(&k).unwrap();
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.data_as::<Vec<i32>>().as_deref(), Some(&vec![1, 2, 3]));
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_subscribers_notified_synchronously() {
    let store = CacheStore::new();
    let k = key("list");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_cb = Arc::clone(&seen);
    let _sub = store.subscribe(&k, move |e| seen_cb.lock().unwrap().push(e.status));

    store.set(&k, |e| e.status = QueryStatus::Loading);
    store.set(&k, |e| e.status = QueryStatus::Success);

    assert_eq!(
      *seen.lock().unwrap(),
      vec![QueryStatus::Loading, QueryStatus::Success]
    );
  }

  #[test]
  fn test_callback_may_read_store() {
    let store = CacheStore::new();
    let k = key("list");
    let observed = Arc::new(Mutex::new(None));

    let reader = store.clone();
    let observed_cb = Arc::clone(&observed);
    let k_cb = k.clone();
    let _sub = store.subscribe(&k, move |_| {
      *observed_cb.lock().unwrap() = reader.get(&k_cb).map(|e| e.status);
    });

    store.set(&k, |e| e.status = QueryStatus::Error);
    assert_eq!(*observed.lock().unwrap(), Some(QueryStatus::Error));
  }

  #[test]
  fn test_rejected_update_does_not_notify() {
    let store = CacheStore::new();
    let k = key("list");
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = Arc::clone(&calls);
    let _sub = store.subscribe(&k, move |_| {
      calls_cb.fetch_add(1, Ordering::SeqCst);
    });

    let result = store.update(&k, |e| {
      e.status = QueryStatus::Success;
      false
    });
    assert!(result.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.get(&k).unwrap().status, QueryStatus::Idle);
  }

  #[test]
  fn test_unsubscribed_callback_not_called() {
    let store = CacheStore::new().with_gc_time(Duration::from_secs(60));
    let k = key("list");
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = Arc::clone(&calls);
    let sub = store.subscribe(&k, move |_| {
      calls_cb.fetch_add(1, Ordering::SeqCst);
    });

    sub.unsubscribe();
    store.set(&k, |e| e.status = QueryStatus::Loading);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_zero_gc_time_collects_immediately() {
    let store = CacheStore::new().with_gc_time(Duration::ZERO);
    let k = key("list");
    let sub = store.subscribe(&k, |_| {});
    assert!(store.contains(&k));
    drop(sub);
    assert!(!store.contains(&k));
  }

  #[test]
  fn test_unsubscribe_after_collection_is_noop() {
    let store = CacheStore::new().with_gc_time(Duration::ZERO);
    let k = key("list");
    let first = store.subscribe(&k, |_| {});
    let second = store.subscribe(&k, |_| {});
    store.remove(&k);
    first.unsubscribe();
    second.unsubscribe();
    assert!(!store.contains(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_gc_after_delay() {
    let store = CacheStore::new().with_gc_time(Duration::from_secs(30));
    let k = key("list");

    let sub = store.subscribe(&k, |_| {});
    sub.unsubscribe();

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(store.contains(&k));

    tokio::time::sleep(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert!(!store.contains(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_resubscribe_cancels_gc() {
    let store = CacheStore::new().with_gc_time(Duration::from_secs(30));
    let k = key("list");

    store.subscribe(&k, |_| {}).unsubscribe();
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Remount before the delay elapses
    let _again = store.subscribe(&k, |_| {});
    tokio::time::sleep(Duration::from_secs(60)).await;
    tokio::task::yield_now().await;
    assert!(store.contains(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_unobserved_entries_are_collected() {
    let store = CacheStore::new().with_gc_time(Duration::from_secs(1));
    for page in 0..100 {
      store.set(&key(&format!("list-{page}")), |e| e.status = QueryStatus::Success);
    }
    assert_eq!(store.len(), 100);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    tokio::task::yield_now().await;
    assert!(store.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_write_restarts_gc_delay() {
    let store = CacheStore::new().with_gc_time(Duration::from_secs(30));
    let k = key("list");

    store.set(&k, |e| e.status = QueryStatus::Loading);
    tokio::time::sleep(Duration::from_secs(20)).await;
    store.set(&k, |e| e.status = QueryStatus::Success);

    tokio::time::sleep(Duration::from_secs(20)).await;
    tokio::task::yield_now().await;
    assert!(store.contains(&k));

    tokio::time::sleep(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;
    assert!(!store.contains(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_subscribe_cancels_write_gc() {
    let store = CacheStore::new().with_gc_time(Duration::from_secs(30));
    let k = key("list");

    store.set(&k, |e| e.status = QueryStatus::Success);
    let _sub = store.subscribe(&k, |_| {});

    tokio::time::sleep(Duration::from_secs(60)).await;
    tokio::task::yield_now().await;
    assert!(store.contains(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_is_fresh() {
    let store = CacheStore::new();
    let k = key("list");
    let stale_time = Duration::from_secs(10);

    assert!(!store.is_fresh(&k, stale_time));

    store.set(&k, |e| {
      e.status = QueryStatus::Success;
      e.fetched_at = Some(tokio::time::Instant::now());
    });
    assert!(store.is_fresh(&k, stale_time));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!store.is_fresh(&k, stale_time));
    assert!(store.is_fresh(&k, Duration::MAX));
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_matching() {
    let store = CacheStore::new();
    let list = key("list");
    let detail = key("detail");
    let other = QueryKey::simple("orders", "list").unwrap();

    for k in [&list, &detail, &other] {
      store.set(k, |e| {
        e.status = QueryStatus::Success;
        e.fetched_at = Some(tokio::time::Instant::now());
      });
    }

    assert_eq!(store.invalidate_matching("products", None), 2);
    assert!(!store.is_fresh(&list, Duration::MAX));
    assert!(!store.is_fresh(&detail, Duration::MAX));
    assert!(store.is_fresh(&other, Duration::MAX));
    assert!(!store.invalidate(&key("missing")));
  }

  #[tokio::test]
  async fn test_watch_delivers_snapshots() {
    let store = CacheStore::new();
    let k = key("list");
    let (_sub, mut rx) = store.watch(&k);

    store.set(&k, |e| e.status = QueryStatus::Loading);
    let entry = rx.recv().await.unwrap();
    assert_eq!(entry.status, QueryStatus::Loading);
    assert_eq!(entry.key, k);
  }
}
