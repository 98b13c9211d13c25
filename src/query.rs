//! Subscriber-side query handles.
//!
//! A `Query<T>` wraps a fetch closure with loading/success/error state. When
//! bound to a cache entry it reads through the cache and follows the entry:
//! invalidation triggers a refetch, any other change (an optimistic patch, a
//! rollback, a fetch by someone else) reloads the value from the cache.
//!
//! # Example
//!
//! ```ignore
//! let mut query = invoices.query_get(EntityId::from("42"));
//!
//! // Serve from cache or start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(invoice) => render(invoice),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::cache::{CacheEvent, CacheStore, EntryStatus, QueryKey, Subscription};

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

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, String>> + Send + Sync>;
type LoaderFn<T> = Box<dyn Fn() -> Result<Option<T>, String> + Send + Sync>;

/// Link between a query and the cache entry it reads.
struct CacheBinding<T> {
  store: CacheStore,
  key: QueryKey,
  subscription: Subscription,
  load: LoaderFn<T>,
}

/// Async query for data fetching with state management.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
  binding: Option<CacheBinding<T>>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a query that always fetches through `fetcher`.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || fetcher().boxed()),
      receiver: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60),
      binding: None,
    }
  }

  /// Create a query bound to the cache entry `key`. The fetcher is expected
  /// to populate that entry.
  pub fn cached<F, Fut>(store: CacheStore, key: QueryKey, fetcher: F) -> Self
  where
    T: DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    let subscription = store.subscribe(&key);
    let load: LoaderFn<T> = {
      let store = store.clone();
      let key = key.clone();
      Box::new(move || store.get_cached::<T>(&key).map_err(|e| e.to_string()))
    };

    let mut query = Self::new(fetcher);
    query.binding = Some(CacheBinding {
      store,
      key,
      subscription,
      load,
    });
    query
  }

  /// Set the stale time for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
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

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Check if the data is stale (older than stale_time).
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Serve a populated cache entry, or start fetching if not already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    if self.load_from_cache(true) {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    self.receiver = None;
    self.start_fetch();
  }

  /// Apply a finished fetch and react to cache events.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick
  /// handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.poll_receiver();

    let mut invalidated = false;
    let mut updated = false;
    if let Some(binding) = &mut self.binding {
      while let Some(event) = binding.subscription.try_next() {
        match event {
          CacheEvent::Invalidated => invalidated = true,
          CacheEvent::Updated => updated = true,
        }
      }
    }

    if invalidated {
      self.refetch();
      changed = true;
    } else if updated && !self.state.is_loading() {
      changed |= self.load_from_cache(false);
    }

    changed
  }

  fn poll_receiver(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Replace the state with the cached value. With `only_populated`, stale
  /// (invalidated) entries are not served.
  fn load_from_cache(&mut self, only_populated: bool) -> bool {
    let Some(binding) = &self.binding else {
      return false;
    };
    if only_populated && binding.store.status(&binding.key) != EntryStatus::Populated {
      return false;
    }

    match (binding.load)() {
      Ok(Some(data)) => {
        self.state = QueryState::Success(data);
        self.fetched_at = Some(Instant::now());
        true
      }
      Ok(None) => false,
      Err(error) => {
        self.state = QueryState::Error(error);
        true
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

// Query is not Clone because the fetcher is boxed and receiver is owned.
// If you need to share a query, wrap it in Arc<Mutex<Query<T>>>.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .field("key", &self.binding.as_ref().map(|b| b.key.description()))
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheTag;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| async { Ok::<_, String>(vec![1, 2, 3]) });

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> = Query::new(|| async { Err("Something went wrong".to_string()) });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_error());
    assert_eq!(query.error(), Some("Something went wrong"));
  }

  #[tokio::test]
  async fn test_query_stale() {
    let mut query = Query::new(|| async { Ok::<_, String>(42) }).with_stale_time(Duration::ZERO);

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let mut query = Query::new(|| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok::<_, String>(42)
    });

    query.fetch();
    assert!(query.is_loading());

    query.fetch();
    assert!(query.is_loading());
  }

  #[tokio::test]
  async fn test_refetch_cancels_pending() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      let counter = counter_clone.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst))
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_cached_query_serves_populated_entry_without_fetching() {
    let store = CacheStore::new();
    let key = QueryKey::list_all("Invoice", None);
    store.begin_fetch(&key);
    store.fulfill(&key, json!([1, 2]), vec![CacheTag::list("Invoice")]).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let mut query: Query<Vec<u32>> = Query::cached(store, key, move || {
      calls_clone.fetch_add(1, Ordering::SeqCst);
      async { Ok(vec![9]) }
    });

    query.fetch();
    assert_eq!(query.data(), Some(&vec![1, 2]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_cached_query_refetches_on_invalidation() {
    let store = CacheStore::new();
    let key = QueryKey::list_all("Invoice", None);
    let calls = Arc::new(AtomicU32::new(0));

    let fetch_store = store.clone();
    let fetch_key = key.clone();
    let calls_clone = calls.clone();
    let mut query: Query<Vec<u32>> = Query::cached(store.clone(), key.clone(), move || {
      let store = fetch_store.clone();
      let key = fetch_key.clone();
      let n = calls_clone.fetch_add(1, Ordering::SeqCst);
      async move {
        let data = vec![n];
        store.begin_fetch(&key);
        store
          .fulfill(&key, json!(data), vec![CacheTag::list("Invoice")])
          .map_err(|e| e.to_string())?;
        Ok(data)
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert_eq!(query.data(), Some(&vec![0]));

    store.invalidate_tags(&[CacheTag::list("Invoice")]).unwrap();
    assert!(query.poll());
    assert!(query.is_loading());

    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert_eq!(query.data(), Some(&vec![1]));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
