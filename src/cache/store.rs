//! Shared cache store: entry lifecycle, tag invalidation and subscribers.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::key::QueryKey;
use super::storage::{CacheStorage, MemoryStorage, StoredEntry};
use super::tag::CacheTag;
use crate::entity::merge_patch;
use crate::error::{ApiError, ApiResult};

/// Lifecycle of a cache entry.
///
/// `Absent -> Pending -> Populated -> Invalidated -> Pending -> Populated ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// Nothing fetched yet (or the only fetch failed)
  Absent,
  /// A fetch is in flight
  Pending,
  /// Holds the last fetched value
  Populated,
  /// Holds a value a mutation has marked stale
  Invalidated,
}

/// Notification sent to subscribers of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
  /// The stored value changed: fresh fetch, optimistic patch or rollback
  Updated,
  /// The entry was invalidated and should be refetched
  Invalidated,
}

/// Receiving half of an entry subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
  rx: mpsc::UnboundedReceiver<CacheEvent>,
}

impl Subscription {
  /// Next pending event, without waiting.
  pub fn try_next(&mut self) -> Option<CacheEvent> {
    self.rx.try_recv().ok()
  }

  /// Wait for the next event. `None` once the store is gone.
  pub async fn next(&mut self) -> Option<CacheEvent> {
    self.rx.recv().await
  }
}

/// Value captured before an optimistic patch, used to undo it.
#[derive(Debug, Clone)]
pub struct Snapshot {
  key: String,
  entry: StoredEntry,
}

impl Snapshot {
  pub fn value(&self) -> &Value {
    &self.entry.value
  }
}

struct Entry {
  status: EntryStatus,
  tags: BTreeSet<CacheTag>,
  /// Tags invalidated while a fetch was pending; the response may predate them.
  invalidated_in_flight: BTreeSet<CacheTag>,
  subscribers: Vec<mpsc::UnboundedSender<CacheEvent>>,
}

impl Entry {
  fn new(status: EntryStatus) -> Self {
    Self {
      status,
      tags: BTreeSet::new(),
      invalidated_in_flight: BTreeSet::new(),
      subscribers: Vec::new(),
    }
  }

  fn stale_on_arrival(&self, new_tags: &[CacheTag]) -> bool {
    self
      .invalidated_in_flight
      .iter()
      .any(|t| self.tags.contains(t) || new_tags.contains(t))
  }

  fn notify(&mut self, event: CacheEvent) {
    self.subscribers.retain(|tx| tx.send(event).is_ok());
  }

  fn has_subscribers(&self) -> bool {
    self.subscribers.iter().any(|tx| !tx.is_closed())
  }
}

/// Cache shared by every entity module of an application.
///
/// Cloning is cheap and yields a handle to the same cache. Entry metadata
/// lives here; values live in the [`CacheStorage`] backend. The internal lock
/// is only held for synchronous sections, never across a request.
#[derive(Clone)]
pub struct CacheStore {
  entries: Arc<Mutex<HashMap<String, Entry>>>,
  storage: Arc<dyn CacheStorage>,
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore {
  /// Create an in-memory cache.
  pub fn new() -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      storage: Arc::new(MemoryStorage::new()),
    }
  }

  /// Create a cache on top of a storage backend, restoring entries it
  /// already holds.
  pub fn with_storage(storage: impl CacheStorage + 'static) -> ApiResult<Self> {
    let mut entries = HashMap::new();
    for (key, stored) in storage.load_all()? {
      let status = if stored.invalidated {
        EntryStatus::Invalidated
      } else {
        EntryStatus::Populated
      };
      let mut entry = Entry::new(status);
      entry.tags = stored.tags.into_iter().collect();
      entries.insert(key, entry);
    }
    debug!(restored = entries.len(), "cache store opened");

    Ok(Self {
      entries: Arc::new(Mutex::new(entries)),
      storage: Arc::new(storage),
    })
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn status(&self, key: &QueryKey) -> EntryStatus {
    self
      .entries()
      .get(&key.cache_hash())
      .map(|e| e.status)
      .unwrap_or(EntryStatus::Absent)
  }

  /// Tags provided by an entry, sorted.
  pub fn tags(&self, key: &QueryKey) -> Vec<CacheTag> {
    self
      .entries()
      .get(&key.cache_hash())
      .map(|e| e.tags.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Hashes of the entries providing `tag`.
  pub fn keys_for_tag(&self, tag: &CacheTag) -> Vec<String> {
    let mut keys: Vec<String> = self
      .entries()
      .iter()
      .filter(|(_, e)| e.tags.contains(tag))
      .map(|(k, _)| k.clone())
      .collect();
    keys.sort();
    keys
  }

  pub fn cached_at(&self, key: &QueryKey) -> ApiResult<Option<DateTime<Utc>>> {
    Ok(self.storage.load(&key.cache_hash())?.map(|e| e.cached_at))
  }

  /// The stored value of an entry, populated or invalidated.
  pub fn get_cached_value(&self, key: &QueryKey) -> ApiResult<Option<Value>> {
    Ok(self.storage.load(&key.cache_hash())?.map(|e| e.value))
  }

  /// The stored value decoded as `T`.
  pub fn get_cached<T: DeserializeOwned>(&self, key: &QueryKey) -> ApiResult<Option<T>> {
    match self.get_cached_value(key)? {
      Some(value) => serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ApiError::Cache(format!("cached {} is malformed: {}", key.description(), e))),
      None => Ok(None),
    }
  }

  /// Number of live subscribers of an entry.
  pub fn subscriber_count(&self, key: &QueryKey) -> usize {
    self
      .entries()
      .get(&key.cache_hash())
      .map(|e| e.subscribers.iter().filter(|tx| !tx.is_closed()).count())
      .unwrap_or(0)
  }

  /// Subscribe to changes of an entry, creating it as `Absent` if needed.
  pub fn subscribe(&self, key: &QueryKey) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .entries()
      .entry(key.cache_hash())
      .or_insert_with(|| Entry::new(EntryStatus::Absent))
      .subscribers
      .push(tx);
    Subscription { rx }
  }

  /// Mark an entry as fetching. Returns the status to restore if the fetch
  /// fails.
  pub fn begin_fetch(&self, key: &QueryKey) -> EntryStatus {
    let mut entries = self.entries();
    let entry = entries
      .entry(key.cache_hash())
      .or_insert_with(|| Entry::new(EntryStatus::Absent));
    if entry.status != EntryStatus::Pending {
      entry.invalidated_in_flight.clear();
    }
    std::mem::replace(&mut entry.status, EntryStatus::Pending)
  }

  /// Store a fetched value with the tags it provides and notify subscribers.
  ///
  /// If one of the entry's old or new tags was invalidated while the fetch
  /// was pending, the value is stored as `Invalidated` and subscribers are
  /// told to refetch.
  pub fn fulfill(&self, key: &QueryKey, value: Value, tags: Vec<CacheTag>) -> ApiResult<()> {
    let hash = key.cache_hash();
    let mut entries = self.entries();
    let entry = entries
      .entry(hash.clone())
      .or_insert_with(|| Entry::new(EntryStatus::Absent));
    let stale = entry.status == EntryStatus::Pending && entry.stale_on_arrival(&tags);

    self.storage.save(
      &hash,
      &StoredEntry {
        description: key.description(),
        value,
        tags: tags.clone(),
        cached_at: Utc::now(),
        invalidated: stale,
      },
    )?;

    entry.tags = tags.into_iter().collect();
    entry.invalidated_in_flight.clear();
    entry.notify(CacheEvent::Updated);
    if stale {
      entry.status = EntryStatus::Invalidated;
      entry.notify(CacheEvent::Invalidated);
      debug!(query = %key.description(), "cache entry invalidated while fetching");
    } else {
      entry.status = EntryStatus::Populated;
      debug!(query = %key.description(), tags = entry.tags.len(), "cache entry populated");
    }
    Ok(())
  }

  /// Undo [`begin_fetch`](Self::begin_fetch) after a failed fetch. Nothing is
  /// cached for the failed request.
  pub fn abort_fetch(&self, key: &QueryKey, previous: EntryStatus) {
    let hash = key.cache_hash();
    let mut entries = self.entries();
    let Some(entry) = entries.get_mut(&hash) else {
      return;
    };
    if entry.status != EntryStatus::Pending {
      return;
    }
    let stale = previous == EntryStatus::Populated && entry.stale_on_arrival(&[]);
    entry.invalidated_in_flight.clear();
    entry.status = if stale {
      EntryStatus::Invalidated
    } else {
      previous
    };
    if previous == EntryStatus::Absent && !entry.has_subscribers() {
      entries.remove(&hash);
      return;
    }

    if stale {
      if let Err(e) = self.mark_invalidated(&hash) {
        warn!(query = %key.description(), error = %e, "failed to persist invalidation");
      }
    }
  }

  fn mark_invalidated(&self, hash: &str) -> ApiResult<()> {
    if let Some(mut stored) = self.storage.load(hash)? {
      stored.invalidated = true;
      self.storage.save(hash, &stored)?;
    }
    Ok(())
  }

  /// Mark every entry providing one of `tags` as invalidated and tell its
  /// subscribers to refetch. Returns how many entries were invalidated.
  ///
  /// Pending entries remember the tags and are settled when their fetch
  /// completes; they are not counted here.
  pub fn invalidate_tags(&self, tags: &[CacheTag]) -> ApiResult<usize> {
    let mut entries = self.entries();
    let mut count = 0;

    for (hash, entry) in entries.iter_mut() {
      if entry.status == EntryStatus::Pending {
        entry.invalidated_in_flight.extend(tags.iter().cloned());
        continue;
      }
      if entry.status != EntryStatus::Populated || !tags.iter().any(|t| entry.tags.contains(t)) {
        continue;
      }

      self.mark_invalidated(hash)?;
      entry.status = EntryStatus::Invalidated;
      entry.notify(CacheEvent::Invalidated);
      count += 1;
    }

    debug!(
      tags = %tags.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
      invalidated = count,
      "cache tags invalidated"
    );
    Ok(count)
  }

  /// Shallow-merge `patch` into the stored value of an entry and notify its
  /// subscribers. Returns the pre-patch snapshot, or `None` when there is no
  /// stored value to patch.
  pub fn update_cached(&self, key: &QueryKey, patch: &Map<String, Value>) -> ApiResult<Option<Snapshot>> {
    let hash = key.cache_hash();
    let mut entries = self.entries();

    let Some(before) = self.storage.load(&hash)? else {
      return Ok(None);
    };

    let mut patched = before.clone();
    merge_patch(&mut patched.value, patch);
    self.storage.save(&hash, &patched)?;

    if let Some(entry) = entries.get_mut(&hash) {
      entry.notify(CacheEvent::Updated);
    }

    debug!(query = %key.description(), "optimistic patch applied");
    Ok(Some(Snapshot {
      key: hash,
      entry: before,
    }))
  }

  /// Put a snapshot's value back exactly as it was captured and notify
  /// subscribers. An invalidation that happened since the snapshot is kept.
  pub fn restore(&self, snapshot: Snapshot) -> ApiResult<()> {
    let mut entries = self.entries();
    let mut stored = snapshot.entry;
    if let Some(entry) = entries.get(&snapshot.key) {
      stored.invalidated = entry.status == EntryStatus::Invalidated;
    }
    self.storage.save(&snapshot.key, &stored)?;
    if let Some(entry) = entries.get_mut(&snapshot.key) {
      entry.notify(CacheEvent::Updated);
    }
    debug!(query = %stored.description, "optimistic patch rolled back");
    Ok(())
  }

  /// Drop one entry. Subscribers are disconnected.
  pub fn remove(&self, key: &QueryKey) -> ApiResult<()> {
    let hash = key.cache_hash();
    let mut entries = self.entries();
    self.storage.remove(&hash)?;
    entries.remove(&hash);
    Ok(())
  }

  /// Drop everything.
  pub fn clear(&self) -> ApiResult<()> {
    let mut entries = self.entries();
    self.storage.clear()?;
    entries.clear();
    Ok(())
  }
}
