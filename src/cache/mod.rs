//! Client-side cache shared by entity modules.
//!
//! Entries are keyed by query (endpoint plus arguments) and each entry
//! provides a set of [`CacheTag`]s. Mutations invalidate tags; every entry
//! providing an invalidated tag is marked stale and its subscribers are told
//! to refetch. Values live in a pluggable [`CacheStorage`] backend, in memory
//! by default or in SQLite to survive restarts.

mod key;
mod storage;
mod store;
mod tag;

pub use key::QueryKey;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage, StoredEntry};
pub use store::{CacheEvent, CacheStore, EntryStatus, Snapshot, Subscription};
pub use tag::{CacheTag, TagKey};
