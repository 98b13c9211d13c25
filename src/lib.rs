//! Generic REST entity access with a tag-invalidated client cache.
//!
//! One [`EntityApi`] per entity type exposes paged list, full list, get,
//! create, update and delete against the resource path of that type, and
//! keeps a shared [`CacheStore`] consistent with the server:
//!
//! - every fetched entity provides its `(type, id)` tag, lists also provide
//!   `LIST` or `PAGE_<n>`
//! - mutations invalidate tags, which marks the entries providing them stale
//!   and makes their subscribers ([`Query`] handles) refetch
//! - `update` patches the cached entity before the request and rolls the
//!   patch back if the request fails

pub mod api;
pub mod cache;
pub mod entity;
pub mod error;
pub mod query;

#[cfg(test)]
mod testing;

pub use api::{Client, EntityApi, HttpTransport, Transport};
pub use cache::{CacheStore, CacheTag, EntryStatus, QueryKey};
pub use entity::{DeleteResult, Entity, EntityId, Record};
pub use error::{ApiError, ApiResult};
pub use query::{Query, QueryState};
