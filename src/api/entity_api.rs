//! Generic entity access module: six REST operations per entity type, kept
//! consistent with the shared cache.

use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use super::transport::{decode, Request, Transport};
use crate::cache::{CacheStore, CacheTag, QueryKey};
use crate::entity::{strip_id, to_object, DeleteResult, Entity, EntityId, Record};
use crate::error::{ApiError, ApiResult};
use crate::query::Query;

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Access to one entity type at one resource path.
///
/// | Operation    | Request              | Cache effect                           |
/// |--------------|----------------------|----------------------------------------|
/// | `list_paged` | `GET E?page&size`    | provides `(E, id)` each + `PAGE_n`     |
/// | `list_all`   | `GET E`              | provides `(E, id)` each + `LIST`       |
/// | `get`        | `GET E/{id}`         | provides `(E, id)`                     |
/// | `create`     | `POST E`             | invalidates `LIST`                     |
/// | `update`     | `PUT E/{id}`         | optimistic patch; invalidates id, `LIST` |
/// | `delete`     | `DELETE E/{id}`      | invalidates `(E, id)`                  |
///
/// Ids are percent-encoded as a single path segment.
///
/// `create` leaves `PAGE_n` entries alone and `delete` leaves `LIST` alone.
/// Lists that contain a deleted entity still go stale through its id tag.
pub struct EntityApi<T: Entity = Record> {
  entity_type: String,
  base_path: String,
  page_size: u32,
  transport: Arc<dyn Transport>,
  cache: CacheStore,
  _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for EntityApi<T> {
  fn clone(&self) -> Self {
    Self {
      entity_type: self.entity_type.clone(),
      base_path: self.base_path.clone(),
      page_size: self.page_size,
      transport: Arc::clone(&self.transport),
      cache: self.cache.clone(),
      _entity: PhantomData,
    }
  }
}

impl<T: Entity> EntityApi<T> {
  pub fn new(
    entity_type: impl Into<String>,
    base_path: impl Into<String>,
    transport: Arc<dyn Transport>,
    cache: CacheStore,
  ) -> Self {
    Self {
      entity_type: entity_type.into(),
      base_path: base_path.into().trim_matches('/').to_string(),
      page_size: DEFAULT_PAGE_SIZE,
      transport,
      cache,
      _entity: PhantomData,
    }
  }

  /// Page size used by `list_paged` when called without one.
  pub fn with_page_size(mut self, size: u32) -> Self {
    self.page_size = size;
    self
  }

  pub fn entity_type(&self) -> &str {
    &self.entity_type
  }

  pub fn base_path(&self) -> &str {
    &self.base_path
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  /// `E/{id}` with the id percent-encoded as a single path segment.
  fn item_path(&self, id: &EntityId) -> String {
    format!("{}/{}", self.base_path, urlencoding::encode(&id.to_string()))
  }

  fn id_tag(&self, id: &EntityId) -> CacheTag {
    CacheTag::id(&self.entity_type, id)
  }

  async fn execute(&self, request: Request) -> ApiResult<Value> {
    let path = request.path.clone();
    let method = request.method;
    let response = self.transport.send(request).await?;
    let result = response.into_value(&path);
    if let Err(e) = &result {
      warn!(method = method.as_str(), path = %path, error = %e, "request failed");
    }
    result
  }

  /// Fetch one page. `size` defaults to the module's page size.
  pub async fn list_paged(
    &self,
    page: u32,
    size: Option<u32>,
    example: Option<&Value>,
  ) -> ApiResult<Vec<T>> {
    let size = size.unwrap_or(self.page_size);
    if size == 0 {
      return Err(ApiError::InvalidPageSize);
    }

    let mut request = Request::get(&self.base_path)
      .with_query("page", page.to_string())
      .with_query("size", size.to_string());
    if let Some(example) = example {
      request = request.with_query("example", encode_example(example)?);
    }

    let key = QueryKey::list_paged(&self.entity_type, page, size, example);
    self
      .fetch_list(key, request, CacheTag::page(&self.entity_type, page))
      .await
  }

  /// Fetch the whole collection, optionally filtered by an example.
  pub async fn list_all(&self, example: Option<&Value>) -> ApiResult<Vec<T>> {
    let mut request = Request::get(&self.base_path);
    if let Some(example) = example {
      request = request.with_query("example", encode_example(example)?);
    }

    let key = QueryKey::list_all(&self.entity_type, example);
    self
      .fetch_list(key, request, CacheTag::list(&self.entity_type))
      .await
  }

  async fn fetch_list(&self, key: QueryKey, request: Request, collection: CacheTag) -> ApiResult<Vec<T>> {
    let path = request.path.clone();
    let previous = self.cache.begin_fetch(&key);

    let fetched = self.execute(request).await.and_then(|value| {
      // A missing body is an empty collection.
      let value = if value.is_null() {
        Value::Array(Vec::new())
      } else {
        value
      };
      let items: Vec<T> = decode(value.clone(), &path)?;
      Ok((value, items))
    });

    let (value, items) = match fetched {
      Ok(fetched) => fetched,
      Err(e) => {
        self.cache.abort_fetch(&key, previous);
        return Err(e);
      }
    };

    let mut tags: Vec<CacheTag> = items
      .iter()
      .filter_map(T::entity_id)
      .map(|id| self.id_tag(&id))
      .collect();
    tags.push(collection);

    self.cache.fulfill(&key, value, tags)?;
    debug!(query = %key.description(), count = items.len(), "list fetched");
    Ok(items)
  }

  /// Fetch one entity by id.
  pub async fn get(&self, id: &EntityId) -> ApiResult<T> {
    let path = self.item_path(id);
    let key = QueryKey::get(&self.entity_type, id);
    let previous = self.cache.begin_fetch(&key);

    let fetched = self.execute(Request::get(&path)).await.and_then(|value| {
      let entity: T = decode(value.clone(), &path)?;
      Ok((value, entity))
    });

    let (value, entity) = match fetched {
      Ok(fetched) => fetched,
      Err(e) => {
        self.cache.abort_fetch(&key, previous);
        return Err(e);
      }
    };

    self.cache.fulfill(&key, value, vec![self.id_tag(id)])?;
    Ok(entity)
  }

  /// Create an entity. Invalidates the unpaged list; pages are left alone.
  pub async fn create<B: Serialize + ?Sized>(&self, body: &B) -> ApiResult<T> {
    let body = to_object(body).map_err(ApiError::Encode)?;
    let value = self
      .execute(Request::post(&self.base_path, Value::Object(body)))
      .await?;

    // The server has the record now, whether or not its echo decodes.
    self
      .cache
      .invalidate_tags(&[CacheTag::list(&self.entity_type)])?;

    decode(value, &self.base_path)
  }

  /// Update an entity, optimistically.
  ///
  /// The cached `get(id)` value is patched before the request goes out and
  /// restored exactly if it fails. `id` inside `patch` is ignored. With a
  /// falsy id the cache is not touched until the request succeeds.
  ///
  /// Concurrent updates of one id are not serialized: a rollback restores the
  /// value seen when *that* update started, which may discard another
  /// update's optimistic patch.
  pub async fn update<P: Serialize + ?Sized>(&self, id: &EntityId, patch: &P) -> ApiResult<()> {
    let patch = strip_id(to_object(patch).map_err(ApiError::Encode)?);

    let snapshot = if id.is_falsy() {
      None
    } else {
      self
        .cache
        .update_cached(&QueryKey::get(&self.entity_type, id), &patch)?
    };

    let result = self
      .execute(Request::put(self.item_path(id), Value::Object(patch)))
      .await;

    match result {
      Ok(_) => {
        self
          .cache
          .invalidate_tags(&[self.id_tag(id), CacheTag::list(&self.entity_type)])?;
        Ok(())
      }
      Err(e) => {
        if let Some(snapshot) = snapshot {
          if let Err(restore_err) = self.cache.restore(snapshot) {
            warn!(entity = %self.entity_type, id = %id, error = %restore_err, "rollback failed");
          }
        }
        Err(e)
      }
    }
  }

  /// Delete an entity. Invalidates its id tag only.
  pub async fn delete(&self, id: &EntityId) -> ApiResult<DeleteResult> {
    let path = self.item_path(id);
    let value = self.execute(Request::delete(&path)).await?;
    self.cache.invalidate_tags(&[self.id_tag(id)])?;
    decode(value, &path)
  }

  /// Query handle following the cached `get(id)` entry.
  pub fn query_get(&self, id: EntityId) -> Query<T> {
    let key = QueryKey::get(&self.entity_type, &id);
    let api = self.clone();
    Query::cached(self.cache.clone(), key, move || {
      let api = api.clone();
      let id = id.clone();
      async move { api.get(&id).await.map_err(|e| e.to_string()) }
    })
  }

  /// Query handle following the cached `list_all(example)` entry.
  pub fn query_list_all(&self, example: Option<Value>) -> Query<Vec<T>> {
    let key = QueryKey::list_all(&self.entity_type, example.as_ref());
    let api = self.clone();
    Query::cached(self.cache.clone(), key, move || {
      let api = api.clone();
      let example = example.clone();
      async move {
        api
          .list_all(example.as_ref())
          .await
          .map_err(|e| e.to_string())
      }
    })
  }

  /// Query handle following one cached page.
  pub fn query_list_paged(&self, page: u32, size: Option<u32>, example: Option<Value>) -> Query<Vec<T>> {
    let size = size.unwrap_or(self.page_size);
    let key = QueryKey::list_paged(&self.entity_type, page, size, example.as_ref());
    let api = self.clone();
    Query::cached(self.cache.clone(), key, move || {
      let api = api.clone();
      let example = example.clone();
      async move {
        api
          .list_paged(page, Some(size), example.as_ref())
          .await
          .map_err(|e| e.to_string())
      }
    })
  }
}

/// Compact JSON of the example filter; percent-encoding happens when the
/// request target is built.
fn encode_example(example: &Value) -> ApiResult<String> {
  if !example.is_object() {
    return Err(ApiError::Encode(format!(
      "example filter must be a JSON object, got {}",
      example
    )));
  }
  Ok(example.to_string())
}
