//! Application-level handle owning the transport and the cache.

use std::sync::Arc;

use super::entity_api::{EntityApi, DEFAULT_PAGE_SIZE};
use super::transport::Transport;
use crate::cache::CacheStore;
use crate::entity::Entity;

/// One transport and one cache, shared by every entity module it creates.
///
/// ```ignore
/// let client = Client::new(HttpTransport::new(url, timeout)?, CacheStore::new());
/// let invoices = client.entity::<Record>("Invoice");
/// let agents = client.entity_at::<Agent>("Agent", "directory/agents");
/// ```
#[derive(Clone)]
pub struct Client {
  transport: Arc<dyn Transport>,
  cache: CacheStore,
  page_size: u32,
}

impl Client {
  pub fn new(transport: impl Transport + 'static, cache: CacheStore) -> Self {
    Self {
      transport: Arc::new(transport),
      cache,
      page_size: DEFAULT_PAGE_SIZE,
    }
  }

  /// Default page size for the modules created from now on.
  pub fn with_page_size(mut self, size: u32) -> Self {
    self.page_size = size;
    self
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  /// Module for `entity_type` served at the path of the same name.
  pub fn entity<T: Entity>(&self, entity_type: &str) -> EntityApi<T> {
    self.entity_at(entity_type, entity_type)
  }

  /// Module for `entity_type` served at `base_path`.
  pub fn entity_at<T: Entity>(&self, entity_type: &str, base_path: &str) -> EntityApi<T> {
    EntityApi::new(
      entity_type,
      base_path,
      Arc::clone(&self.transport),
      self.cache.clone(),
    )
    .with_page_size(self.page_size)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Method;
  use crate::cache::{EntryStatus, QueryKey};
  use crate::entity::{EntityId, Record};
  use crate::testing::MockTransport;
  use serde::{Deserialize, Serialize};
  use serde_json::json;

  #[derive(Debug, Clone, Serialize, Deserialize)]
  struct Agent {
    id: i64,
    name: String,
  }

  impl Entity for Agent {
    fn entity_id(&self) -> Option<EntityId> {
      Some(EntityId::Int(self.id))
    }
  }

  #[tokio::test]
  async fn test_modules_share_one_cache() {
    let mock = MockTransport::new();
    mock
      .respond(Method::Get, "Agent/1", 200, json!({"id": 1, "name": "Ann"}))
      .respond(Method::Get, "Invoice", 200, json!([]));
    let client = Client::new(mock.clone(), CacheStore::new());

    let agents = client.entity::<Agent>("Agent");
    let invoices = client.entity::<Record>("Invoice");

    let agent = agents.get(&EntityId::Int(1)).await.unwrap();
    assert_eq!(agent.name, "Ann");
    invoices.list_all(None).await.unwrap();

    let cache = client.cache();
    assert_eq!(
      cache.status(&QueryKey::get("Agent", &EntityId::Int(1))),
      EntryStatus::Populated
    );
    assert_eq!(
      cache.status(&QueryKey::list_all("Invoice", None)),
      EntryStatus::Populated
    );
  }

  #[tokio::test]
  async fn test_page_size_is_passed_down() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "directory/agents", 200, json!([]));
    let client = Client::new(mock.clone(), CacheStore::new()).with_page_size(50);

    let agents = client.entity_at::<Agent>("Agent", "directory/agents");
    agents.list_paged(1, None, None).await.unwrap();

    assert_eq!(mock.requests()[0].target(), "directory/agents?page=1&size=50");
  }
}
