//! Cache tags: the unit of invalidation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::EntityId;

/// What a tag points at within one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagKey {
  /// A single entity by id
  Id(String),
  /// The unfiltered collection
  List,
  /// One page of the paged collection
  Page(u32),
}

impl fmt::Display for TagKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TagKey::Id(id) => f.write_str(id),
      TagKey::List => f.write_str("LIST"),
      TagKey::Page(n) => write!(f, "PAGE_{}", n),
    }
  }
}

/// `(entityType, key)` pair. Cache entries provide tags; mutations invalidate
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheTag {
  pub entity_type: String,
  pub key: TagKey,
}

impl CacheTag {
  /// Ids are compared by their string form, so `5` and `"5"` share a tag.
  pub fn id(entity_type: &str, id: &EntityId) -> Self {
    Self {
      entity_type: entity_type.to_string(),
      key: TagKey::Id(id.to_string()),
    }
  }

  pub fn list(entity_type: &str) -> Self {
    Self {
      entity_type: entity_type.to_string(),
      key: TagKey::List,
    }
  }

  pub fn page(entity_type: &str, page: u32) -> Self {
    Self {
      entity_type: entity_type.to_string(),
      key: TagKey::Page(page),
    }
  }
}

impl fmt::Display for CacheTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {})", self.entity_type, self.key)
  }
}
