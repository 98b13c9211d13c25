//! Query keys identifying cache entries.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::entity::EntityId;

/// One cache entry per distinct read: endpoint plus arguments.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryKey {
  /// Single entity by id
  Get { entity: String, id: EntityId },
  /// Unpaged list, optionally filtered by an example
  ListAll {
    entity: String,
    example: Option<Value>,
  },
  /// One page of the list
  ListPaged {
    entity: String,
    page: u32,
    size: u32,
    example: Option<Value>,
  },
}

impl QueryKey {
  pub fn get(entity: &str, id: &EntityId) -> Self {
    Self::Get {
      entity: entity.to_string(),
      id: id.clone(),
    }
  }

  pub fn list_all(entity: &str, example: Option<&Value>) -> Self {
    Self::ListAll {
      entity: entity.to_string(),
      example: example.cloned(),
    }
  }

  pub fn list_paged(entity: &str, page: u32, size: u32, example: Option<&Value>) -> Self {
    Self::ListPaged {
      entity: entity.to_string(),
      page,
      size,
      example: example.cloned(),
    }
  }

  /// Stable, fixed-length key for storage lookups.
  pub fn cache_hash(&self) -> String {
    let input = match self {
      Self::Get { entity, id } => format!("get:{}:{}", entity, id),
      Self::ListAll { entity, example } => {
        format!("list_all:{}:{}", entity, canonical_example(example))
      }
      Self::ListPaged {
        entity,
        page,
        size,
        example,
      } => format!(
        "list_paged:{}:{}:{}:{}",
        entity,
        page,
        size,
        canonical_example(example)
      ),
    };

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    match self {
      Self::Get { entity, id } => format!("{} {}", entity, id),
      Self::ListAll { entity, example } => match example {
        Some(e) => format!("all {} matching {}", entity, e),
        None => format!("all {}", entity),
      },
      Self::ListPaged {
        entity,
        page,
        size,
        example,
      } => match example {
        Some(e) => format!("{} page {} (size {}) matching {}", entity, page, size, e),
        None => format!("{} page {} (size {})", entity, page, size),
      },
    }
  }
}

/// serde_json maps are sorted by key, so the compact form is canonical for
/// equal examples regardless of how they were built.
fn canonical_example(example: &Option<Value>) -> String {
  example.as_ref().map(Value::to_string).unwrap_or_default()
}
