//! Entity records and identifiers.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the identifying field every entity carries.
pub const ID_FIELD: &str = "id";

/// Identifier of an entity: servers hand out either strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
  Int(i64),
  Str(String),
}

impl EntityId {
  /// Read an id out of a JSON value. Anything but a string or an integer is
  /// not an id.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::String(s) => Some(EntityId::Str(s.clone())),
      Value::Number(n) => n.as_i64().map(EntityId::Int),
      _ => None,
    }
  }

  /// Empty strings and zero count as "no id": updates with such an id skip
  /// the optimistic cache write.
  pub fn is_falsy(&self) -> bool {
    match self {
      EntityId::Int(n) => *n == 0,
      EntityId::Str(s) => s.is_empty(),
    }
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Int(n) => write!(f, "{}", n),
      EntityId::Str(s) => f.write_str(s),
    }
  }
}

impl From<&str> for EntityId {
  fn from(s: &str) -> Self {
    EntityId::Str(s.to_string())
  }
}

impl From<String> for EntityId {
  fn from(s: String) -> Self {
    EntityId::Str(s)
  }
}

impl From<i64> for EntityId {
  fn from(n: i64) -> Self {
    EntityId::Int(n)
  }
}

/// A server-defined record that can be fetched and cached.
///
/// Only the id is interpreted; every other field passes through untouched.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// The record's id, if the server sent one.
  fn entity_id(&self) -> Option<EntityId>;
}

/// Untyped entity: a JSON object with an `id` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
  pub fn get(&self, field: &str) -> Option<&Value> {
    self.0.get(field)
  }
}

impl Entity for Record {
  fn entity_id(&self) -> Option<EntityId> {
    self.0.get(ID_FIELD).and_then(EntityId::from_value)
  }
}

/// Result body of a delete call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
  pub success: bool,
  pub id: EntityId,
}

/// Serialize a request body that must be a JSON object (create/update).
pub(crate) fn to_object<B: Serialize + ?Sized>(body: &B) -> Result<Map<String, Value>, String> {
  match serde_json::to_value(body).map_err(|e| e.to_string())? {
    Value::Object(map) => Ok(map),
    other => Err(format!("expected a JSON object, got {}", other)),
  }
}

/// Drop the id from an update patch. Ids never change through an update.
pub(crate) fn strip_id(mut patch: Map<String, Value>) -> Map<String, Value> {
  patch.remove(ID_FIELD);
  patch
}

/// Shallow merge: top-level fields of `patch` replace those of `target`.
/// Non-object targets are left alone.
pub(crate) fn merge_patch(target: &mut Value, patch: &Map<String, Value>) {
  if let Value::Object(fields) = target {
    for (k, v) in patch {
      fields.insert(k.clone(), v.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_id_from_value() {
    assert_eq!(EntityId::from_value(&json!("42")), Some(EntityId::from("42")));
    assert_eq!(EntityId::from_value(&json!(7)), Some(EntityId::Int(7)));
    assert_eq!(EntityId::from_value(&json!(null)), None);
    assert_eq!(EntityId::from_value(&json!(1.5)), None);
  }

  #[test]
  fn test_falsy_ids() {
    assert!(EntityId::from("").is_falsy());
    assert!(EntityId::Int(0).is_falsy());
    assert!(!EntityId::from("0").is_falsy());
    assert!(!EntityId::Int(5).is_falsy());
  }

  #[test]
  fn test_record_id() {
    let record: Record = serde_json::from_value(json!({"id": 5, "name": "Acme"})).unwrap();
    assert_eq!(record.entity_id(), Some(EntityId::Int(5)));

    let anonymous: Record = serde_json::from_value(json!({"name": "Acme"})).unwrap();
    assert_eq!(anonymous.entity_id(), None);
  }

  #[test]
  fn test_strip_id_and_merge() {
    let patch = strip_id(to_object(&json!({"id": 99, "name": "x"})).unwrap());
    let mut cached = json!({"id": 5, "name": "old", "status": "open"});
    merge_patch(&mut cached, &patch);
    assert_eq!(cached, json!({"id": 5, "name": "x", "status": "open"}));
  }

  #[test]
  fn test_to_object_rejects_scalars() {
    assert!(to_object(&json!([1, 2])).is_err());
    assert!(to_object(&json!("name")).is_err());
  }

  #[test]
  fn test_delete_result_accepts_numeric_id() {
    let result: DeleteResult = serde_json::from_value(json!({"success": true, "id": 7})).unwrap();
    assert_eq!(result.id, EntityId::Int(7));
  }
}
