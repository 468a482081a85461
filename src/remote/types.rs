//! Wire types shared by the remote client and the sync engine.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Identity of a collection item.
///
/// The backend hands out numeric or string ids; both are normalized to their string form so
/// `1` and `"1"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  /// Read an id out of a JSON value. Only strings and numbers are ids.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
      Value::Number(n) => Some(Self(n.to_string())),
      _ => None,
    }
  }

  /// Id of an item object, if it has one.
  pub fn of_item(item: &Value) -> Option<Self> {
    item.get("id").and_then(Self::from_value)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl<'de> Deserialize<'de> for ItemId {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let value = Value::deserialize(deserializer)?;
    Self::from_value(&value)
      .ok_or_else(|| serde::de::Error::custom(format!("invalid item id: {}", value)))
  }
}

/// Identity + timestamp projection of a collection item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemMeta {
  pub id: ItemId,
  /// Raw timestamp; `None` when missing, null or not a string
  #[serde(default, deserialize_with = "lenient_timestamp")]
  pub date_updated: Option<String>,
}

impl ItemMeta {
  pub fn new(id: impl Into<String>, date_updated: Option<&str>) -> Self {
    Self {
      id: ItemId::new(id),
      date_updated: date_updated.map(String::from),
    }
  }
}

/// Read `date_updated` out of an item object with the same leniency as [`ItemMeta`].
pub fn item_timestamp(item: &Value) -> Option<&str> {
  item.get("date_updated").and_then(Value::as_str)
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(match value {
    Value::String(s) => Some(s),
    _ => None,
  })
}

/// Response body shape: `{ "data": ... }`.
#[derive(Debug, Deserialize)]
pub(crate) struct Payload<T> {
  pub data: Option<T>,
}

/// Singleton metadata projection: `{ "date_updated": ... }`.
#[derive(Debug, Deserialize)]
pub(crate) struct SingletonMeta {
  #[serde(default, deserialize_with = "lenient_timestamp")]
  pub date_updated: Option<String>,
}
