//! The persisted unit of one resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Asset id → local file path. An entry exists only after a successful download.
pub type MediaPaths = BTreeMap<String, PathBuf>;

/// Cached state of one resource: its data, resolved media, and sync high-water mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResourceEnvelope {
  /// Single item object (singleton) or array of items (collection)
  pub data: Value,
  #[serde(default)]
  pub media_paths: MediaPaths,
  /// Latest `date_updated` seen at the last successful sync
  #[serde(default)]
  pub last_sync_timestamp: Option<String>,
}

impl CachedResourceEnvelope {
  pub fn new(data: Value, media_paths: MediaPaths, last_sync_timestamp: Option<String>) -> Self {
    Self {
      data,
      media_paths,
      last_sync_timestamp,
    }
  }

  /// Collection items, if `data` has collection shape.
  pub fn items(&self) -> Option<&Vec<Value>> {
    self.data.as_array()
  }
}

/// Result of reading an envelope from storage.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
  Loaded(CachedResourceEnvelope),
  /// Nothing has been cached under this key
  Missing,
  /// Something is there but it is not a readable envelope
  Corrupt,
}

impl LoadOutcome {
  /// Collapse to an optional envelope; corruption reads as "never cached".
  pub fn into_option(self) -> Option<CachedResourceEnvelope> {
    match self {
      Self::Loaded(envelope) => Some(envelope),
      Self::Missing | Self::Corrupt => None,
    }
  }
}
