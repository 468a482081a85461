//! Cache storage trait and JSON-file implementation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use super::envelope::{CachedResourceEnvelope, LoadOutcome};

const VERSION_MARKER_FILE: &str = "app_version.json";

/// Trait for cache storage backends.
///
/// Failures never escape: writes report success as a bool and log the cause, reads
/// classify every failure mode into [`LoadOutcome`].
pub trait CacheStorage: Send + Sync {
  /// Replace the envelope stored under `cache_key`.
  fn save(&self, cache_key: &str, envelope: &CachedResourceEnvelope) -> bool;

  /// Read the envelope stored under `cache_key`.
  fn load(&self, cache_key: &str) -> LoadOutcome;

  /// Remove everything (envelopes, media, version marker) and start empty.
  fn wipe(&self) -> bool;

  /// Stored app-version marker, if present and readable.
  fn read_version_marker(&self) -> Option<String>;

  fn write_version_marker(&self, version: &str) -> bool;

  /// Directory holding cache files.
  fn dir(&self) -> &Path;
}

/// Version marker document.
#[derive(Debug, Serialize, Deserialize)]
struct VersionMarker {
  version: String,
}

/// One JSON document per resource inside a single cache directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
  dir: PathBuf,
}

impl JsonFileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn envelope_path(&self, cache_key: &str) -> PathBuf {
    self.dir.join(format!("{}.json", cache_key))
  }

  fn marker_path(&self) -> PathBuf {
    self.dir.join(VERSION_MARKER_FILE)
  }

  /// Write `bytes` to `path` through a sibling temp file so readers never see a partial file.
  fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(&self.dir)?;
    let tmp = path.with_extension("json.tmp");
    {
      let mut file = fs::File::create(&tmp)?;
      file.write_all(bytes)?;
      file.sync_all()?;
    }
    fs::rename(&tmp, path).inspect_err(|_| {
      let _ = fs::remove_file(&tmp);
    })
  }
}

impl CacheStorage for JsonFileStore {
  fn save(&self, cache_key: &str, envelope: &CachedResourceEnvelope) -> bool {
    let path = self.envelope_path(cache_key);

    let bytes = match serde_json::to_vec(envelope) {
      Ok(bytes) => bytes,
      Err(e) => {
        error!(cache_key, "Failed to serialize envelope: {}", e);
        return false;
      }
    };

    match self.write_atomic(&path, &bytes) {
      Ok(()) => {
        debug!(cache_key, bytes = bytes.len(), "Saved envelope");
        true
      }
      Err(e) => {
        error!(cache_key, "Failed to write {}: {}", path.display(), e);
        false
      }
    }
  }

  fn load(&self, cache_key: &str) -> LoadOutcome {
    let path = self.envelope_path(cache_key);

    let contents = match fs::read(&path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadOutcome::Missing,
      Err(e) => {
        warn!(cache_key, "Failed to read {}: {}", path.display(), e);
        return LoadOutcome::Corrupt;
      }
    };

    match serde_json::from_slice::<CachedResourceEnvelope>(&contents) {
      Ok(envelope) if !envelope.data.is_null() => LoadOutcome::Loaded(envelope),
      Ok(_) => {
        warn!(cache_key, "Cached envelope has no data");
        LoadOutcome::Corrupt
      }
      Err(e) => {
        warn!(cache_key, "Corrupt cache file {}: {}", path.display(), e);
        LoadOutcome::Corrupt
      }
    }
  }

  fn wipe(&self) -> bool {
    match fs::remove_dir_all(&self.dir) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => {
        error!("Failed to remove cache directory {}: {}", self.dir.display(), e);
        return false;
      }
    }

    match fs::create_dir_all(&self.dir) {
      Ok(()) => true,
      Err(e) => {
        error!("Failed to recreate cache directory {}: {}", self.dir.display(), e);
        false
      }
    }
  }

  fn read_version_marker(&self) -> Option<String> {
    let contents = fs::read(self.marker_path()).ok()?;
    match serde_json::from_slice::<VersionMarker>(&contents) {
      Ok(marker) => Some(marker.version),
      Err(e) => {
        warn!("Unreadable version marker: {}", e);
        None
      }
    }
  }

  fn write_version_marker(&self, version: &str) -> bool {
    let marker = VersionMarker {
      version: version.to_string(),
    };
    let result = serde_json::to_vec(&marker)
      .map_err(io::Error::from)
      .and_then(|bytes| self.write_atomic(&self.marker_path(), &bytes));

    match result {
      Ok(()) => true,
      Err(e) => {
        error!("Failed to write version marker: {}", e);
        false
      }
    }
  }

  fn dir(&self) -> &Path {
    &self.dir
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::envelope::MediaPaths;
  use serde_json::json;
  use tempfile::TempDir;

  fn envelope() -> CachedResourceEnvelope {
    let mut media = MediaPaths::new();
    media.insert("img-1".into(), PathBuf::from("/cache/species_img-1"));
    CachedResourceEnvelope::new(
      json!([{"id": 1, "date_updated": "2023-01-01", "image": "img-1"}]),
      media,
      Some("2023-01-01".into()),
    )
  }

  #[test]
  fn test_save_then_load_round_trips() {
    let tmp = TempDir::new().unwrap();
    let store = JsonFileStore::new(tmp.path().join("cache"));

    assert!(store.save("species", &envelope()));
    assert_eq!(store.load("species"), LoadOutcome::Loaded(envelope()));
  }

  #[test]
  fn test_save_creates_directory_and_leaves_no_temp_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("nested").join("cache");
    let store = JsonFileStore::new(&dir);

    assert!(store.save("home", &envelope()));
    assert!(dir.join("home.json").exists());
    assert!(!dir.join("home.json.tmp").exists());
  }

  #[test]
  fn test_persisted_field_names() {
    let tmp = TempDir::new().unwrap();
    let store = JsonFileStore::new(tmp.path());
    store.save("species", &envelope());

    let raw: serde_json::Value =
      serde_json::from_slice(&fs::read(tmp.path().join("species.json")).unwrap()).unwrap();
    assert!(raw.get("mediaPaths").is_some());
    assert_eq!(raw["lastSyncTimestamp"], json!("2023-01-01"));
  }

  #[test]
  fn test_missing_file() {
    let tmp = TempDir::new().unwrap();
    let store = JsonFileStore::new(tmp.path());
    assert_eq!(store.load("nothing"), LoadOutcome::Missing);
  }

  #[test]
  fn test_truncated_json_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let store = JsonFileStore::new(tmp.path());
    fs::write(
      tmp.path().join("home.json"),
      r#"{"data":{"id":1,"text":"Test con"#,
    )
    .unwrap();

    assert_eq!(store.load("home"), LoadOutcome::Corrupt);
    assert!(store.load("home").into_option().is_none());
  }

  #[test]
  fn test_invalid_contents_are_corrupt() {
    let tmp = TempDir::new().unwrap();
    let store = JsonFileStore::new(tmp.path());

    for contents in ["", "not json", "[1,2,3]", r#"{"mediaPaths":{}}"#, r#"{"data":null}"#] {
      fs::write(tmp.path().join("home.json"), contents).unwrap();
      assert_eq!(store.load("home"), LoadOutcome::Corrupt, "contents: {:?}", contents);
    }
  }

  #[test]
  fn test_directory_in_place_of_file_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let store = JsonFileStore::new(tmp.path());
    fs::create_dir(tmp.path().join("home.json")).unwrap();

    assert_eq!(store.load("home"), LoadOutcome::Corrupt);
  }

  #[test]
  fn test_save_failure_is_reported_not_raised() {
    let tmp = TempDir::new().unwrap();
    // A file where the cache directory should be makes every write fail
    let blocker = tmp.path().join("cache");
    fs::write(&blocker, b"x").unwrap();
    let store = JsonFileStore::new(&blocker);

    assert!(!store.save("home", &envelope()));
  }

  #[test]
  fn test_wipe_removes_everything_and_recreates_dir() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("cache");
    let store = JsonFileStore::new(&dir);
    store.save("home", &envelope());
    store.write_version_marker("1.0.0-1");

    assert!(store.wipe());
    assert!(dir.is_dir());
    assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
  }

  #[test]
  fn test_wipe_tolerates_missing_dir() {
    let tmp = TempDir::new().unwrap();
    let store = JsonFileStore::new(tmp.path().join("never-created"));
    assert!(store.wipe());
    assert!(store.wipe());
  }

  #[test]
  fn test_version_marker_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = JsonFileStore::new(tmp.path());

    assert_eq!(store.read_version_marker(), None);
    assert!(store.write_version_marker("1.0.0-1"));
    assert_eq!(store.read_version_marker().as_deref(), Some("1.0.0-1"));
  }
}
