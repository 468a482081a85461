//! Download and memoize media assets referenced from resource data.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::envelope::MediaPaths;
use crate::registry::MediaSchema;
use crate::remote::RemoteSource;

/// Downloads assets into the cache directory, once per asset id.
pub struct MediaCache<R> {
  remote: Arc<R>,
  dir: PathBuf,
  concurrency: usize,
}

impl<R: RemoteSource> MediaCache<R> {
  pub fn new(remote: Arc<R>, dir: impl Into<PathBuf>, concurrency: usize) -> Self {
    Self {
      remote,
      dir: dir.into(),
      concurrency: concurrency.max(1),
    }
  }

  /// Local file an asset is (or will be) stored under for a given scope.
  pub fn asset_path(&self, scope: &str, asset_id: &str) -> PathBuf {
    asset_path(&self.dir, scope, asset_id)
  }

  /// Download every asset referenced by `items` that `existing` does not already map.
  ///
  /// Returns `existing` extended with the assets that downloaded successfully. Failed
  /// downloads leave no entry.
  pub async fn process_and_cache_images(
    &self,
    scope: &str,
    items: &[Value],
    schema: &MediaSchema,
    existing: MediaPaths,
  ) -> MediaPaths {
    let mut paths = existing;
    if schema.is_empty() {
      return paths;
    }

    let pending: Vec<String> = collect_asset_ids(items, schema)
      .into_iter()
      .filter(|id| !paths.contains_key(id))
      .collect();
    if pending.is_empty() {
      return paths;
    }

    debug!(scope, count = pending.len(), "Downloading assets");
    let results: Vec<(String, Option<PathBuf>)> = stream::iter(pending)
      .map(|id| async move {
        let path = self.download(scope, &id).await;
        (id, path)
      })
      .buffer_unordered(self.concurrency)
      .collect()
      .await;

    for (id, path) in results {
      if let Some(path) = path {
        paths.insert(id, path);
      }
    }
    paths
  }

  async fn download(&self, scope: &str, asset_id: &str) -> Option<PathBuf> {
    let bytes = match self.remote.download_asset(asset_id).await {
      Ok(bytes) => bytes,
      Err(e) => {
        debug!(scope, asset_id, "Skipping asset: {}", e);
        return None;
      }
    };

    let path = self.asset_path(scope, asset_id);
    match write_file(&self.dir, &path, &bytes).await {
      Ok(()) => Some(path),
      Err(e) => {
        warn!(scope, asset_id, "Failed to store asset at {}: {}", path.display(), e);
        None
      }
    }
  }
}

async fn write_file(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
  tokio::fs::create_dir_all(dir).await?;
  let tmp = partial_path(path);
  tokio::fs::write(&tmp, bytes).await?;
  if let Err(e) = tokio::fs::rename(&tmp, path).await {
    let _ = tokio::fs::remove_file(&tmp).await;
    return Err(e);
  }
  Ok(())
}

/// In-progress download file. `~` never appears in an asset file name.
fn partial_path(path: &Path) -> PathBuf {
  let mut tmp = path.as_os_str().to_owned();
  tmp.push("~part");
  PathBuf::from(tmp)
}

/// `{dir}/{scope}_{assetId}`, hashing ids that are not safe as file names.
pub fn asset_path(dir: &Path, scope: &str, asset_id: &str) -> PathBuf {
  dir.join(format!("{}_{}", scope, file_stem(asset_id)))
}

fn file_stem(asset_id: &str) -> String {
  let safe = !asset_id.is_empty()
    && !asset_id.starts_with('.')
    && asset_id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

  if safe {
    asset_id.to_string()
  } else {
    hex::encode(Sha256::digest(asset_id.as_bytes()))
  }
}

/// Asset ids referenced by `items` under `schema`, deduplicated, in first-seen order.
pub fn collect_asset_ids(items: &[Value], schema: &MediaSchema) -> Vec<String> {
  let mut seen = HashSet::new();
  let mut ids = Vec::new();
  for item in items {
    visit(item, schema, &mut seen, &mut ids);
  }
  ids
}

fn visit(value: &Value, schema: &MediaSchema, seen: &mut HashSet<String>, ids: &mut Vec<String>) {
  match value {
    Value::Array(elements) => {
      for element in elements {
        visit(element, schema, seen, ids);
      }
    }
    Value::Object(map) => {
      for field in schema.fields {
        if let Some(Value::String(id)) = map.get(*field) {
          if !id.is_empty() && seen.insert(id.clone()) {
            ids.push(id.clone());
          }
        }
      }
      for nested in schema.nested {
        if let Some(child) = map.get(nested.key) {
          visit(child, &nested.schema, seen, ids);
        }
      }
    }
    _ => {}
  }
}
