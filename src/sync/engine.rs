//! Per-resource sync: full fetch, incremental reconcile, or singleton check.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::diff::{determine_sync_actions, is_remote_newer, max_timestamp, merge_items};
use crate::cache::{CacheStorage, CachedResourceEnvelope, LoadOutcome, MediaCache, MemoryCache};
use crate::registry::ResourceDescriptor;
use crate::remote::{item_timestamp, RemoteSource};

/// What a sync of one resource did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Full payload fetched and stored
  Fetched { items: usize },
  /// Collection delta applied
  Reconciled { fetched: usize, deleted: usize },
  /// Remote has nothing newer; nothing written
  UpToDate,
  /// Sync failed; `fell_back` tells whether the stored envelope was reloaded
  Failed { error: String, fell_back: bool },
}

impl SyncOutcome {
  pub fn is_failure(&self) -> bool {
    matches!(self, Self::Failed { .. })
  }
}

/// Outcomes of a pass over all resources, in registry order.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
  pub outcomes: Vec<(&'static str, SyncOutcome)>,
}

impl SyncReport {
  pub fn failed(&self) -> usize {
    self.outcomes.iter().filter(|(_, o)| o.is_failure()).count()
  }

  pub fn updated(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| matches!(o, SyncOutcome::Fetched { .. } | SyncOutcome::Reconciled { .. }))
      .count()
  }

  pub fn is_clean(&self) -> bool {
    self.failed() == 0
  }

  pub fn summary(&self) -> String {
    format!(
      "Sync complete: {} updated, {} up to date, {} failed",
      self.updated(),
      self.outcomes.len() - self.updated() - self.failed(),
      self.failed()
    )
  }
}

/// Reconciles local envelopes against the backend.
pub struct SyncEngine<R, S> {
  remote: Arc<R>,
  storage: Arc<S>,
  memory: Arc<MemoryCache>,
  media: MediaCache<R>,
}

impl<R: RemoteSource, S: CacheStorage> SyncEngine<R, S> {
  pub fn new(
    remote: Arc<R>,
    storage: Arc<S>,
    memory: Arc<MemoryCache>,
    media_concurrency: usize,
  ) -> Self {
    let media = MediaCache::new(Arc::clone(&remote), storage.dir(), media_concurrency);
    Self {
      remote,
      storage,
      memory,
      media,
    }
  }

  pub fn media(&self) -> &MediaCache<R> {
    &self.media
  }

  /// Full fetch of one resource, falling back to the stored envelope on failure.
  pub async fn fetch_resource(&self, desc: &ResourceDescriptor) -> SyncOutcome {
    let result = self.full_fetch(desc).await;
    self.isolate(desc, result)
  }

  /// One sync pass for one resource, falling back to the stored envelope on failure.
  pub async fn sync_resource(&self, desc: &ResourceDescriptor) -> SyncOutcome {
    let result = self.try_sync(desc).await;
    self.isolate(desc, result)
  }

  /// Pick the policy for a resource based on what is cached locally.
  pub async fn try_sync(&self, desc: &ResourceDescriptor) -> Result<SyncOutcome> {
    let local = self.current_envelope(desc);

    match local {
      Some(local) if desc.is_collection && local.data.is_array() => {
        self.reconcile_collection(desc, local).await
      }
      Some(local) if !desc.is_collection => self.reconcile_singleton(desc, local).await,
      _ => self.full_fetch(desc).await,
    }
  }

  /// Fetch everything, resolve media, replace the stored envelope.
  pub async fn full_fetch(&self, desc: &ResourceDescriptor) -> Result<SyncOutcome> {
    let data = self
      .remote
      .fetch_full(desc.endpoint)
      .await?
      .filter(|data| !data.is_null())
      .ok_or_else(|| eyre!("No data returned for {}", desc.name))?;

    let existing = self
      .current_envelope(desc)
      .map(|e| e.media_paths)
      .unwrap_or_default();

    let (items, last_sync_timestamp) = match &data {
      Value::Array(items) => (
        items.len(),
        max_timestamp(items.iter().map(item_timestamp)),
      ),
      single => (1, item_timestamp(single).map(String::from)),
    };

    let media_paths = self
      .media
      .process_and_cache_images(
        desc.cache_key,
        std::slice::from_ref(&data),
        &desc.media,
        existing,
      )
      .await;

    info!(resource = desc.name, items, "Full fetch complete");
    self.commit(
      desc,
      CachedResourceEnvelope::new(data, media_paths, last_sync_timestamp),
    );
    Ok(SyncOutcome::Fetched { items })
  }

  /// Diff remote metadata against local items and apply the minimal delta.
  async fn reconcile_collection(
    &self,
    desc: &ResourceDescriptor,
    local: CachedResourceEnvelope,
  ) -> Result<SyncOutcome> {
    let remote_meta = self.remote.fetch_metadata(desc.endpoint).await?;
    let local_items = local.items().map(Vec::as_slice).unwrap_or_default();

    let actions = determine_sync_actions(local_items, &remote_meta);
    if actions.is_empty() {
      debug!(resource = desc.name, "Up to date");
      return Ok(SyncOutcome::UpToDate);
    }

    let fetched = self
      .remote
      .fetch_by_ids(desc.endpoint, &actions.to_fetch)
      .await?;
    let fetched_count = fetched.len();

    let media_paths = self
      .media
      .process_and_cache_images(desc.cache_key, &fetched, &desc.media, local.media_paths.clone())
      .await;

    let merged = merge_items(local_items, fetched, &actions.to_delete);
    let high_water = max_timestamp(remote_meta.iter().map(|m| m.date_updated.as_deref()));

    info!(
      resource = desc.name,
      fetched = fetched_count,
      deleted = actions.to_delete.len(),
      "Reconciled"
    );
    self.commit(
      desc,
      CachedResourceEnvelope::new(Value::Array(merged), media_paths, high_water),
    );
    Ok(SyncOutcome::Reconciled {
      fetched: fetched_count,
      deleted: actions.to_delete.len(),
    })
  }

  /// Refetch a singleton only when its remote timestamp moved past the local one.
  async fn reconcile_singleton(
    &self,
    desc: &ResourceDescriptor,
    local: CachedResourceEnvelope,
  ) -> Result<SyncOutcome> {
    let remote_ts = self.remote.fetch_singleton_timestamp(desc.endpoint).await?;

    if !is_remote_newer(local.last_sync_timestamp.as_deref(), remote_ts.as_deref()) {
      debug!(resource = desc.name, "Up to date");
      return Ok(SyncOutcome::UpToDate);
    }
    self.full_fetch(desc).await
  }

  fn current_envelope(&self, desc: &ResourceDescriptor) -> Option<CachedResourceEnvelope> {
    self
      .memory
      .envelope(desc.name)
      .or_else(|| self.storage.load(desc.cache_key).into_option())
  }

  fn commit(&self, desc: &ResourceDescriptor, envelope: CachedResourceEnvelope) {
    // The in-memory copy is updated even if the write fails
    self.storage.save(desc.cache_key, &envelope);
    self.memory.put(desc.name, envelope);
  }

  /// Turn a failed sync into an outcome, reloading the stored envelope if there is one.
  fn isolate(&self, desc: &ResourceDescriptor, result: Result<SyncOutcome>) -> SyncOutcome {
    let error = match result {
      Ok(outcome) => return outcome,
      Err(e) => e,
    };

    let fell_back = match self.storage.load(desc.cache_key) {
      LoadOutcome::Loaded(envelope) => {
        self.memory.put(desc.name, envelope);
        true
      }
      LoadOutcome::Missing | LoadOutcome::Corrupt => false,
    };
    warn!(resource = desc.name, fell_back, "Sync failed: {}", error);

    SyncOutcome::Failed {
      error: error.to_string(),
      fell_back,
    }
  }
}
