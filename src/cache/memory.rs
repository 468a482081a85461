//! In-memory mirror of every resource's envelope plus per-resource loading flags.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::envelope::CachedResourceEnvelope;

/// Latest materialized state, keyed by resource name.
///
/// Owned by the composition root and shared by reference with the sync engine and the
/// access facade. Reads never touch disk or network.
#[derive(Debug, Default)]
pub struct MemoryCache {
  envelopes: Mutex<HashMap<String, CachedResourceEnvelope>>,
  loading: Mutex<HashSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  // A panic mid-update leaves a whole envelope in place, never a torn one
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn envelope(&self, name: &str) -> Option<CachedResourceEnvelope> {
    lock(&self.envelopes).get(name).cloned()
  }

  pub fn data(&self, name: &str) -> Option<Value> {
    lock(&self.envelopes).get(name).map(|e| e.data.clone())
  }

  pub fn media_path(&self, name: &str, asset_id: &str) -> Option<PathBuf> {
    lock(&self.envelopes)
      .get(name)
      .and_then(|e| e.media_paths.get(asset_id).cloned())
  }

  pub fn put(&self, name: &str, envelope: CachedResourceEnvelope) {
    lock(&self.envelopes).insert(name.to_string(), envelope);
  }

  pub fn clear(&self) {
    lock(&self.envelopes).clear();
  }

  pub fn is_loading(&self, name: &str) -> bool {
    lock(&self.loading).contains(name)
  }

  fn set_loading(&self, name: &str, loading: bool) {
    let mut flags = lock(&self.loading);
    if loading {
      flags.insert(name.to_string());
    } else {
      flags.remove(name);
    }
  }
}

/// Marks a resource as loading for as long as the guard lives.
pub struct LoadingGuard {
  memory: Arc<MemoryCache>,
  name: &'static str,
}

impl LoadingGuard {
  pub fn new(memory: Arc<MemoryCache>, name: &'static str) -> Self {
    memory.set_loading(name, true);
    Self { memory, name }
  }
}

impl Drop for LoadingGuard {
  fn drop(&mut self) {
    self.memory.set_loading(self.name, false);
  }
}
