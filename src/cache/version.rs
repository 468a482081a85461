//! Cache invalidation across app releases.

use tracing::{info, warn};

use super::storage::CacheStorage;

/// What the gate did at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
  /// Marker matches the running version; cache kept
  Valid,
  /// Marker missing or different; cache wiped and marker rewritten
  Invalidated { previous: Option<String> },
}

/// Compares the persisted version marker with the running app version.
#[derive(Debug, Clone)]
pub struct VersionGate {
  current: String,
}

impl VersionGate {
  pub fn new(current: impl Into<String>) -> Self {
    Self {
      current: current.into(),
    }
  }

  pub fn current(&self) -> &str {
    &self.current
  }

  /// True when the stored marker equals the running version. A missing marker is invalid.
  pub fn is_cache_version_valid<S: CacheStorage + ?Sized>(&self, storage: &S) -> bool {
    storage.read_version_marker().as_deref() == Some(self.current.as_str())
  }

  /// Wipe the cache if it was written by another version, then stamp the current one.
  pub fn enforce<S: CacheStorage + ?Sized>(&self, storage: &S) -> GateOutcome {
    let previous = storage.read_version_marker();
    if previous.as_deref() == Some(self.current.as_str()) {
      return GateOutcome::Valid;
    }

    info!(
      previous = previous.as_deref().unwrap_or("none"),
      current = %self.current,
      "Cache version mismatch, wiping cache"
    );
    if !storage.wipe() {
      warn!("Cache wipe incomplete");
    }
    storage.write_version_marker(&self.current);

    GateOutcome::Invalidated { previous }
  }
}
