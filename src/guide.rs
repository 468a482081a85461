//! Read-through access to synced content.
//!
//! [`FieldGuide`] is the composition root: it owns the in-memory cache, the storage backend and
//! the sync engine, and is the only surface callers use. Reads are synchronous and served from
//! memory; `fetch`, `resync` and `resync_all` are the only operations that touch the network.

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::{
  CacheStorage, GateOutcome, JsonFileStore, LoadOutcome, LoadingGuard, MemoryCache, VersionGate,
};
use crate::config::Config;
use crate::registry::{Registry, ResourceDescriptor};
use crate::remote::{RemoteClient, RemoteSource};
use crate::sync::{SyncEngine, SyncOutcome, SyncReport};

type InFlight = Shared<BoxFuture<'static, SyncOutcome>>;
type InFlightMap = Arc<Mutex<HashMap<&'static str, InFlight>>>;

#[derive(Debug, Clone, Copy)]
enum Operation {
  Fetch,
  Resync,
}

pub struct FieldGuide<R, S> {
  registry: Registry,
  storage: Arc<S>,
  memory: Arc<MemoryCache>,
  engine: Arc<SyncEngine<R, S>>,
  gate: VersionGate,
  /// One shared future per resource with a network operation running
  in_flight: InFlightMap,
}

/// Held by a running operation. Dropping it clears the loading flag and the in-flight
/// entry under one lock, so a new operation never sees one without the other.
struct Running {
  in_flight: InFlightMap,
  loading: Option<LoadingGuard>,
  name: &'static str,
}

impl Drop for Running {
  fn drop(&mut self) {
    let mut in_flight = lock(&self.in_flight);
    self.loading.take();
    in_flight.remove(self.name);
  }
}

impl FieldGuide<RemoteClient, JsonFileStore> {
  /// Wire up the HTTP client and file store described by `config`.
  pub fn from_config(config: &Config) -> Result<Self> {
    let remote = RemoteClient::from_config(config)?;
    let storage = JsonFileStore::new(config.cache_dir()?);
    Ok(Self::new(
      Registry::default(),
      Arc::new(remote),
      storage,
      config.app.version_marker(),
      config.sync.media_concurrency,
    ))
  }
}

impl<R, S> FieldGuide<R, S>
where
  R: RemoteSource + 'static,
  S: CacheStorage + 'static,
{
  pub fn new(
    registry: Registry,
    remote: Arc<R>,
    storage: S,
    app_version: impl Into<String>,
    media_concurrency: usize,
  ) -> Self {
    let storage = Arc::new(storage);
    let memory = Arc::new(MemoryCache::new());
    let engine = Arc::new(SyncEngine::new(
      remote,
      Arc::clone(&storage),
      Arc::clone(&memory),
      media_concurrency,
    ));

    Self {
      registry,
      storage,
      memory,
      engine,
      gate: VersionGate::new(app_version),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn is_cache_version_valid(&self) -> bool {
    self.gate.is_cache_version_valid(self.storage.as_ref())
  }

  /// Start-up: drop caches written by another app version, then load what is on disk.
  pub fn initialize(&self) -> GateOutcome {
    let outcome = self.gate.enforce(self.storage.as_ref());
    if outcome != GateOutcome::Valid {
      self.memory.clear();
    }
    self.hydrate();
    outcome
  }

  /// Load every stored envelope into memory. Returns how many were found.
  pub fn hydrate(&self) -> usize {
    let mut loaded = 0;
    for desc in self.registry.iter() {
      if let LoadOutcome::Loaded(envelope) = self.storage.load(desc.cache_key) {
        self.memory.put(desc.name, envelope);
        loaded += 1;
      }
    }
    debug!(loaded, "Hydrated cache from disk");
    loaded
  }

  /// Last materialized data of a resource. Never performs I/O.
  pub fn get(&self, name: &str) -> Option<Value> {
    self.memory.data(name)
  }

  /// High-water timestamp of a resource's last successful sync.
  pub fn last_sync_timestamp(&self, name: &str) -> Option<String> {
    self
      .memory
      .envelope(name)
      .and_then(|e| e.last_sync_timestamp)
  }

  /// Local path of an asset, or where it will land once downloaded.
  pub fn get_media_path(&self, name: &str, asset_id: &str) -> Option<PathBuf> {
    let desc = self.registry.get(name)?;
    if asset_id.is_empty() {
      return None;
    }
    self
      .memory
      .media_path(name, asset_id)
      .or_else(|| Some(self.engine.media().asset_path(desc.cache_key, asset_id)))
  }

  pub fn is_loading(&self, name: &str) -> bool {
    self.memory.is_loading(name)
  }

  /// Full fetch of one resource. Unknown names are a no-op returning `None`.
  pub async fn fetch(&self, name: &str) -> Option<SyncOutcome> {
    let desc = self.lookup(name)?;
    Some(self.run(desc, Operation::Fetch).await)
  }

  /// Incremental sync of one resource.
  pub async fn resync(&self, name: &str) -> Option<SyncOutcome> {
    let desc = self.lookup(name)?;
    Some(self.run(desc, Operation::Resync).await)
  }

  /// Sync every resource in registry order, reporting progress as it goes.
  pub async fn resync_all(&self, mut on_progress: impl FnMut(&str)) -> SyncReport {
    let total = self.registry.len();
    let mut report = SyncReport::default();

    for (index, desc) in self.registry.iter().enumerate() {
      on_progress(&format!("Syncing {} ({}/{})", desc.name, index + 1, total));
      let outcome = self.run(desc, Operation::Resync).await;
      report.outcomes.push((desc.name, outcome));
    }

    let summary = report.summary();
    info!("{}", summary);
    on_progress(&summary);
    report
  }

  /// Wipe stored and in-memory state, keeping the current version stamp.
  pub fn clear(&self) {
    self.storage.wipe();
    self.storage.write_version_marker(self.gate.current());
    self.memory.clear();
  }

  fn lookup(&self, name: &str) -> Option<&'static ResourceDescriptor> {
    let desc = self.registry.get(name);
    if desc.is_none() {
      warn!(resource = name, "Unknown resource");
    }
    desc
  }

  /// Run an operation, joining one already in flight for the same resource.
  ///
  /// The operation runs on its own task, so it completes even if every caller stops waiting.
  async fn run(&self, desc: &'static ResourceDescriptor, operation: Operation) -> SyncOutcome {
    let shared = {
      let mut in_flight = lock(&self.in_flight);
      match in_flight.get(desc.name) {
        Some(existing) => {
          debug!(resource = desc.name, "Joining in-flight request");
          existing.clone()
        }
        None => {
          let running = Running {
            in_flight: Arc::clone(&self.in_flight),
            loading: Some(LoadingGuard::new(Arc::clone(&self.memory), desc.name)),
            name: desc.name,
          };
          let engine = Arc::clone(&self.engine);
          let task = tokio::spawn(async move {
            let _running = running;
            match operation {
              Operation::Fetch => engine.fetch_resource(desc).await,
              Operation::Resync => engine.sync_resource(desc).await,
            }
          });

          let future = async move {
            task.await.unwrap_or_else(|e| {
              warn!(resource = desc.name, "Sync task failed: {}", e);
              SyncOutcome::Failed {
                error: e.to_string(),
                fell_back: false,
              }
            })
          }
          .boxed()
          .shared();
          in_flight.insert(desc.name, future.clone());
          future
        }
      }
    };

    shared.await
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::MediaSchema;
  use crate::testing::{Call, FakeRemote};
  use serde_json::json;
  use std::time::Duration;
  use tempfile::TempDir;

  const RESOURCES: &[ResourceDescriptor] = &[
    ResourceDescriptor {
      name: "home",
      endpoint: "/items/home",
      cache_key: "home",
      is_collection: false,
      media: MediaSchema::flat(&["image"]),
    },
    ResourceDescriptor {
      name: "trails",
      endpoint: "/items/trails",
      cache_key: "trails",
      is_collection: true,
      media: MediaSchema::flat(&["image"]),
    },
  ];

  fn guide(tmp: &TempDir, remote: FakeRemote) -> FieldGuide<FakeRemote, JsonFileStore> {
    shared_guide(tmp, Arc::new(remote))
  }

  fn shared_guide(tmp: &TempDir, remote: Arc<FakeRemote>) -> FieldGuide<FakeRemote, JsonFileStore> {
    FieldGuide::new(
      Registry::new(RESOURCES),
      remote,
      JsonFileStore::new(tmp.path()),
      "1.0.0-1",
      4,
    )
  }

  fn seeded_remote() -> FakeRemote {
    let remote = FakeRemote::new();
    remote.set(
      "/items/home",
      json!({"title": "Welcome", "image": "hero", "date_updated": "2023-01-01"}),
    );
    remote.set(
      "/items/trails",
      json!([{"id": 1, "name": "Ridge", "date_updated": "2023-01-01"}]),
    );
    remote.add_asset("hero", b"HERO");
    remote
  }

  #[tokio::test]
  async fn test_fetch_populates_memory_and_disk() {
    let tmp = TempDir::new().unwrap();
    let guide = guide(&tmp, seeded_remote());

    assert!(guide.get("home").is_none());
    let outcome = guide.fetch("home").await;
    assert_eq!(outcome, Some(SyncOutcome::Fetched { items: 1 }));
    assert_eq!(guide.get("home").unwrap()["title"], json!("Welcome"));
    assert!(tmp.path().join("home.json").exists());
    assert!(!guide.is_loading("home"));
  }

  #[tokio::test]
  async fn test_unknown_resource_is_noop() {
    let tmp = TempDir::new().unwrap();
    let guide = guide(&tmp, seeded_remote());

    assert_eq!(guide.fetch("unicorns").await, None);
    assert_eq!(guide.get("unicorns"), None);
    assert_eq!(guide.get_media_path("unicorns", "x"), None);
    assert!(!guide.is_loading("unicorns"));
  }

  #[tokio::test]
  async fn test_media_path_resolves_or_reconstructs() {
    let tmp = TempDir::new().unwrap();
    let guide = guide(&tmp, seeded_remote());
    guide.fetch("home").await;

    assert_eq!(
      guide.get_media_path("home", "hero"),
      Some(tmp.path().join("home_hero"))
    );
    // Not downloaded: falls back to the path it would be stored at
    assert_eq!(
      guide.get_media_path("home", "later"),
      Some(tmp.path().join("home_later"))
    );
    assert_eq!(guide.get_media_path("home", ""), None);
  }

  #[tokio::test]
  async fn test_failed_fetch_serves_placeholder_state() {
    let tmp = TempDir::new().unwrap();
    let remote = seeded_remote();
    remote.set_offline(true);
    let guide = guide(&tmp, remote);

    let outcome = guide.fetch("trails").await.unwrap();
    assert!(outcome.is_failure());
    assert_eq!(guide.get("trails"), None);
    assert!(!guide.is_loading("trails"));
  }

  #[tokio::test]
  async fn test_concurrent_fetches_are_coalesced() {
    let tmp = TempDir::new().unwrap();
    let remote = Arc::new(seeded_remote());
    remote.set_delay(Duration::from_millis(20));
    let guide = shared_guide(&tmp, Arc::clone(&remote));

    let (first, second) = tokio::join!(guide.fetch("trails"), guide.fetch("trails"));
    assert_eq!(first, Some(SyncOutcome::Fetched { items: 1 }));
    assert_eq!(first, second);
    assert_eq!(remote.count(|c| matches!(c, Call::Full(_))), 1);

    // Once settled, a new fetch goes to the network again
    guide.fetch("trails").await;
    assert_eq!(remote.count(|c| matches!(c, Call::Full(_))), 2);
  }

  #[tokio::test]
  async fn test_loading_flag_is_set_while_in_flight() {
    let tmp = TempDir::new().unwrap();
    let remote = seeded_remote();
    remote.set_delay(Duration::from_millis(50));
    let guide = guide(&tmp, remote);

    let fetch = guide.fetch("trails");
    let observe = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      guide.is_loading("trails")
    };
    let (outcome, was_loading) = tokio::join!(fetch, observe);

    assert!(was_loading);
    assert!(outcome.is_some());
    assert!(!guide.is_loading("trails"));
  }

  #[tokio::test]
  async fn test_abandoned_fetch_still_completes_and_clears_loading() {
    let tmp = TempDir::new().unwrap();
    let remote = Arc::new(seeded_remote());
    remote.set_delay(Duration::from_millis(50));
    let guide = shared_guide(&tmp, Arc::clone(&remote));

    let abandoned = tokio::time::timeout(Duration::from_millis(10), guide.fetch("trails")).await;
    assert!(abandoned.is_err());
    assert!(guide.is_loading("trails"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!guide.is_loading("trails"));
    assert_eq!(guide.get("trails").unwrap()[0]["name"], json!("Ridge"));
    assert!(tmp.path().join("trails.json").exists());

    // The finished operation is not joined again
    guide.fetch("trails").await;
    assert_eq!(remote.count(|c| matches!(c, Call::Full(_))), 2);
  }

  #[tokio::test]
  async fn test_resync_all_reports_progress_in_order() {
    let tmp = TempDir::new().unwrap();
    let guide = guide(&tmp, seeded_remote());

    let mut messages = Vec::new();
    let report = guide.resync_all(|m| messages.push(m.to_string())).await;

    assert!(report.is_clean());
    assert_eq!(
      messages,
      vec![
        "Syncing home (1/2)",
        "Syncing trails (2/2)",
        "Sync complete: 2 updated, 0 up to date, 0 failed",
      ]
    );
  }

  #[tokio::test]
  async fn test_one_failing_resource_does_not_abort_others() {
    let tmp = TempDir::new().unwrap();
    let remote = seeded_remote();
    remote.fail("/items/home");
    let guide = guide(&tmp, remote);

    let report = guide.resync_all(|_| {}).await;
    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcomes[1].0, "trails");
    assert!(guide.get("trails").is_some());
  }

  #[tokio::test]
  async fn test_initialize_wipes_on_version_change_and_hydrates_otherwise() {
    let tmp = TempDir::new().unwrap();
    {
      let guide = guide(&tmp, seeded_remote());
      assert!(matches!(guide.initialize(), GateOutcome::Invalidated { .. }));
      guide.fetch("home").await;
    }

    // Same version: cached data survives a restart, no network needed
    let offline = FakeRemote::new();
    offline.set_offline(true);
    let restarted = guide(&tmp, offline);
    assert_eq!(restarted.initialize(), GateOutcome::Valid);
    assert_eq!(restarted.get("home").unwrap()["title"], json!("Welcome"));

    // New version: everything is dropped
    let upgraded = FieldGuide::new(
      Registry::new(RESOURCES),
      Arc::new(FakeRemote::new()),
      JsonFileStore::new(tmp.path()),
      "1.0.1-2",
      4,
    );
    assert!(!upgraded.is_cache_version_valid());
    assert!(matches!(upgraded.initialize(), GateOutcome::Invalidated { .. }));
    assert!(upgraded.get("home").is_none());
    assert!(!tmp.path().join("home_hero").exists());
  }

  #[tokio::test]
  async fn test_second_resync_is_incremental() {
    let tmp = TempDir::new().unwrap();
    let guide = guide(&tmp, seeded_remote());
    guide.resync_all(|_| {}).await;

    let report = guide.resync_all(|_| {}).await;
    assert_eq!(
      report.outcomes,
      vec![("home", SyncOutcome::UpToDate), ("trails", SyncOutcome::UpToDate)]
    );
  }

  #[tokio::test]
  async fn test_clear_drops_everything() {
    let tmp = TempDir::new().unwrap();
    let guide = guide(&tmp, seeded_remote());
    guide.fetch("home").await;

    guide.clear();
    assert!(guide.get("home").is_none());
    assert!(guide.is_cache_version_valid());
    assert!(!tmp.path().join("home.json").exists());
  }
}
