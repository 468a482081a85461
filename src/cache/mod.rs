//! Local persistence for synced content.
//!
//! This module provides the on-device side of the offline-first cache:
//! - One JSON envelope per resource (data + media path table + high-water timestamp)
//! - Media assets downloaded once per asset id and stored next to the envelopes
//! - An app-version marker that invalidates the whole cache across releases
//! - The in-memory mirror the UI reads from without touching disk or network

mod envelope;
mod media;
mod memory;
mod storage;
mod version;

pub use envelope::{CachedResourceEnvelope, LoadOutcome, MediaPaths};
pub use media::{asset_path, collect_asset_ids, MediaCache};
pub use memory::{LoadingGuard, MemoryCache};
pub use storage::{CacheStorage, JsonFileStore};
pub use version::{GateOutcome, VersionGate};
