//! Incremental reconciliation of local envelopes against the backend.

mod diff;
mod engine;

pub use diff::{
  determine_sync_actions, is_remote_newer, max_timestamp, merge_items, parse_timestamp,
  SyncActions,
};
pub use engine::{SyncEngine, SyncOutcome, SyncReport};
