//! Delta computation between local items and remote metadata.
//!
//! Timestamp policy, used both per item and for singletons: a remote value only counts as
//! newer when it parses. An unparseable or missing local value is older than any valid remote
//! one. Two unparseable values never trigger a fetch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::remote::{item_timestamp, ItemId, ItemMeta};

/// Parse a `date_updated` value. Returns `None` for anything unrecognized.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }
  for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
      return Some(dt.and_utc());
    }
  }
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
}

/// Whether `remote` should replace `local`.
pub fn is_remote_newer(local: Option<&str>, remote: Option<&str>) -> bool {
  let Some(remote) = remote.and_then(parse_timestamp) else {
    return false;
  };
  match local.and_then(parse_timestamp) {
    Some(local) => remote > local,
    None => true,
  }
}

/// Latest valid timestamp among `values`, returned in its original form.
pub fn max_timestamp<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
  values
    .into_iter()
    .flatten()
    .filter_map(|raw| parse_timestamp(raw).map(|parsed| (parsed, raw)))
    .max_by_key(|(parsed, _)| *parsed)
    .map(|(_, raw)| raw.to_string())
}

/// Ids to bulk-fetch and ids to drop locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncActions {
  pub to_fetch: Vec<ItemId>,
  pub to_delete: Vec<ItemId>,
}

impl SyncActions {
  pub fn is_empty(&self) -> bool {
    self.to_fetch.is_empty() && self.to_delete.is_empty()
  }
}

/// Compare local items against the full remote metadata set.
///
/// Fetch: ids missing locally, or whose remote timestamp is newer per [`is_remote_newer`].
/// Delete: local ids absent from the remote set.
pub fn determine_sync_actions(local: &[Value], remote: &[ItemMeta]) -> SyncActions {
  let local_index: HashMap<ItemId, Option<&str>> = local
    .iter()
    .filter_map(|item| ItemId::of_item(item).map(|id| (id, item_timestamp(item))))
    .collect();

  let mut remote_ids = HashSet::new();
  let mut to_fetch = Vec::new();
  for meta in remote {
    if !remote_ids.insert(&meta.id) {
      continue;
    }
    let needs_fetch = match local_index.get(&meta.id) {
      None => true,
      Some(local_ts) => is_remote_newer(*local_ts, meta.date_updated.as_deref()),
    };
    if needs_fetch {
      to_fetch.push(meta.id.clone());
    }
  }

  let mut seen = HashSet::new();
  let to_delete = local
    .iter()
    .filter_map(ItemId::of_item)
    .filter(|id| !remote_ids.contains(id) && seen.insert(id.clone()))
    .collect();

  SyncActions {
    to_fetch,
    to_delete,
  }
}

/// Apply a fetched delta to local items. Remote wins for every id present in `fetched`.
///
/// Deleted ids are removed, fetched ids replace their local counterpart in place, and ids not
/// seen locally are appended in fetch order. Local items without an id are dropped.
pub fn merge_items(local: &[Value], fetched: Vec<Value>, to_delete: &[ItemId]) -> Vec<Value> {
  let deleted: HashSet<&ItemId> = to_delete.iter().collect();

  let mut order = Vec::new();
  let mut by_id: HashMap<ItemId, Value> = HashMap::new();
  for item in fetched {
    let Some(id) = ItemId::of_item(&item) else {
      continue;
    };
    if by_id.insert(id.clone(), item).is_none() {
      order.push(id);
    }
  }

  let mut merged = Vec::with_capacity(local.len() + by_id.len());
  for item in local {
    let Some(id) = ItemId::of_item(item) else {
      continue;
    };
    if deleted.contains(&id) {
      continue;
    }
    match by_id.remove(&id) {
      Some(replacement) => merged.push(replacement),
      None => merged.push(item.clone()),
    }
  }

  for id in order {
    if let Some(item) = by_id.remove(&id) {
      merged.push(item);
    }
  }
  merged
}
