//! In-memory [`RemoteSource`] for tests. Serves endpoint payloads and assets from maps and
//! records every call.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::remote::{item_timestamp, ItemId, ItemMeta, RemoteError, RemoteSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  Full(String),
  Metadata(String),
  SingletonTimestamp(String),
  ByIds(String, Vec<ItemId>),
  Asset(String),
}

#[derive(Default)]
struct State {
  endpoints: HashMap<String, Value>,
  assets: HashMap<String, Vec<u8>>,
  failing: HashSet<String>,
  failing_calls: Vec<fn(&Call) -> bool>,
  offline: bool,
  delay: Option<Duration>,
  calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeRemote {
  state: Mutex<State>,
}

impl FakeRemote {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `data` as the full payload of `endpoint`.
  pub fn set(&self, endpoint: &str, data: Value) {
    self.state.lock().unwrap().endpoints.insert(endpoint.into(), data);
  }

  pub fn add_asset(&self, id: &str, bytes: &[u8]) {
    self.state.lock().unwrap().assets.insert(id.into(), bytes.to_vec());
  }

  /// Make every call against `endpoint` fail with HTTP 500.
  pub fn fail(&self, endpoint: &str) {
    self.state.lock().unwrap().failing.insert(endpoint.into());
  }

  /// Make every call matching `pred` fail with HTTP 500, whatever its endpoint.
  pub fn fail_when(&self, pred: fn(&Call) -> bool) {
    self.state.lock().unwrap().failing_calls.push(pred);
  }

  pub fn set_offline(&self, offline: bool) {
    self.state.lock().unwrap().offline = offline;
  }

  pub fn set_delay(&self, delay: Duration) {
    self.state.lock().unwrap().delay = Some(delay);
  }

  pub fn calls(&self) -> Vec<Call> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn clear_calls(&self) {
    self.state.lock().unwrap().calls.clear();
  }

  pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
    self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
  }

  pub fn asset_downloads(&self) -> usize {
    self.count(|c| matches!(c, Call::Asset(_)))
  }

  /// Record the call and return the endpoint's payload, honoring delay and failures.
  async fn serve(&self, call: Call, key: &str) -> Result<Option<Value>, RemoteError> {
    let (delay, call_fails) = {
      let mut state = self.state.lock().unwrap();
      let call_fails = state.failing_calls.iter().any(|pred| pred(&call));
      state.calls.push(call);
      (state.delay, call_fails)
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let state = self.state.lock().unwrap();
    if state.offline || call_fails || state.failing.contains(key) {
      return Err(RemoteError::Status {
        url: key.to_string(),
        status: 500,
        body: "unavailable".into(),
      });
    }
    Ok(state.endpoints.get(key).cloned())
  }
}

impl RemoteSource for FakeRemote {
  async fn fetch_full(&self, endpoint: &str) -> Result<Option<Value>, RemoteError> {
    self.serve(Call::Full(endpoint.into()), endpoint).await
  }

  async fn fetch_metadata(&self, endpoint: &str) -> Result<Vec<ItemMeta>, RemoteError> {
    let data = self.serve(Call::Metadata(endpoint.into()), endpoint).await?;
    let items = data.and_then(|d| d.as_array().cloned()).unwrap_or_default();
    Ok(
      items
        .iter()
        .filter_map(|item| {
          Some(ItemMeta {
            id: ItemId::of_item(item)?,
            date_updated: item_timestamp(item).map(String::from),
          })
        })
        .collect(),
    )
  }

  async fn fetch_singleton_timestamp(&self, endpoint: &str) -> Result<Option<String>, RemoteError> {
    let data = self
      .serve(Call::SingletonTimestamp(endpoint.into()), endpoint)
      .await?;
    Ok(data.as_ref().and_then(item_timestamp).map(String::from))
  }

  async fn fetch_by_ids(&self, endpoint: &str, ids: &[ItemId]) -> Result<Vec<Value>, RemoteError> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let data = self
      .serve(Call::ByIds(endpoint.into(), ids.to_vec()), endpoint)
      .await?;
    let items = data.and_then(|d| d.as_array().cloned()).unwrap_or_default();
    Ok(
      items
        .into_iter()
        .filter(|item| ItemId::of_item(item).is_some_and(|id| ids.contains(&id)))
        .collect(),
    )
  }

  async fn download_asset(&self, asset_id: &str) -> Result<Vec<u8>, RemoteError> {
    let key = format!("/assets/{}", asset_id);
    self.serve(Call::Asset(asset_id.into()), &key).await?;
    self
      .state
      .lock()
      .unwrap()
      .assets
      .get(asset_id)
      .cloned()
      .ok_or_else(|| RemoteError::Status {
        url: key,
        status: 404,
        body: "not found".into(),
      })
  }
}
