use crate::config::Config;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::types::{item_timestamp, ItemId, ItemMeta, Payload, SingletonMeta};
use super::RemoteSource;

/// Errors surfaced by the remote client.
///
/// Status and parse failures keep the response body for diagnosis.
#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },
  #[error("{url} returned HTTP {status}: {body}")]
  Status {
    url: String,
    status: u16,
    body: String,
  },
  #[error("invalid JSON from {url}: {source} (body: {body})")]
  Parse {
    url: String,
    #[source]
    source: serde_json::Error,
    body: String,
  },
  #[error("invalid URL: {0}")]
  InvalidUrl(String),
}

impl RemoteError {
  /// HTTP status code, if the server answered.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}

/// Authenticated HTTP client for the content backend.
#[derive(Clone)]
pub struct RemoteClient {
  http: reqwest::Client,
  base_url: String,
  token: String,
}

impl RemoteClient {
  pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, RemoteError> {
    // Validate once so per-request URL building only fails on bad endpoints
    Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", base_url, e)))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
      token: token.into(),
    })
  }

  /// Build a client from configuration, reading the token from the environment.
  pub fn from_config(config: &Config) -> color_eyre::Result<Self> {
    let token = Config::get_api_token()?;
    Ok(Self::new(&config.api.url, token)?)
  }

  fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, RemoteError> {
    let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
    let mut url = Url::parse(&raw).map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if !query.is_empty() {
      url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
  }

  /// `/assets/{id}` with the id kept as one path segment, whatever characters it holds.
  fn asset_url(&self, asset_id: &str) -> Result<Url, RemoteError> {
    if matches!(asset_id, "" | "." | "..") {
      return Err(RemoteError::InvalidUrl(format!("asset id {:?}", asset_id)));
    }
    let mut url = self.url("/assets", &[])?;
    let base = url.to_string();
    url
      .path_segments_mut()
      .map_err(|_| RemoteError::InvalidUrl(base))?
      .push(asset_id);
    Ok(url)
  }

  /// GET a URL and return the response body, failing on non-2xx status.
  async fn get_bytes(&self, url: Url) -> Result<Vec<u8>, RemoteError> {
    debug!(%url, "GET");
    let response = self
      .http
      .get(url.clone())
      .bearer_auth(&self.token)
      .send()
      .await
      .map_err(|source| RemoteError::Transport {
        url: url.to_string(),
        source,
      })?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|source| RemoteError::Transport {
        url: url.to_string(),
        source,
      })?;

    if !status.is_success() {
      return Err(RemoteError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: String::from_utf8_lossy(&body).into_owned(),
      });
    }

    Ok(body.to_vec())
  }

  async fn get_data<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, RemoteError> {
    let body = self.get_bytes(url.clone()).await?;
    let payload: Payload<T> =
      serde_json::from_slice(&body).map_err(|source| RemoteError::Parse {
        url: url.to_string(),
        source,
        body: String::from_utf8_lossy(&body).into_owned(),
      })?;
    Ok(payload.data)
  }
}

impl RemoteSource for RemoteClient {
  async fn fetch_full(&self, endpoint: &str) -> Result<Option<Value>, RemoteError> {
    let url = self.url(endpoint, &[])?;
    self.get_data(url).await
  }

  async fn fetch_metadata(&self, endpoint: &str) -> Result<Vec<ItemMeta>, RemoteError> {
    let url = self.url(endpoint, &[("fields", "id,date_updated")])?;
    let items: Vec<Value> = self.get_data(url).await?.unwrap_or_default();

    let total = items.len();
    let metas: Vec<ItemMeta> = items
      .iter()
      .filter_map(|item| {
        Some(ItemMeta {
          id: ItemId::of_item(item)?,
          date_updated: item_timestamp(item).map(String::from),
        })
      })
      .collect();
    if metas.len() < total {
      warn!(endpoint, skipped = total - metas.len(), "Skipped items without a usable id");
    }
    Ok(metas)
  }

  async fn fetch_singleton_timestamp(&self, endpoint: &str) -> Result<Option<String>, RemoteError> {
    let url = self.url(endpoint, &[("fields", "date_updated")])?;
    let meta: Option<SingletonMeta> = self.get_data(url).await?;
    Ok(meta.and_then(|m| m.date_updated))
  }

  async fn fetch_by_ids(&self, endpoint: &str, ids: &[ItemId]) -> Result<Vec<Value>, RemoteError> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let joined = ids
      .iter()
      .map(ItemId::as_str)
      .collect::<Vec<_>>()
      .join(",");
    let url = self.url(endpoint, &[("filter[id][_in]", joined.as_str())])?;
    Ok(self.get_data(url).await?.unwrap_or_default())
  }

  async fn download_asset(&self, asset_id: &str) -> Result<Vec<u8>, RemoteError> {
    let url = self.asset_url(asset_id)?;
    self.get_bytes(url).await
  }
}
