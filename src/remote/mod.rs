//! Access to the content backend.
//!
//! [`RemoteSource`] is the seam the sync engine and media cache talk through;
//! [`RemoteClient`] implements it over authenticated HTTP.

mod client;
mod types;

use serde_json::Value;
use std::future::Future;

pub use client::{RemoteClient, RemoteError};
pub use types::{item_timestamp, ItemId, ItemMeta};

/// Read-only operations against the content backend.
pub trait RemoteSource: Send + Sync {
  /// Full payload of an endpoint. `None` when the response carries no `data`.
  fn fetch_full(
    &self,
    endpoint: &str,
  ) -> impl Future<Output = Result<Option<Value>, RemoteError>> + Send;

  /// `id` + `date_updated` of every item in a collection.
  fn fetch_metadata(
    &self,
    endpoint: &str,
  ) -> impl Future<Output = Result<Vec<ItemMeta>, RemoteError>> + Send;

  /// `date_updated` of a singleton resource.
  fn fetch_singleton_timestamp(
    &self,
    endpoint: &str,
  ) -> impl Future<Output = Result<Option<String>, RemoteError>> + Send;

  /// Full items for the given ids, in one round trip. Empty input performs no request.
  fn fetch_by_ids(
    &self,
    endpoint: &str,
    ids: &[ItemId],
  ) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send;

  /// Raw bytes of a media asset.
  fn download_asset(
    &self,
    asset_id: &str,
  ) -> impl Future<Output = Result<Vec<u8>, RemoteError>> + Send;
}
