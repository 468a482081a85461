//! Offline-first content sync for the field guide.
//!
//! Content lives on a remote backend; this crate mirrors it into a local cache directory,
//! keeps it current with cheap metadata-driven diffs, and serves the latest local state
//! without blocking on the network.

pub mod cache;
pub mod config;
pub mod guide;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use guide::FieldGuide;
