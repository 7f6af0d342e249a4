//! Remote document sources the refresh controller reads from.
//!
//! A source answers one-shot [`SeriesQuery`]s with raw JSON documents; the
//! controller validates them itself (see [`crate::normalize`]), so sources
//! never need to know what a valid point is.

pub mod firestore;
pub mod local;

pub use firestore::FirestoreSource;
pub use local::LocalDocumentSource;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::query::SeriesQuery;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Run `query` once and return matching documents in query order.
    async fn fetch(&self, query: &SeriesQuery) -> Result<Vec<Value>>;
}
