// ABOUTME: Durable store seam: the persistent key-value backend behind the cache.
// ABOUTME: Defines the DurableStore trait with bulk operations and an out-of-band version marker.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::record::StoredRecord;

/// Errors that can occur talking to the durable store. None of these are
/// fatal to the cache: affected records stay dirty and are retried.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("durable store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("durable store unavailable: {0}")]
    Unavailable(String),
}

/// A persistent key-value backend owned by exactly one cache.
///
/// The version marker lives outside the record set so it can be read before
/// any record is trusted.
#[async_trait]
pub trait DurableStore<T>: Send + Sync {
    async fn get_all(&self) -> Result<HashMap<String, StoredRecord<T>>, PersistenceError>;

    async fn set_many(&self, records: HashMap<String, StoredRecord<T>>)
    -> Result<(), PersistenceError>;

    async fn remove_many(&self, keys: &[String]) -> Result<(), PersistenceError>;

    /// Remove every record, keeping the store and its version marker.
    async fn clear(&self) -> Result<(), PersistenceError>;

    /// Remove the whole store instance, including the version marker.
    async fn drop_store(&self) -> Result<(), PersistenceError>;

    async fn count(&self) -> Result<usize, PersistenceError>;

    async fn version_marker(&self) -> Result<Option<u32>, PersistenceError>;

    async fn set_version_marker(&self, version: u32) -> Result<(), PersistenceError>;
}
