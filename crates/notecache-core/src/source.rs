// ABOUTME: Source collection seam: the external set of documents the cache derives values from.
// ABOUTME: Defines SourceItem, the SourceChange notifications, and the SourceCollection trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a source collection.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source item not found: {0}")]
    NotFound(String),
}

/// A document in the source collection, identified by a path-like key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceItem {
    pub key: String,
    /// Last modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
}

impl SourceItem {
    pub fn new(key: impl Into<String>, mtime: i64) -> Self {
        Self {
            key: key.into(),
            mtime,
        }
    }
}

/// A change notification delivered by the host for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceChange {
    Created { item: SourceItem },
    Modified { item: SourceItem },
    Deleted { key: String },
    Renamed { old_key: String, item: SourceItem },
}

impl SourceChange {
    /// The key the change lands on (the new key for renames).
    pub fn key(&self) -> &str {
        match self {
            SourceChange::Created { item }
            | SourceChange::Modified { item }
            | SourceChange::Renamed { item, .. } => &item.key,
            SourceChange::Deleted { key } => key,
        }
    }
}

/// Enumerable, readable collection of documents.
#[async_trait]
pub trait SourceCollection: Send + Sync {
    /// Every item currently in the collection.
    async fn list(&self) -> Result<Vec<SourceItem>, SourceError>;

    /// Look up a single item, returning None when it no longer exists.
    async fn item(&self, key: &str) -> Result<Option<SourceItem>, SourceError>;

    /// Read the current content of an item.
    async fn read(&self, item: &SourceItem) -> Result<String, SourceError>;
}
