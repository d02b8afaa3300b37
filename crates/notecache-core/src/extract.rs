// ABOUTME: Value extraction seam: turns a source document's content into a cached value.
// ABOUTME: Also carries the default-value factory and the load-time transform.

use async_trait::async_trait;
use thiserror::Error;

use crate::source::{SourceError, SourceItem};

/// Errors from extracting a value for a single item. Never aborts a batch.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("could not read source: {0}")]
    Source(#[from] SourceError),

    #[error("extraction failed: {0}")]
    Invalid(String),
}

/// Application-defined derivation of cached values.
#[async_trait]
pub trait ValueExtractor<T>: Send + Sync {
    /// Value stored for freshly created documents, before any content exists.
    fn default_value(&self) -> T;

    /// Derive a value from the document's current content.
    async fn extract_value(&self, content: &str, item: &SourceItem) -> Result<T, ExtractionError>;

    /// Applied to every value loaded from the durable store. Must be pure and
    /// idempotent; used to strip transient fields that are recomputed lazily.
    fn load_value(&self, value: T) -> T {
        value
    }
}
