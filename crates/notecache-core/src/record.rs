// ABOUTME: Record types held by the cache: the in-memory record and its persisted form.
// ABOUTME: Also defines the CacheValue bound every cached value type must satisfy.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Bound for values the cache can hold and persist.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// One cached entry. `mtime` is the source item's modification time (ms since
/// the Unix epoch) at the moment `value` was derived. `dirty` is set while the
/// record differs from what the durable store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub value: T,
    pub mtime: i64,
    #[serde(skip)]
    pub dirty: bool,
}

impl<T> Record<T> {
    pub fn new(value: T, mtime: i64, dirty: bool) -> Self {
        Self {
            value,
            mtime,
            dirty,
        }
    }
}

/// The shape handed to the durable store. The dirty flag never leaves memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord<T> {
    pub value: T,
    pub mtime: i64,
}

impl<T: Clone> From<&Record<T>> for StoredRecord<T> {
    fn from(record: &Record<T>) -> Self {
        Self {
            value: record.value.clone(),
            mtime: record.mtime,
        }
    }
}

impl<T> From<StoredRecord<T>> for Record<T> {
    fn from(stored: StoredRecord<T>) -> Self {
        Self {
            value: stored.value,
            mtime: stored.mtime,
            dirty: false,
        }
    }
}

/// A keyed record, as returned by full-scan snapshots.
pub type Entry<T> = (String, Record<T>);

/// Current wall-clock time in milliseconds, used when a caller omits an mtime.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_record_drops_dirty_flag() {
        let record = Record::new("body".to_string(), 42, true);
        let stored = StoredRecord::from(&record);
        assert_eq!(stored.mtime, 42);

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("dirty"));

        let loaded: Record<String> = stored.into();
        assert!(!loaded.dirty, "records coming back from disk are clean");
    }
}
