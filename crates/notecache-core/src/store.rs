// ABOUTME: In-memory cache store mapping document keys to records.
// ABOUTME: Tracks dirty records and pending deletions for the write-back scheduler.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::record::{Entry, Record, StoredRecord, now_millis};

/// Errors raised by cache store mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
}

/// The in-memory working set. Every mutation goes through these methods;
/// the actor owns the only writable instance.
#[derive(Debug, Clone)]
pub struct CacheStore<T> {
    records: HashMap<String, Record<T>>,
    pending_deletions: HashSet<String>,
}

impl<T> Default for CacheStore<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            pending_deletions: HashSet::new(),
        }
    }
}

impl<T: Clone> CacheStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record. A missing mtime means "now".
    pub fn store_key(&mut self, key: &str, value: T, mtime: Option<i64>, dirty: bool) {
        let mtime = mtime.unwrap_or_else(now_millis);
        // A key written again before the flush must not be removed by it.
        self.pending_deletions.remove(key);
        self.records
            .insert(key.to_string(), Record::new(value, mtime, dirty));
    }

    /// Remove a record and queue its removal from the durable store.
    pub fn delete_key(&mut self, key: &str) -> Result<Record<T>, StoreError> {
        let record = self
            .records
            .remove(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
        self.pending_deletions.insert(key.to_string());
        Ok(record)
    }

    /// Move a record to a new key, keeping its value. The new record is dirty.
    pub fn rename_key(
        &mut self,
        old_key: &str,
        new_key: &str,
        mtime: Option<i64>,
    ) -> Result<(), StoreError> {
        let value = match self.records.get(old_key) {
            Some(record) => record.value.clone(),
            None => return Err(StoreError::KeyNotFound(old_key.to_string())),
        };
        self.store_key(new_key, value, mtime, true);
        if old_key != new_key {
            self.delete_key(old_key)?;
        }
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<T> {
        self.records.get(key).map(|r| r.value.clone())
    }

    pub fn get_item(&self, key: &str) -> Option<Record<T>> {
        self.records.get(key).cloned()
    }

    pub fn mtime(&self, key: &str) -> Option<i64> {
        self.records.get(key).map(|r| r.mtime)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn all_values(&self) -> Vec<T> {
        self.records.values().map(|r| r.value.clone()).collect()
    }

    pub fn all_items(&self) -> Vec<Record<T>> {
        self.records.values().cloned().collect()
    }

    pub fn all_entries(&self) -> Vec<Entry<T>> {
        self.records
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Replace the contents with records read from the durable store.
    /// `load_value` runs on every value; loaded records start clean.
    pub fn load<F>(&mut self, stored: HashMap<String, StoredRecord<T>>, load_value: F)
    where
        F: Fn(T) -> T,
    {
        self.pending_deletions.clear();
        self.records = stored
            .into_iter()
            .map(|(key, record)| {
                let value = load_value(record.value);
                (key, Record::new(value, record.mtime, false))
            })
            .collect();
    }

    /// Drop every record without queueing deletions. Used when the durable
    /// store is being cleared as well.
    pub fn clear(&mut self) {
        self.records.clear();
        self.pending_deletions.clear();
    }

    /// Copy every dirty record into a write batch. Flags are left untouched
    /// until the batch is confirmed with `mark_clean`.
    pub fn dirty_batch(&self) -> HashMap<String, StoredRecord<T>> {
        self.records
            .iter()
            .filter(|(_, r)| r.dirty)
            .map(|(k, r)| (k.clone(), StoredRecord::from(r)))
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.records.values().filter(|r| r.dirty).count()
    }

    /// Mark the records of a confirmed write batch clean. The caller must not
    /// have mutated those keys between taking the batch and confirming it.
    pub fn mark_clean<'a, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for key in keys {
            if let Some(record) = self.records.get_mut(key) {
                record.dirty = false;
            }
        }
    }

    pub fn pending_deletions(&self) -> Vec<String> {
        self.pending_deletions.iter().cloned().collect()
    }

    pub fn forget_deletions(&mut self, keys: &[String]) {
        for key in keys {
            self.pending_deletions.remove(key);
        }
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending_deletions.is_empty() || self.records.values().any(|r| r.dirty)
    }
}
