// ABOUTME: In-memory collaborators for exercising the cache without disk or a real vault.
// ABOUTME: Records every durable write so tests can assert on batching and retry behavior.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::durable::{DurableStore, PersistenceError};
use crate::extract::{ExtractionError, ValueExtractor};
use crate::record::StoredRecord;
use crate::source::{SourceCollection, SourceError, SourceItem};

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct StoreState<T> {
    records: HashMap<String, StoredRecord<T>>,
    version: Option<u32>,
    set_many_batches: Vec<usize>,
    remove_batches: Vec<Vec<String>>,
}

/// A durable store backed by a HashMap. Writes, or only `clear`, can be made
/// to fail on demand.
pub struct MemoryStore<T> {
    state: Mutex<StoreState<T>>,
    fail_writes: AtomicBool,
    fail_clear: AtomicBool,
}

impl<T: Clone> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                records: HashMap::new(),
                version: None,
                set_many_batches: Vec::new(),
                remove_batches: Vec::new(),
            }),
            fail_writes: AtomicBool::new(false),
            fail_clear: AtomicBool::new(false),
        }
    }

    /// Pre-populate records as if an earlier run had flushed them.
    pub fn seed(&self, version: Option<u32>, records: Vec<(&str, T, i64)>) {
        let mut state = lock(&self.state);
        state.version = version;
        for (key, value, mtime) in records {
            state
                .records
                .insert(key.to_string(), StoredRecord { value, mtime });
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    /// Size of every successful `set_many` call, in order.
    pub fn set_many_batches(&self) -> Vec<usize> {
        lock(&self.state).set_many_batches.clone()
    }

    /// Keys of every successful `remove_many` call, sorted within each batch.
    pub fn remove_batches(&self) -> Vec<Vec<String>> {
        lock(&self.state).remove_batches.clone()
    }

    pub fn stored_count(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn record(&self, key: &str) -> Option<StoredRecord<T>> {
        lock(&self.state).records.get(key).cloned()
    }

    pub fn version(&self) -> Option<u32> {
        lock(&self.state).version
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> DurableStore<T> for MemoryStore<T> {
    async fn get_all(&self) -> Result<HashMap<String, StoredRecord<T>>, PersistenceError> {
        Ok(lock(&self.state).records.clone())
    }

    async fn set_many(
        &self,
        records: HashMap<String, StoredRecord<T>>,
    ) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut state = lock(&self.state);
        state.set_many_batches.push(records.len());
        state.records.extend(records);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut state = lock(&self.state);
        for key in keys {
            state.records.remove(key);
        }
        let mut batch = keys.to_vec();
        batch.sort();
        state.remove_batches.push(batch);
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.check_writable()?;
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("clear disabled".into()));
        }
        lock(&self.state).records.clear();
        Ok(())
    }

    async fn drop_store(&self) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut state = lock(&self.state);
        state.records.clear();
        state.version = None;
        Ok(())
    }

    async fn count(&self) -> Result<usize, PersistenceError> {
        Ok(lock(&self.state).records.len())
    }

    async fn version_marker(&self) -> Result<Option<u32>, PersistenceError> {
        Ok(lock(&self.state).version)
    }

    async fn set_version_marker(&self, version: u32) -> Result<(), PersistenceError> {
        self.check_writable()?;
        lock(&self.state).version = Some(version);
        Ok(())
    }
}

/// A source collection of in-memory documents keyed by path.
#[derive(Default)]
pub struct MemorySource {
    docs: Mutex<BTreeMap<String, (i64, String)>>,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a document.
    pub fn insert(&self, key: &str, mtime: i64, content: &str) {
        lock(&self.docs).insert(key.to_string(), (mtime, content.to_string()));
    }

    pub fn remove(&self, key: &str) {
        lock(&self.docs).remove(key);
    }

    pub fn rename(&self, old_key: &str, new_key: &str, mtime: i64) {
        let mut docs = lock(&self.docs);
        if let Some((_, content)) = docs.remove(old_key) {
            docs.insert(new_key.to_string(), (mtime, content));
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceCollection for MemorySource {
    async fn list(&self) -> Result<Vec<SourceItem>, SourceError> {
        Ok(lock(&self.docs)
            .iter()
            .map(|(key, (mtime, _))| SourceItem::new(key.clone(), *mtime))
            .collect())
    }

    async fn item(&self, key: &str) -> Result<Option<SourceItem>, SourceError> {
        Ok(lock(&self.docs)
            .get(key)
            .map(|(mtime, _)| SourceItem::new(key, *mtime)))
    }

    async fn read(&self, item: &SourceItem) -> Result<String, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.docs)
            .get(&item.key)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| SourceError::NotFound(item.key.clone()))
    }
}

/// A cached value with one persisted field and one transient field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextValue {
    pub text: String,
    /// Transient; stripped on load.
    pub rendered: Option<String>,
}

impl TextValue {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            rendered: None,
        }
    }
}

/// Trims the content into a TextValue. Content starting with `FAIL` is rejected.
#[derive(Default)]
pub struct TextExtractor {
    calls: Mutex<HashMap<String, usize>>,
}

impl TextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total extractions since creation or the last reset.
    pub fn calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    pub fn calls_for(&self, key: &str) -> usize {
        lock(&self.calls).get(key).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }
}

#[async_trait]
impl ValueExtractor<TextValue> for TextExtractor {
    fn default_value(&self) -> TextValue {
        TextValue::default()
    }

    async fn extract_value(
        &self,
        content: &str,
        item: &SourceItem,
    ) -> Result<TextValue, ExtractionError> {
        *lock(&self.calls).entry(item.key.clone()).or_insert(0) += 1;
        if content.starts_with("FAIL") {
            return Err(ExtractionError::Invalid(format!("rejected {}", item.key)));
        }
        Ok(TextValue::new(content.trim()))
    }

    fn load_value(&self, value: TextValue) -> TextValue {
        TextValue {
            rendered: None,
            ..value
        }
    }
}
