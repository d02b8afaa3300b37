// ABOUTME: Async actor that owns the cache store and serializes every mutation through one task.
// ABOUTME: Provides CacheHandle for mutations, reads, event subscriptions, and lifecycle control.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::debounce::{Debouncer, Edge};
use crate::durable::{DurableStore, PersistenceError};
use crate::event::{CacheEvent, EventKind};
use crate::extract::{ExtractionError, ValueExtractor};
use crate::notifier::{EventNotifier, Subscription};
use crate::reconcile::ReconcileReport;
use crate::record::{CacheValue, Entry, Record};
use crate::source::{SourceChange, SourceCollection, SourceError, SourceItem};
use crate::store::{CacheStore, StoreError};

/// Errors returned to callers of the cache handle.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("cache actor channel closed")]
    ChannelClosed,
}

type Reply<R> = oneshot::Sender<Result<R, ActorError>>;

/// Messages processed by the actor, one at a time, in arrival order.
enum CacheCommand<T> {
    Store {
        key: String,
        value: T,
        mtime: Option<i64>,
        dirty: bool,
        reply: Reply<()>,
    },
    Delete {
        key: String,
        reply: Reply<()>,
    },
    Rename {
        old_key: String,
        new_key: String,
        mtime: Option<i64>,
        reply: Reply<()>,
    },
    Change {
        change: SourceChange,
        reply: Option<Reply<()>>,
    },
    Flush {
        reply: Reply<()>,
    },
    Clear {
        reply: Reply<()>,
    },
    Drop {
        reply: Reply<()>,
    },
    Reinitialize {
        reply: Reply<ReconcileReport>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Public handle for interacting with a running cache.
pub struct CacheHandle<T> {
    cmd_tx: mpsc::Sender<CacheCommand<T>>,
    notifier: EventNotifier<T>,
    store: Arc<RwLock<CacheStore<T>>>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>,
    name: String,
}

impl<T: CacheValue> CacheHandle<T> {
    async fn request<R>(
        &self,
        build: impl FnOnce(Reply<R>) -> CacheCommand<T>,
    ) -> Result<R, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| ActorError::ChannelClosed)?;
        rx.await.map_err(|_| ActorError::ChannelClosed)?
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or overwrite a value. The record is dirty until the next flush.
    pub async fn store_key(
        &self,
        key: impl Into<String>,
        value: T,
        mtime: Option<i64>,
    ) -> Result<(), ActorError> {
        self.store_key_with(key, value, mtime, true).await
    }

    /// Like `store_key`, with explicit control over the dirty flag.
    pub async fn store_key_with(
        &self,
        key: impl Into<String>,
        value: T,
        mtime: Option<i64>,
        dirty: bool,
    ) -> Result<(), ActorError> {
        let key = key.into();
        self.request(|reply| CacheCommand::Store {
            key,
            value,
            mtime,
            dirty,
            reply,
        })
        .await
    }

    pub async fn delete_key(&self, key: impl Into<String>) -> Result<(), ActorError> {
        let key = key.into();
        self.request(|reply| CacheCommand::Delete { key, reply }).await
    }

    pub async fn rename_key(
        &self,
        old_key: impl Into<String>,
        new_key: impl Into<String>,
        mtime: Option<i64>,
    ) -> Result<(), ActorError> {
        let old_key = old_key.into();
        let new_key = new_key.into();
        self.request(|reply| CacheCommand::Rename {
            old_key,
            new_key,
            mtime,
            reply,
        })
        .await
    }

    /// Apply one source notification and wait for it to land.
    pub async fn apply_change(&self, change: SourceChange) -> Result<(), ActorError> {
        self.request(|reply| CacheCommand::Change {
            change,
            reply: Some(reply),
        })
        .await
    }

    /// Feed a stream of source notifications into the cache in order.
    /// Failures are logged by the actor; the forwarder stops when either side
    /// closes.
    pub fn forward_changes(&self, mut rx: mpsc::Receiver<SourceChange>) -> JoinHandle<()> {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                if cmd_tx
                    .send(CacheCommand::Change {
                        change,
                        reply: None,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        })
    }

    /// Write every dirty record and pending deletion to the durable store now.
    pub async fn flush(&self) -> Result<(), ActorError> {
        self.request(|reply| CacheCommand::Flush { reply }).await
    }

    /// Empty the cache and the durable records, keeping the version marker.
    pub async fn clear_database(&self) -> Result<(), ActorError> {
        self.request(|reply| CacheCommand::Clear { reply }).await
    }

    /// Empty the cache and remove the durable store, version marker included.
    pub async fn drop_database(&self) -> Result<(), ActorError> {
        self.request(|reply| CacheCommand::Drop { reply }).await
    }

    /// Drop everything and rebuild from the source collection.
    pub async fn reinitialize_database(&self) -> Result<ReconcileReport, ActorError> {
        self.request(|reply| CacheCommand::Reinitialize { reply })
            .await
    }

    pub async fn get_value(&self, key: &str) -> Option<T> {
        self.store.read().await.get_value(key)
    }

    pub async fn get_item(&self, key: &str) -> Option<Record<T>> {
        self.store.read().await.get_item(key)
    }

    pub async fn all_keys(&self) -> Vec<String> {
        self.store.read().await.all_keys()
    }

    pub async fn all_values(&self) -> Vec<T> {
        self.store.read().await.all_values()
    }

    pub async fn all_items(&self) -> Vec<Record<T>> {
        self.store.read().await.all_items()
    }

    pub async fn all_entries(&self) -> Vec<Entry<T>> {
        self.store.read().await.all_entries()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// Read-only access to the whole store for batch reads.
    pub async fn read_store(&self) -> RwLockReadGuard<'_, CacheStore<T>> {
        self.store.read().await
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.notifier.subscribe()
    }

    pub fn on(&self, kind: EventKind) -> Subscription<T> {
        self.notifier.on(kind)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the initial reconciliation has finished.
    pub async fn wait_ready(&self) -> Result<(), ActorError> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|r| *r)
            .await
            .map(|_| ())
            .map_err(|_| ActorError::ChannelClosed)
    }

    /// Flush outstanding writes and stop the actor. Subscriptions end once
    /// the last handle is gone.
    pub async fn shutdown(self) -> Result<(), ActorError> {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(CacheCommand::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        self.task.await.map_err(|_| ActorError::ChannelClosed)
    }
}

/// Spawn a cache actor and return the handle for interacting with it.
/// The actor loads the durable records, reconciles them against the source
/// collection, then processes commands sequentially.
pub fn spawn<T: CacheValue>(
    config: CacheConfig,
    source: Arc<dyn SourceCollection>,
    durable: Arc<dyn DurableStore<T>>,
    extractor: Arc<dyn ValueExtractor<T>>,
) -> CacheHandle<T> {
    let notifier = EventNotifier::new(config.event_buffer.max(1));
    spawn_with_notifier(config, source, durable, extractor, notifier)
}

/// Like `spawn`, but publishing on an existing notifier. Subscriptions taken
/// from it beforehand receive every event, including the loaded snapshot and
/// startup progress.
pub fn spawn_with_notifier<T: CacheValue>(
    config: CacheConfig,
    source: Arc<dyn SourceCollection>,
    durable: Arc<dyn DurableStore<T>>,
    extractor: Arc<dyn ValueExtractor<T>>,
    notifier: EventNotifier<T>,
) -> CacheHandle<T> {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
    let (ready_tx, ready_rx) = watch::channel(false);
    let store = Arc::new(RwLock::new(CacheStore::new()));
    let name = config.name.clone();

    let actor = CacheActor {
        notify: Debouncer::new(config.notify_period, Edge::Leading),
        flush: Debouncer::new(config.flush_period, Edge::Trailing),
        config,
        source,
        durable,
        extractor,
        store: Arc::clone(&store),
        notifier: notifier.clone(),
        cmd_rx,
        ready_tx,
    };

    let task = tokio::spawn(actor.run());

    CacheHandle {
        cmd_tx,
        notifier,
        store,
        ready: ready_rx,
        task,
        name,
    }
}

/// The internal actor. Sole writer of the cache store.
pub(crate) struct CacheActor<T> {
    pub(crate) config: CacheConfig,
    pub(crate) source: Arc<dyn SourceCollection>,
    pub(crate) durable: Arc<dyn DurableStore<T>>,
    pub(crate) extractor: Arc<dyn ValueExtractor<T>>,
    pub(crate) store: Arc<RwLock<CacheStore<T>>>,
    pub(crate) notifier: EventNotifier<T>,
    cmd_rx: mpsc::Receiver<CacheCommand<T>>,
    ready_tx: watch::Sender<bool>,
    notify: Debouncer,
    flush: Debouncer,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<T: CacheValue> CacheActor<T> {
    async fn run(mut self) {
        self.initialize().await;
        self.ready_tx.send_replace(true);
        self.notifier.publish(CacheEvent::Ready);

        loop {
            let notify_at = self.notify.deadline();
            let flush_at = self.flush.deadline();

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(CacheCommand::Shutdown { reply }) => {
                        self.final_flush().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.process_command(cmd).await,
                    None => {
                        self.final_flush().await;
                        break;
                    }
                },
                _ = wait_until(notify_at) => {
                    if self.notify.poll(Instant::now()) {
                        self.publish_snapshot().await;
                    }
                }
                _ = wait_until(flush_at) => {
                    if self.flush.poll(Instant::now()) {
                        // Failures are logged and re-armed inside.
                        let _ = self.flush_changes().await;
                    }
                }
            }
        }

        tracing::info!(store = %self.config.name, "cache actor stopped");
    }

    async fn process_command(&mut self, cmd: CacheCommand<T>) {
        // Ignore send errors: the caller may have dropped their receiver.
        match cmd {
            CacheCommand::Store {
                key,
                value,
                mtime,
                dirty,
                reply,
            } => {
                self.store
                    .write()
                    .await
                    .store_key(&key, value, mtime, dirty);
                self.mark_changed().await;
                let _ = reply.send(Ok(()));
            }
            CacheCommand::Delete { key, reply } => {
                let result = self.store.write().await.delete_key(&key);
                if result.is_ok() {
                    self.mark_changed().await;
                }
                let _ = reply.send(result.map(|_| ()).map_err(ActorError::from));
            }
            CacheCommand::Rename {
                old_key,
                new_key,
                mtime,
                reply,
            } => {
                let result = self.store.write().await.rename_key(&old_key, &new_key, mtime);
                if result.is_ok() {
                    self.mark_changed().await;
                }
                let _ = reply.send(result.map_err(ActorError::from));
            }
            CacheCommand::Change { change, reply } => {
                let key = change.key().to_string();
                let result = self.apply_change(change).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::warn!(store = %self.config.name, key = %key, error = %e, "source change not applied");
                        }
                    }
                }
            }
            CacheCommand::Flush { reply } => {
                let result = self.flush_changes().await;
                if result.is_ok() {
                    self.flush.reset();
                }
                let _ = reply.send(result);
            }
            CacheCommand::Clear { reply } => {
                let _ = reply.send(self.clear_database().await);
            }
            CacheCommand::Drop { reply } => {
                let _ = reply.send(self.drop_database().await);
            }
            CacheCommand::Reinitialize { reply } => {
                let _ = reply.send(self.reinitialize_database().await);
            }
            CacheCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Apply a source notification directly to the store, bypassing full
    /// reconciliation.
    async fn apply_change(&mut self, change: SourceChange) -> Result<(), ActorError> {
        match change {
            SourceChange::Created { item } => {
                let value = self.extractor.default_value();
                self.store
                    .write()
                    .await
                    .store_key(&item.key, value, Some(item.mtime), true);
            }
            SourceChange::Modified { item } => {
                // Notifications can lag behind the source; use its current state.
                let Some(current) = self.source.item(&item.key).await? else {
                    tracing::debug!(
                        store = %self.config.name,
                        key = %item.key,
                        "modified item no longer exists; awaiting its delete"
                    );
                    return Ok(());
                };
                // Extraction happens before the write lock is taken.
                let value = self.extract(&current).await?;
                self.store
                    .write()
                    .await
                    .store_key(&current.key, value, Some(current.mtime), true);
            }
            SourceChange::Deleted { key } => {
                self.store.write().await.delete_key(&key)?;
            }
            SourceChange::Renamed { old_key, item } => {
                self.store
                    .write()
                    .await
                    .rename_key(&old_key, &item.key, Some(item.mtime))?;
            }
        }
        self.mark_changed().await;
        Ok(())
    }

    /// Read an item's content and derive its value.
    pub(crate) async fn extract(&self, item: &SourceItem) -> Result<T, ExtractionError> {
        let content = self.source.read(item).await?;
        self.extractor.extract_value(&content, item).await
    }

    /// Register a change with both debouncers. The update notification fires
    /// at once on the first change of a burst.
    pub(crate) async fn mark_changed(&mut self) {
        let now = Instant::now();
        if self.notify.trigger(now) {
            self.publish_snapshot().await;
        }
        self.flush.trigger(now);
    }

    pub(crate) async fn publish_snapshot(&self) {
        let snapshot = self.store.read().await.all_entries();
        self.notifier
            .publish(CacheEvent::Updated(Arc::new(snapshot)));
    }

    /// Copy dirty records and pending deletions to the durable store.
    /// On failure the records stay dirty and the flush is re-armed.
    async fn flush_changes(&mut self) -> Result<(), ActorError> {
        let (batch, deletions) = {
            let store = self.store.read().await;
            (store.dirty_batch(), store.pending_deletions())
        };
        if batch.is_empty() && deletions.is_empty() {
            return Ok(());
        }

        let written = batch.len();
        let keys: Vec<String> = batch.keys().cloned().collect();

        if !batch.is_empty() {
            if let Err(e) = self.durable.set_many(batch).await {
                return Err(self.flush_failed(e));
            }
            self.store.write().await.mark_clean(keys.iter());
        }

        if !deletions.is_empty() {
            if let Err(e) = self.durable.remove_many(&deletions).await {
                return Err(self.flush_failed(e));
            }
            self.store.write().await.forget_deletions(&deletions);
        }

        tracing::debug!(
            store = %self.config.name,
            written,
            removed = deletions.len(),
            "flushed cache to durable store"
        );
        self.publish_snapshot().await;
        Ok(())
    }

    fn flush_failed(&mut self, error: PersistenceError) -> ActorError {
        tracing::warn!(
            store = %self.config.name,
            error = %error,
            "flush failed; keeping records dirty for retry"
        );
        self.flush.trigger(Instant::now());
        ActorError::Persistence(error)
    }

    async fn final_flush(&mut self) {
        if let Err(e) = self.flush_changes().await {
            tracing::error!(store = %self.config.name, error = %e, "final flush failed; unsaved changes will be rebuilt from source");
        }
    }

    async fn clear_database(&mut self) -> Result<(), ActorError> {
        self.store.write().await.clear();
        self.flush.reset();
        self.durable.clear().await?;
        self.publish_snapshot().await;
        Ok(())
    }

    async fn drop_database(&mut self) -> Result<(), ActorError> {
        self.store.write().await.clear();
        self.flush.reset();
        self.durable.drop_store().await?;
        tracing::info!(store = %self.config.name, "dropped durable store");
        Ok(())
    }

    async fn reinitialize_database(&mut self) -> Result<ReconcileReport, ActorError> {
        self.drop_database().await?;
        let report = self.rebuild(crate::event::Phase::Initializing, None).await?;
        self.publish_snapshot().await;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemorySource, MemoryStore, TextExtractor, TextValue};
    use std::time::Duration;

    struct Fixture {
        source: Arc<MemorySource>,
        durable: Arc<MemoryStore<TextValue>>,
        extractor: Arc<TextExtractor>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                source: Arc::new(MemorySource::new()),
                durable: Arc::new(MemoryStore::new()),
                extractor: Arc::new(TextExtractor::new()),
            }
        }

        fn spawn(&self, version: u32) -> CacheHandle<TextValue> {
            spawn(
                CacheConfig::new("test-store", version),
                self.source.clone(),
                self.durable.clone(),
                self.extractor.clone(),
            )
        }
    }

    fn text(s: &str) -> TextValue {
        TextValue::new(s)
    }

    #[tokio::test(start_paused = true)]
    async fn store_then_get() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        handle.store_key("a.md", text("alpha"), Some(7)).await.unwrap();

        assert_eq!(handle.get_value("a.md").await, Some(text("alpha")));
        let item = handle.get_item("a.md").await.unwrap();
        assert_eq!(item.mtime, 7);
        assert!(item.dirty);
        assert!(handle.get_value("nope.md").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_twice_returns_key_not_found() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        handle.store_key("a.md", text("alpha"), None).await.unwrap();
        handle.delete_key("a.md").await.unwrap();

        let err = handle.delete_key("a.md").await.unwrap_err();
        assert!(
            matches!(&err, ActorError::Store(StoreError::KeyNotFound(k)) if k == "a.md"),
            "expected KeyNotFound, got: {}",
            err
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rename_moves_value_between_keys() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        handle.store_key("a.md", text("alpha"), Some(1)).await.unwrap();
        handle.rename_key("a.md", "b.md", Some(2)).await.unwrap();

        assert!(handle.get_value("a.md").await.is_none());
        assert_eq!(handle.get_value("b.md").await, Some(text("alpha")));

        let err = handle.rename_key("a.md", "c.md", None).await.unwrap_err();
        assert!(matches!(err, ActorError::Store(StoreError::KeyNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_stores_produces_one_flush() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();
        let baseline = fx.durable.set_many_batches().len();

        for i in 0..25 {
            handle
                .store_key(format!("note-{i}.md"), text("x"), Some(i))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            fx.durable.set_many_batches().len(),
            baseline,
            "no flush inside the window"
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let batches = fx.durable.set_many_batches();
        assert_eq!(batches.len(), baseline + 1, "exactly one flush");
        assert_eq!(batches[baseline], 25, "flush carries every dirty record");
        assert_eq!(fx.durable.stored_count(), 25);

        let store = handle.read_store().await;
        assert_eq!(store.dirty_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn update_notification_fires_on_leading_edge() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();
        // Let any startup notification window close.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut updates = handle.on(EventKind::Updated);
        handle.store_key("a.md", text("alpha"), Some(1)).await.unwrap();

        match updates.try_recv() {
            Some(CacheEvent::Updated(snapshot)) => {
                assert_eq!(snapshot.len(), 1, "first change is reflected at once");
            }
            other => panic!("expected immediate Updated, got {:?}", other.map(|e| e.kind())),
        }

        handle.store_key("b.md", text("beta"), Some(1)).await.unwrap();
        handle.store_key("c.md", text("gamma"), Some(1)).await.unwrap();
        assert!(updates.try_recv().is_none(), "burst is coalesced");

        tokio::time::sleep(Duration::from_millis(150)).await;
        match updates.recv().await {
            Some(CacheEvent::Updated(snapshot)) => assert_eq!(snapshot.len(), 3),
            other => panic!("expected trailing Updated, got {:?}", other.map(|e| e.kind())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_keeps_records_dirty_and_retries() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        fx.durable.set_fail_writes(true);
        handle.store_key("a.md", text("alpha"), Some(1)).await.unwrap();

        let err = handle.flush().await.unwrap_err();
        assert!(matches!(err, ActorError::Persistence(_)));
        assert!(handle.get_item("a.md").await.unwrap().dirty);
        assert_eq!(handle.get_value("a.md").await, Some(text("alpha")));

        fx.durable.set_fail_writes(false);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(!handle.get_item("a.md").await.unwrap().dirty);
        assert_eq!(fx.durable.stored_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deletions_are_flushed_with_writes() {
        let fx = Fixture::new();
        fx.durable.seed(Some(1), vec![("old.md", text("old"), 1)]);
        fx.source.insert("old.md", 1, "old");
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        handle.store_key("new.md", text("new"), Some(2)).await.unwrap();
        handle.delete_key("old.md").await.unwrap();
        handle.flush().await.unwrap();

        assert!(fx.durable.record("old.md").is_none());
        assert!(fx.durable.record("new.md").is_some());
        assert_eq!(fx.durable.remove_batches(), vec![vec!["old.md".to_string()]]);
        assert!(!handle.read_store().await.has_pending_writes());
    }

    #[tokio::test(start_paused = true)]
    async fn source_changes_are_applied_incrementally() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        fx.source.insert("a.md", 10, "");
        handle
            .apply_change(SourceChange::Created {
                item: SourceItem::new("a.md", 10),
            })
            .await
            .unwrap();
        assert_eq!(handle.get_value("a.md").await, Some(TextValue::default()));

        fx.source.insert("a.md", 20, "hello world");
        handle
            .apply_change(SourceChange::Modified {
                item: SourceItem::new("a.md", 20),
            })
            .await
            .unwrap();
        assert_eq!(handle.get_value("a.md").await, Some(text("hello world")));

        fx.source.rename("a.md", "b.md", 30);
        handle
            .apply_change(SourceChange::Renamed {
                old_key: "a.md".to_string(),
                item: SourceItem::new("b.md", 30),
            })
            .await
            .unwrap();
        assert!(handle.get_value("a.md").await.is_none());
        assert_eq!(handle.get_item("b.md").await.unwrap().mtime, 30);

        fx.source.remove("b.md");
        handle
            .apply_change(SourceChange::Deleted {
                key: "b.md".to_string(),
            })
            .await
            .unwrap();
        assert!(handle.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_modify_leaves_previous_value() {
        let fx = Fixture::new();
        fx.source.insert("a.md", 10, "first");
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        fx.source.insert("a.md", 20, "FAIL please");
        let err = handle
            .apply_change(SourceChange::Modified {
                item: SourceItem::new("a.md", 20),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActorError::Extraction(_)));

        let item = handle.get_item("a.md").await.unwrap();
        assert_eq!(item.value, text("first"));
        assert_eq!(item.mtime, 10, "mtime stays stale so the next sync retries");
    }

    #[tokio::test(start_paused = true)]
    async fn late_modify_uses_current_source_state() {
        let fx = Fixture::new();
        fx.source.insert("a.md", 10, "first");
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        // The note changed twice before the first notification arrived.
        fx.source.insert("a.md", 30, "third");
        handle
            .apply_change(SourceChange::Modified {
                item: SourceItem::new("a.md", 20),
            })
            .await
            .unwrap();
        let item = handle.get_item("a.md").await.unwrap();
        assert_eq!(item.value, text("third"));
        assert_eq!(item.mtime, 30);

        // A modify for a note deleted since is ignored until its delete lands.
        fx.source.remove("a.md");
        fx.extractor.reset_calls();
        handle
            .apply_change(SourceChange::Modified {
                item: SourceItem::new("a.md", 40),
            })
            .await
            .unwrap();
        assert_eq!(fx.extractor.calls(), 0);
        assert_eq!(handle.get_item("a.md").await.unwrap().mtime, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn forwarded_changes_apply_in_order() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let forwarder = handle.forward_changes(rx);

        fx.source.insert("a.md", 1, "one");
        tx.send(SourceChange::Created {
            item: SourceItem::new("a.md", 1),
        })
        .await
        .unwrap();
        tx.send(SourceChange::Modified {
            item: SourceItem::new("a.md", 1),
        })
        .await
        .unwrap();
        // Deleting a key that is already gone is logged, not fatal.
        tx.send(SourceChange::Deleted {
            key: "ghost.md".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        forwarder.await.unwrap();

        // A request queued after the forwarded changes observes all of them.
        handle.flush().await.unwrap();
        assert_eq!(handle.get_value("a.md").await, Some(text("one")));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_and_closes_subscriptions() {
        let fx = Fixture::new();
        let handle = fx.spawn(1);
        handle.wait_ready().await.unwrap();
        let mut events = handle.subscribe();

        handle.store_key("a.md", text("alpha"), Some(1)).await.unwrap();
        handle.shutdown().await.unwrap();

        assert!(fx.durable.record("a.md").is_some(), "shutdown flushes");
        while events.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn clear_and_drop_database() {
        let fx = Fixture::new();
        fx.source.insert("a.md", 1, "alpha");
        let handle = fx.spawn(4);
        handle.wait_ready().await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(fx.durable.version(), Some(4));

        handle.clear_database().await.unwrap();
        assert!(handle.is_empty().await);
        assert_eq!(fx.durable.stored_count(), 0);
        assert_eq!(fx.durable.version(), Some(4), "clear keeps the marker");

        handle.drop_database().await.unwrap();
        assert_eq!(fx.durable.version(), None, "drop removes the marker");
    }
}
