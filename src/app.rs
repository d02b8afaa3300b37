// ABOUTME: Wires the note render store together: SQLite durable store, vault source, note extractor.
// ABOUTME: Owns the running cache handle and answers the binary's status queries.

use std::sync::Arc;

use notecache_core::actor::{ActorError, CacheHandle, spawn_with_notifier};
use notecache_core::notifier::EventNotifier;
use notecache_store::{SqliteError, SqliteStore, VaultSource};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, NotecacheConfig, STORE_NAME};
use crate::note::{NoteEntry, NoteExtractor};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] SqliteError),

    #[error("cache error: {0}")]
    Cache(#[from] ActorError),
}

/// Point-in-time view of the cache and its durable store.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub name: String,
    pub schema_version: u32,
    pub persisted_version: Option<u32>,
    pub entries: usize,
    pub dirty: usize,
    pub pending_deletions: usize,
    pub durable_records: usize,
}

/// A running render store.
pub struct App {
    pub config: NotecacheConfig,
    pub cache: CacheHandle<NoteEntry>,
    durable: Arc<SqliteStore<NoteEntry>>,
}

impl App {
    /// Open the durable store and start the cache. Reconciliation runs in the
    /// background; use `cache.wait_ready()` to wait for it.
    pub fn open(config: NotecacheConfig) -> Result<Self, AppError> {
        let notifier = Self::notifier(&config);
        Self::open_with(config, notifier)
    }

    /// A notifier sized for this configuration. Subscribe to it before
    /// `open_with` to observe reconciliation from its first event.
    pub fn notifier(config: &NotecacheConfig) -> EventNotifier<NoteEntry> {
        EventNotifier::new(config.cache_config().event_buffer)
    }

    pub fn open_with(
        config: NotecacheConfig,
        notifier: EventNotifier<NoteEntry>,
    ) -> Result<Self, AppError> {
        let vault = VaultSource::new(config.vault()?);
        let durable = Arc::new(SqliteStore::open(&config.home, STORE_NAME)?);
        tracing::info!(
            home = %config.home.display(),
            vault = %vault.root().display(),
            version = config.schema_version,
            "opening render store"
        );

        let cache = spawn_with_notifier(
            config.cache_config(),
            Arc::new(vault),
            durable.clone(),
            Arc::new(NoteExtractor),
            notifier,
        );
        Ok(Self {
            config,
            cache,
            durable,
        })
    }

    pub async fn stats(&self) -> Result<Stats, AppError> {
        let (entries, dirty, pending_deletions) = {
            let store = self.cache.read_store().await;
            (
                store.len(),
                store.dirty_count(),
                store.pending_deletions().len(),
            )
        };
        Ok(Stats {
            name: self.cache.name().to_string(),
            schema_version: self.config.schema_version,
            persisted_version: self.durable.read_version()?,
            entries,
            dirty,
            pending_deletions,
            durable_records: self.durable.record_count()?,
        })
    }

    /// Flush outstanding writes and stop the cache.
    pub async fn shutdown(self) -> Result<(), AppError> {
        self.cache.shutdown().await?;
        Ok(())
    }
}
