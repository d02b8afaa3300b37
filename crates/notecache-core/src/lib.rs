// ABOUTME: Core library for notecache: a versioned, incrementally synced document cache.
// ABOUTME: Exports the store, reconciliation, write-back actor, events, and backend seams.

pub mod actor;
pub mod config;
pub mod debounce;
pub mod durable;
pub mod event;
pub mod extract;
pub mod notifier;
pub mod reconcile;
pub mod record;
pub mod source;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use actor::{ActorError, CacheHandle, spawn, spawn_with_notifier};
pub use config::CacheConfig;
pub use durable::{DurableStore, PersistenceError};
pub use event::{CacheEvent, EventKind, Phase, Progress};
pub use extract::{ExtractionError, ValueExtractor};
pub use notifier::{EventNotifier, Subscription};
pub use reconcile::{ReconcileReport, StartupAction};
pub use record::{CacheValue, Entry, Record, StoredRecord};
pub use source::{SourceChange, SourceCollection, SourceError, SourceItem};
pub use store::{CacheStore, StoreError};
