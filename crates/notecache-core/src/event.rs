// ABOUTME: Events the cache announces to consumers: lifecycle transitions and snapshots.
// ABOUTME: Includes progress reporting for long-running rebuild and sync passes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::record::Entry;

/// Which bulk operation is running, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Initializing,
    Syncing,
    Migrating,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Initializing => "Initializing",
            Phase::Syncing => "Syncing",
            Phase::Migrating => "Migrating",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Incremental progress of a rebuild or sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: Phase,
    pub processed: usize,
    pub total: usize,
}

/// Something that happened to the cache.
#[derive(Debug, Clone)]
pub enum CacheEvent<T> {
    /// The store was built for the first time.
    Created,
    /// The store was wiped and rebuilt after a schema version bump.
    Migrated,
    /// Full snapshot after a change burst or a flush.
    Updated(Arc<Vec<Entry<T>>>),
    Progress(Progress),
    /// Initial reconciliation finished; incremental changes are being applied.
    Ready,
}

/// Discriminant of a CacheEvent, used to subscribe to a single event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Migrated,
    Updated,
    Progress,
    Ready,
}

impl<T> CacheEvent<T> {
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Created => EventKind::Created,
            CacheEvent::Migrated => EventKind::Migrated,
            CacheEvent::Updated(_) => EventKind::Updated,
            CacheEvent::Progress(_) => EventKind::Progress,
            CacheEvent::Ready => EventKind::Ready,
        }
    }
}

impl EventKind {
    /// Stable wire name, used in logs and by consumers keyed on strings.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Created => "database-create",
            EventKind::Migrated => "database-migrate",
            EventKind::Updated => "database-update",
            EventKind::Progress => "database-progress",
            EventKind::Ready => "database-ready",
        }
    }
}
