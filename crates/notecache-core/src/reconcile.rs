// ABOUTME: Reconciliation between the source collection and the cache: rebuild, sync, migrate.
// ABOUTME: Pure planning (startup decision, sync diff) plus the actor steps that execute a plan.

use std::collections::HashSet;

use serde::Serialize;

use crate::actor::{ActorError, CacheActor};
use crate::event::{CacheEvent, Phase, Progress};
use crate::record::CacheValue;
use crate::source::SourceItem;
use crate::store::CacheStore;

/// Which bulk operation to run when the cache starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupAction {
    /// Schema bumped: wipe everything, rebuild, announce `Migrated`.
    Migrate,
    /// Nothing cached yet: build from scratch, announce `Created`.
    Rebuild,
    /// Trusted cache: only touch what changed.
    Sync,
}

impl StartupAction {
    pub fn phase(&self) -> Phase {
        match self {
            StartupAction::Migrate => Phase::Migrating,
            StartupAction::Rebuild => Phase::Initializing,
            StartupAction::Sync => Phase::Syncing,
        }
    }
}

/// Pick the startup action. A missing or newer persisted version is treated
/// as equal to the configured one.
pub fn decide_startup(persisted: Option<u32>, configured: u32, is_empty: bool) -> StartupAction {
    let outdated = persisted.is_some_and(|v| v < configured);
    if outdated && !is_empty {
        StartupAction::Migrate
    } else if is_empty {
        StartupAction::Rebuild
    } else {
        StartupAction::Sync
    }
}

/// The version marker to write after reconciling. Never downgrades.
pub fn marker_to_persist(persisted: Option<u32>, configured: u32) -> u32 {
    persisted.map_or(configured, |v| v.max(configured))
}

/// Difference between the cache and the source collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Cached keys whose source item is gone.
    pub orphans: Vec<String>,
    /// Source items with no cached record or an older cached mtime.
    pub stale: Vec<SourceItem>,
    /// Items already up to date.
    pub fresh: usize,
}

pub fn plan_sync<T: Clone>(store: &CacheStore<T>, items: &[SourceItem]) -> SyncPlan {
    let source_keys: HashSet<&str> = items.iter().map(|i| i.key.as_str()).collect();

    let mut orphans: Vec<String> = store
        .all_keys()
        .into_iter()
        .filter(|k| !source_keys.contains(k.as_str()))
        .collect();
    orphans.sort();

    let mut plan = SyncPlan {
        orphans,
        ..SyncPlan::default()
    };
    for item in items {
        match store.mtime(&item.key) {
            Some(cached) if cached >= item.mtime => plan.fresh += 1,
            _ => plan.stale.push(item.clone()),
        }
    }
    plan
}

/// Outcome counters of a rebuild or sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub extracted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub removed: usize,
}

impl<T: CacheValue> CacheActor<T> {
    /// Load durable records, then run the startup action.
    pub(crate) async fn initialize(&mut self) {
        let name = self.config.name.clone();

        let persisted = match self.durable.version_marker().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(store = %name, error = %e, "could not read version marker");
                None
            }
        };

        match self.durable.get_all().await {
            Ok(stored) => {
                let extractor = self.extractor.clone();
                let count = stored.len();
                self.store
                    .write()
                    .await
                    .load(stored, |v| extractor.load_value(v));
                tracing::info!(store = %name, records = count, "loaded cache from durable store");
            }
            Err(e) => {
                tracing::warn!(store = %name, error = %e, "could not load durable records, starting empty");
            }
        }
        // Stale-but-available data is better than nothing while reconciling.
        self.publish_snapshot().await;

        let is_empty = self.store.read().await.is_empty();
        let action = decide_startup(persisted, self.config.version, is_empty);
        tracing::info!(
            store = %name,
            ?action,
            persisted = ?persisted,
            configured = self.config.version,
            "{} {} database",
            action.phase(),
            self.config.title
        );

        let result = match action {
            StartupAction::Migrate => self.migrate(persisted).await,
            StartupAction::Rebuild => {
                let report = self.rebuild(Phase::Initializing, persisted).await;
                if report.is_ok() {
                    self.notifier.publish(CacheEvent::Created);
                }
                report
            }
            StartupAction::Sync => self.sync(persisted).await,
        };

        match result {
            Ok(report) => tracing::info!(
                store = %name,
                extracted = report.extracted,
                failed = report.failed,
                skipped = report.skipped,
                removed = report.removed,
                "reconciliation finished"
            ),
            Err(e) => tracing::error!(
                store = %name,
                error = %e,
                "reconciliation failed; serving the cache as loaded"
            ),
        }
    }

    /// Wipe memory and durable records, rebuild, announce the migration.
    pub(crate) async fn migrate(
        &mut self,
        persisted: Option<u32>,
    ) -> Result<ReconcileReport, ActorError> {
        match self.durable.clear().await {
            Ok(()) => self.store.write().await.clear(),
            Err(e) => {
                // Old-schema rows must not outlive the migration. Deleting each
                // key queues it for the flush; re-extracted keys cancel theirs.
                tracing::warn!(
                    store = %self.config.name,
                    error = %e,
                    "could not clear durable store before migration; deleting records individually"
                );
                {
                    let mut store = self.store.write().await;
                    for key in store.all_keys() {
                        store.delete_key(&key)?;
                    }
                }
                self.mark_changed().await;
            }
        }
        let report = self.rebuild(Phase::Migrating, persisted).await?;
        self.notifier.publish(CacheEvent::Migrated);
        Ok(report)
    }

    /// Extract every source item, then persist the version marker.
    pub(crate) async fn rebuild(
        &mut self,
        phase: Phase,
        persisted: Option<u32>,
    ) -> Result<ReconcileReport, ActorError> {
        let items = self.source.list().await?;
        let report = self.extract_items(phase, &items).await;
        self.persist_version(persisted).await;
        Ok(report)
    }

    /// Remove orphans, re-extract stale items, then persist the version marker.
    pub(crate) async fn sync(
        &mut self,
        persisted: Option<u32>,
    ) -> Result<ReconcileReport, ActorError> {
        let items = self.source.list().await?;
        let plan = {
            let store = self.store.read().await;
            plan_sync(&store, &items)
        };

        if !plan.orphans.is_empty() {
            {
                let mut store = self.store.write().await;
                for key in &plan.orphans {
                    store.delete_key(key)?;
                }
            }
            self.mark_changed().await;
        }

        let mut report = self.extract_items(Phase::Syncing, &plan.stale).await;
        report.skipped = plan.fresh;
        report.removed = plan.orphans.len();
        self.persist_version(persisted).await;
        Ok(report)
    }

    /// Extract and store each item. Failures are logged and leave the key as
    /// it was, so the next sync sees it as stale again.
    async fn extract_items(&mut self, phase: Phase, items: &[SourceItem]) -> ReconcileReport {
        let total = items.len();
        let mut report = ReconcileReport::default();
        self.publish_progress(phase, 0, total);

        for (i, item) in items.iter().enumerate() {
            match self.extract(item).await {
                Ok(value) => {
                    self.store
                        .write()
                        .await
                        .store_key(&item.key, value, Some(item.mtime), true);
                    self.mark_changed().await;
                    report.extracted += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        store = %self.config.name,
                        key = %item.key,
                        error = %e,
                        "extraction failed; will retry on next sync"
                    );
                    report.failed += 1;
                }
            }
            self.publish_progress(phase, i + 1, total);
        }

        report
    }

    fn publish_progress(&self, phase: Phase, processed: usize, total: usize) {
        self.notifier.publish(CacheEvent::Progress(Progress {
            phase,
            processed,
            total,
        }));
    }

    async fn persist_version(&self, persisted: Option<u32>) {
        let version = marker_to_persist(persisted, self.config.version);
        if let Err(e) = self.durable.set_version_marker(version).await {
            tracing::warn!(store = %self.config.name, version, error = %e, "could not persist version marker");
        }
    }
}
