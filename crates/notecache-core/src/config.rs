// ABOUTME: Construction parameters for a cache instance.
// ABOUTME: Names the store, pins its schema version, and tunes the write-back periods.

use std::time::Duration;

/// Configuration for one cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Logical store name; keys the durable store and its version marker.
    pub name: String,
    /// Human-readable title used in progress messages.
    pub title: String,
    /// Schema version of the cached values. Bumping it forces a migration.
    pub version: u32,
    pub description: String,
    /// Debounce period of the leading-edge update notification.
    pub notify_period: Duration,
    /// Debounce period of the trailing-edge durable flush.
    pub flush_period: Duration,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            version,
            description: String::new(),
            notify_period: Duration::from_millis(100),
            flush_period: Duration::from_millis(1000),
            command_buffer: 64,
            event_buffer: 256,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_notify_period(mut self, period: Duration) -> Self {
        self.notify_period = period;
        self
    }

    pub fn with_flush_period(mut self, period: Duration) -> Self {
        self.flush_period = period;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Key under which the schema version is stored.
    pub fn version_key(&self) -> String {
        format!("{}-version", self.name)
    }
}
