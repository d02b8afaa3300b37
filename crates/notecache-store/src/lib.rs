// ABOUTME: Concrete backends for notecache: a SQLite durable store and a markdown vault source.
// ABOUTME: Both plug into the core through the DurableStore and SourceCollection traits.

pub mod sqlite;
pub mod vault;

pub use sqlite::{SqliteError, SqliteStore};
pub use vault::VaultSource;
