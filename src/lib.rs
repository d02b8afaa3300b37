// ABOUTME: Library side of the notecache binary: configuration, the note value, and app wiring.
// ABOUTME: Kept separate from main so integration tests can drive the same code paths.

pub mod app;
pub mod config;
pub mod note;

pub use app::{App, AppError, Stats};
pub use config::{ConfigError, NotecacheConfig};
pub use note::{NoteEntry, NoteExtractor};
