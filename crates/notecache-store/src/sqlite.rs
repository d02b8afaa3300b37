// ABOUTME: SQLite-backed durable store holding one logical cache per database file.
// ABOUTME: Records are stored as JSON with their mtime; the schema version lives in a meta table.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use notecache_core::durable::{DurableStore, PersistenceError};
use notecache_core::record::{CacheValue, StoredRecord};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Errors that can occur during SQLite store operations.
#[derive(Debug, Error)]
pub enum SqliteError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection lock poisoned")]
    Poisoned,
}

impl From<SqliteError> for PersistenceError {
    fn from(e: SqliteError) -> Self {
        match e {
            SqliteError::Json(e) => PersistenceError::Serialization(e),
            other => PersistenceError::Backend(Box::new(other)),
        }
    }
}

/// A durable store for one named cache, persisted at `<home>/<name>.db`.
pub struct SqliteStore<T> {
    conn: Mutex<Connection>,
    path: PathBuf,
    version_key: String,
    _value: PhantomData<fn() -> T>,
}

impl<T: CacheValue> SqliteStore<T> {
    /// Open or create the database for `name` inside `home`.
    pub fn open(home: &Path, name: &str) -> Result<Self, SqliteError> {
        std::fs::create_dir_all(home)?;
        Self::open_path(&home.join(format!("{name}.db")), name)
    }

    /// Open or create a database at an explicit path.
    pub fn open_path(path: &Path, name: &str) -> Result<Self, SqliteError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::create_schema(&conn)?;

        tracing::debug!(path = %path.display(), store = name, "opened sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            version_key: format!("{name}-version"),
            _value: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_schema(conn: &Connection) -> Result<(), SqliteError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                mtime INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SqliteError> {
        self.conn.lock().map_err(|_| SqliteError::Poisoned)
    }

    /// Read every record. Rows whose value no longer deserializes are
    /// skipped; the next sync treats them as missing and re-extracts them.
    pub fn load_all(&self) -> Result<HashMap<String, StoredRecord<T>>, SqliteError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value, mtime FROM records")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut records = HashMap::new();
        for row in rows {
            let (key, json, mtime) = row?;
            match serde_json::from_str::<T>(&json) {
                Ok(value) => {
                    records.insert(key, StoredRecord { value, mtime });
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping undecodable record");
                }
            }
        }
        Ok(records)
    }

    /// Upsert a batch of records in one transaction.
    pub fn write_batch(&self, records: &HashMap<String, StoredRecord<T>>) -> Result<(), SqliteError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (key, value, mtime) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    mtime = excluded.mtime",
            )?;
            for (key, record) in records {
                let json = serde_json::to_string(&record.value)?;
                stmt.execute(params![key, json, record.mtime])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete a batch of keys in one transaction. Missing keys are ignored.
    pub fn delete_batch(&self, keys: &[String]) -> Result<(), SqliteError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM records WHERE key = ?1")?;
            for key in keys {
                stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clear_records(&self) -> Result<(), SqliteError> {
        self.conn()?.execute("DELETE FROM records", [])?;
        Ok(())
    }

    /// Remove every record and the version marker. The schema stays so the
    /// store can be reused right away.
    pub fn drop_all(&self) -> Result<(), SqliteError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        tx.execute("DELETE FROM meta WHERE key = ?1", params![self.version_key])?;
        tx.commit()?;
        Ok(())
    }

    pub fn record_count(&self) -> Result<usize, SqliteError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Read the schema version marker. An unparsable value counts as absent.
    pub fn read_version(&self) -> Result<Option<u32>, SqliteError> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![self.version_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse::<u32>().ok()))
    }

    pub fn write_version(&self, version: u32) -> Result<(), SqliteError> {
        self.conn()?.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![self.version_key, version.to_string()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl<T: CacheValue> DurableStore<T> for SqliteStore<T> {
    async fn get_all(&self) -> Result<HashMap<String, StoredRecord<T>>, PersistenceError> {
        Ok(self.load_all()?)
    }

    async fn set_many(
        &self,
        records: HashMap<String, StoredRecord<T>>,
    ) -> Result<(), PersistenceError> {
        Ok(self.write_batch(&records)?)
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), PersistenceError> {
        Ok(self.delete_batch(keys)?)
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        Ok(self.clear_records()?)
    }

    async fn drop_store(&self) -> Result<(), PersistenceError> {
        Ok(self.drop_all()?)
    }

    async fn count(&self) -> Result<usize, PersistenceError> {
        Ok(self.record_count()?)
    }

    async fn version_marker(&self) -> Result<Option<u32>, PersistenceError> {
        Ok(self.read_version()?)
    }

    async fn set_version_marker(&self, version: u32) -> Result<(), PersistenceError> {
        Ok(self.write_version(version)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notecache_core::testing::TextValue;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> SqliteStore<TextValue> {
        SqliteStore::open(dir.path(), "notes").unwrap()
    }

    fn batch(entries: &[(&str, &str, i64)]) -> HashMap<String, StoredRecord<TextValue>> {
        entries
            .iter()
            .map(|(k, text, mtime)| {
                (
                    k.to_string(),
                    StoredRecord {
                        value: TextValue::new(text),
                        mtime: *mtime,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn sqlite_open_creates_named_file() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert_eq!(store.path(), dir.path().join("notes.db").as_path());
        assert!(store.path().exists());
        assert_eq!(store.record_count().unwrap(), 0);
        assert_eq!(store.read_version().unwrap(), None);
    }

    #[test]
    fn sqlite_write_batch_upserts() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store
            .write_batch(&batch(&[("a.md", "alpha", 1), ("b.md", "beta", 2)]))
            .unwrap();
        store.write_batch(&batch(&[("a.md", "alpha two", 5)])).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a.md"].value, TextValue::new("alpha two"));
        assert_eq!(all["a.md"].mtime, 5);
        assert_eq!(all["b.md"].mtime, 2);
    }

    #[test]
    fn sqlite_delete_batch_ignores_missing_keys() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store
            .write_batch(&batch(&[("a.md", "alpha", 1), ("b.md", "beta", 2)]))
            .unwrap();

        store
            .delete_batch(&["a.md".to_string(), "never.md".to_string()])
            .unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("b.md"));
    }

    #[test]
    fn sqlite_clear_keeps_marker_drop_removes_it() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.write_batch(&batch(&[("a.md", "alpha", 1)])).unwrap();
        store.write_version(3).unwrap();

        store.clear_records().unwrap();
        assert_eq!(store.record_count().unwrap(), 0);
        assert_eq!(store.read_version().unwrap(), Some(3));

        store.write_batch(&batch(&[("a.md", "alpha", 1)])).unwrap();
        store.drop_all().unwrap();
        assert_eq!(store.record_count().unwrap(), 0);
        assert_eq!(store.read_version().unwrap(), None);

        // Still usable after a drop.
        store.write_version(4).unwrap();
        assert_eq!(store.read_version().unwrap(), Some(4));
    }

    #[test]
    fn sqlite_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.write_batch(&batch(&[("a.md", "alpha", 1)])).unwrap();
            store.write_version(2).unwrap();
        }

        let store = open(&dir);
        assert_eq!(store.read_version().unwrap(), Some(2));
        assert_eq!(store.load_all().unwrap()["a.md"].value, TextValue::new("alpha"));
    }

    #[test]
    fn sqlite_stores_are_isolated_by_name() {
        let dir = TempDir::new().unwrap();
        let notes: SqliteStore<TextValue> = SqliteStore::open(dir.path(), "notes").unwrap();
        let other: SqliteStore<TextValue> = SqliteStore::open(dir.path(), "other").unwrap();

        notes.write_version(1).unwrap();
        notes.write_batch(&batch(&[("a.md", "alpha", 1)])).unwrap();

        assert_eq!(other.read_version().unwrap(), None);
        assert_eq!(other.record_count().unwrap(), 0);
    }

    #[test]
    fn sqlite_skips_undecodable_rows() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.write_batch(&batch(&[("good.md", "fine", 1)])).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO records (key, value, mtime) VALUES ('bad.md', 'not json', 1)",
                [],
            )
            .unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("good.md"));
    }

    #[tokio::test]
    async fn sqlite_trait_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let durable: &dyn DurableStore<TextValue> = &store;

        durable
            .set_many(batch(&[("a.md", "alpha", 1), ("b.md", "beta", 2)]))
            .await
            .unwrap();
        durable.remove_many(&["b.md".to_string()]).await.unwrap();
        durable.set_version_marker(7).await.unwrap();

        assert_eq!(durable.count().await.unwrap(), 1);
        assert_eq!(durable.version_marker().await.unwrap(), Some(7));
        let all = durable.get_all().await.unwrap();
        assert_eq!(all["a.md"].value, TextValue::new("alpha"));
    }
}
