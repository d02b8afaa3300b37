// ABOUTME: Filesystem source collection: the markdown files under a vault directory.
// ABOUTME: Keys are slash-separated paths relative to the vault root; mtimes are in milliseconds.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notecache_core::source::{SourceCollection, SourceError, SourceItem};

const NOTE_EXTENSION: &str = "md";

/// A directory of markdown notes. Hidden files and directories are skipped.
#[derive(Debug, Clone)]
pub struct VaultSource {
    root: PathBuf,
}

impl VaultSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a key. Keys that would escape the root are rejected.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(SourceError::NotFound(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Every note under the root, sorted by key.
    pub fn scan(&self) -> Result<Vec<SourceItem>, SourceError> {
        let mut items = Vec::new();
        if !self.root.is_dir() {
            return Err(SourceError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("vault directory {} does not exist", self.root.display()),
            )));
        }
        walk(&self.root, &self.root, &mut items)?;
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Collect the notes under `dir`. Only failing to read `dir` itself is an
/// error; entries that vanish or cannot be read mid-walk are skipped.
fn walk(root: &Path, dir: &Path, items: &mut Vec<SourceItem>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable vault entry");
                continue;
            }
        };
        let name = entry.file_name();
        if is_hidden(&name.to_string_lossy()) {
            continue;
        }

        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable vault entry");
                continue;
            }
        };
        if file_type.is_dir() {
            if let Err(e) = walk(root, &path, items) {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable vault directory");
            }
        } else if file_type.is_file()
            && path.extension().is_some_and(|ext| ext == NOTE_EXTENSION)
        {
            if let Some(item) = note_item(root, &path) {
                items.push(item);
            }
        }
    }
    Ok(())
}

/// Stat one note. Notes deleted since the directory was read are skipped.
fn note_item(root: &Path, path: &Path) -> Option<SourceItem> {
    let Some(key) = key_for(root, path) else {
        tracing::warn!(path = %path.display(), "skipping note with non-utf8 path");
        return None;
    };
    match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => Some(SourceItem::new(key, mtime_millis(modified))),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping note that could not be read");
            None
        }
    }
}

fn key_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    parts.map(|p| p.join("/"))
}

fn mtime_millis(modified: SystemTime) -> i64 {
    DateTime::<Utc>::from(modified).timestamp_millis()
}

#[async_trait]
impl SourceCollection for VaultSource {
    async fn list(&self) -> Result<Vec<SourceItem>, SourceError> {
        let vault = self.clone();
        tokio::task::spawn_blocking(move || vault.scan())
            .await
            .map_err(|e| SourceError::Io(io::Error::other(e)))?
    }

    async fn item(&self, key: &str) -> Result<Option<SourceItem>, SourceError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                Ok(Some(SourceItem::new(key, mtime_millis(meta.modified()?))))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, item: &SourceItem) -> Result<String, SourceError> {
        let path = self.path_for(&item.key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(item.key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn list_finds_markdown_recursively() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "top.md", "# top");
        write(dir.path(), "daily/2024-01-01.md", "entry");
        write(dir.path(), "daily/deep/nested.md", "nested");
        write(dir.path(), "image.png", "not a note");
        write(dir.path(), "notes.txt", "not a note either");

        let vault = VaultSource::new(dir.path());
        let keys: Vec<String> = vault.list().await.unwrap().into_iter().map(|i| i.key).collect();

        assert_eq!(
            keys,
            vec!["daily/2024-01-01.md", "daily/deep/nested.md", "top.md"]
        );
    }

    #[tokio::test]
    async fn list_skips_hidden_entries() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "visible.md", "yes");
        write(dir.path(), ".obsidian/workspace.md", "no");
        write(dir.path(), ".draft.md", "no");

        let vault = VaultSource::new(dir.path());
        let items = vault.list().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "visible.md");
    }

    #[test]
    fn vanished_note_is_skipped() {
        let dir = TempDir::new().unwrap();
        assert!(note_item(dir.path(), &dir.path().join("gone.md")).is_none());

        write(dir.path(), "here.md", "still here");
        let item = note_item(dir.path(), &dir.path().join("here.md")).unwrap();
        assert_eq!(item.key, "here.md");
    }

    #[test]
    fn vanished_directory_is_an_error_only_at_the_root() {
        let dir = TempDir::new().unwrap();
        let mut items = Vec::new();
        assert!(walk(dir.path(), &dir.path().join("gone"), &mut items).is_err());
        assert!(items.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_subdirectory_does_not_fail_the_scan() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "top.md", "# top");
        write(dir.path(), "locked/inner.md", "secret");
        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let vault = VaultSource::new(dir.path());
        let result = vault.list().await;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let keys: Vec<String> = result.unwrap().into_iter().map(|i| i.key).collect();
        assert!(keys.contains(&"top.md".to_string()));
    }

    #[tokio::test]
    async fn list_fails_for_missing_root() {
        let dir = TempDir::new().unwrap();
        let vault = VaultSource::new(dir.path().join("nope"));
        assert!(matches!(vault.list().await, Err(SourceError::Io(_))));
    }

    #[tokio::test]
    async fn item_and_read_agree_with_list() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "sub/a.md", "hello");

        let vault = VaultSource::new(dir.path());
        let listed = vault.list().await.unwrap();
        let item = vault.item("sub/a.md").await.unwrap().unwrap();

        assert_eq!(listed, vec![item.clone()]);
        assert!(item.mtime > 0);
        assert_eq!(vault.read(&item).await.unwrap(), "hello");
        assert!(vault.item("missing.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let vault = VaultSource::new(dir.path());
        let err = vault
            .read(&SourceItem::new("gone.md", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(k) if k == "gone.md"));
    }

    #[test]
    fn keys_cannot_escape_the_root() {
        let vault = VaultSource::new("/vault");
        assert!(vault.path_for("../etc/passwd.md").is_err());
        assert!(vault.path_for("/etc/passwd.md").is_err());
        assert_eq!(
            vault.path_for("a/b.md").unwrap(),
            PathBuf::from("/vault/a/b.md")
        );
    }
}
