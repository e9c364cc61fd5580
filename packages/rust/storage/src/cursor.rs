//! Publish cursor persistence.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use quizharvest_shared::{HarvestError, PublishCursor, Result};

use crate::write_atomic;

/// Read-modify-write access to one persisted [`PublishCursor`].
///
/// `store` must be atomic: after a crash, `load` returns either the previous
/// or the new value.
pub trait CursorStore: Send + Sync {
    /// The persisted cursor, or [`PublishCursor::START`] if none exists.
    fn load(&self) -> Result<PublishCursor>;

    /// Replace the persisted cursor.
    fn store(&self, cursor: PublishCursor) -> Result<()>;
}

/// Cursor kept as a single integer in a text file.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<PublishCursor> {
        match fs::read_to_string(&self.path) {
            Ok(text) => {
                let cursor = text.parse::<PublishCursor>().map_err(|e| {
                    HarvestError::Storage(format!("{}: {e}", self.path.display()))
                })?;
                debug!(path = %self.path.display(), %cursor, "cursor loaded");
                Ok(cursor)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PublishCursor::START),
            Err(e) => Err(HarvestError::io(&self.path, e)),
        }
    }

    fn store(&self, cursor: PublishCursor) -> Result<()> {
        write_atomic(&self.path, cursor.to_string().as_bytes())
    }
}

/// In-process cursor, for runs that must not touch the filesystem.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    value: Mutex<Option<PublishCursor>>,
}

impl MemoryCursorStore {
    pub fn new(initial: Option<PublishCursor>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<PublishCursor> {
        let value = self
            .value
            .lock()
            .map_err(|_| HarvestError::Storage("cursor lock poisoned".into()))?;
        Ok(value.unwrap_or(PublishCursor::START))
    }

    fn store(&self, cursor: PublishCursor) -> Result<()> {
        let mut value = self
            .value
            .lock()
            .map_err(|_| HarvestError::Storage("cursor lock poisoned".into()))?;
        *value = Some(cursor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_dir;

    #[test]
    fn absent_cursor_defaults_to_start() {
        let store = FileCursorStore::new(test_dir("cursor-absent").join("q.cursor"));
        assert_eq!(store.load().unwrap(), PublishCursor::START);
    }

    #[test]
    fn file_cursor_roundtrip() {
        let dir = test_dir("cursor");
        let store = FileCursorStore::new(dir.join("q.cursor"));

        store.store(PublishCursor::new(3)).unwrap();
        assert_eq!(store.load().unwrap().published(), 3);

        store.store(PublishCursor::new(4)).unwrap();
        assert_eq!(store.load().unwrap().published(), 4);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "4");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reads_cursor_with_trailing_newline() {
        let dir = test_dir("cursor-newline");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("q.cursor");
        std::fs::write(&path, "12\n").unwrap();

        assert_eq!(FileCursorStore::new(&path).load().unwrap().published(), 12);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_cursor_is_a_storage_error() {
        let dir = test_dir("cursor-corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("q.cursor");
        std::fs::write(&path, "twelve").unwrap();

        let err = FileCursorStore::new(&path).load().unwrap_err();
        assert!(matches!(err, HarvestError::Storage(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn memory_cursor() {
        let store = MemoryCursorStore::new(Some(PublishCursor::new(2)));
        assert_eq!(store.load().unwrap().published(), 2);
        store.store(PublishCursor::new(5)).unwrap();
        assert_eq!(store.load().unwrap().published(), 5);
        assert_eq!(MemoryCursorStore::default().load().unwrap(), PublishCursor::START);
    }
}
