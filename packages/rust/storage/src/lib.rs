//! Local durable storage for the harvest pipeline.
//!
//! Everything for one (category, query) lives in one directory:
//!
//! ```text
//! <data_dir>/<category>/<query>/
//! ├── 0.html, 1.html, ...   raw items, one file per item block
//! ├── <query>.csv           normalized record set
//! └── <query>.cursor        publish cursor (a single integer)
//! ```
//!
//! **Access rules:**
//! - raw items: append-only; each fetch run adds after the highest index,
//!   read by the parse stage
//! - record set: single writer (parse), single reader (publish)
//! - cursor: single reader-writer (publish); every update replaces the file
//!   atomically

mod cursor;
mod raw;
mod records;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use quizharvest_shared::{HarvestError, Result};

pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
pub use raw::{RAW_ITEM_EXTENSION, RawItemLog, list_raw_items, read_raw_item, write_raw_item};
pub use records::{read_record_set, write_record_set};

/// Paths of every artifact belonging to one (category, query).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPaths {
    /// Directory holding raw items and the other artifacts.
    pub dir: PathBuf,
    /// `<query>.csv`
    pub record_set: PathBuf,
    /// `<query>.cursor`
    pub cursor: PathBuf,
}

/// Root handle for the on-disk layout.
#[derive(Debug, Clone)]
pub struct HarvestStore {
    root: PathBuf,
}

impl HarvestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact paths for one (category, query).
    pub fn unit(&self, category: &str, query: &str) -> UnitPaths {
        let dir = self.root.join(category).join(query);
        UnitPaths {
            record_set: dir.join(format!("{query}.csv")),
            cursor: dir.join(format!("{query}.cursor")),
            dir,
        }
    }

    /// Like [`unit`](Self::unit), creating the directory if needed.
    pub fn ensure_unit(&self, category: &str, query: &str) -> Result<UnitPaths> {
        let paths = self.unit(category, query);
        fs::create_dir_all(&paths.dir).map_err(|e| HarvestError::io(&paths.dir, e))?;
        Ok(paths)
    }
}

/// Replace `path` with `bytes` so readers see the old or the new content,
/// never a mix.
///
/// Writes a sibling temp file, syncs it, renames it over the target, then
/// syncs the directory so the rename itself survives a power loss.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| HarvestError::Storage(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp).map_err(|e| HarvestError::io(&tmp, e))?;
        file.write_all(bytes).map_err(|e| HarvestError::io(&tmp, e))?;
        file.sync_all().map_err(|e| HarvestError::io(&tmp, e))?;
    }

    fs::rename(&tmp, path).map_err(|e| HarvestError::io(path, e))?;
    sync_dir(dir)
}

/// Flush a directory entry update (a rename) to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| HarvestError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("qh-{label}-{}", uuid::Uuid::now_v7()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_layout() {
        let store = HarvestStore::new("/data");
        let paths = store.unit("aptitude", "problems-on-trains");
        assert_eq!(paths.dir, PathBuf::from("/data/aptitude/problems-on-trains"));
        assert_eq!(
            paths.record_set,
            PathBuf::from("/data/aptitude/problems-on-trains/problems-on-trains.csv")
        );
        assert_eq!(
            paths.cursor,
            PathBuf::from("/data/aptitude/problems-on-trains/problems-on-trains.cursor")
        );
    }

    #[test]
    fn ensure_unit_creates_directory() {
        let root = test_dir("store");
        let store = HarvestStore::new(&root);
        let paths = store.ensure_unit("aptitude", "ages").expect("ensure unit");
        assert!(paths.dir.is_dir());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn atomic_write_replaces_content() {
        let root = test_dir("atomic");
        let target = root.join("value.txt");

        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(&root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        std::fs::remove_dir_all(&root).ok();
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_syncs_parent_directory() {
        let root = test_dir("atomic-sync");
        write_atomic(&root.join("nested").join("value.txt"), b"1").unwrap();
        sync_dir(&root.join("nested")).unwrap();

        let err = sync_dir(&root.join("missing")).unwrap_err();
        assert!(matches!(err, HarvestError::Io { .. }));
        std::fs::remove_dir_all(&root).ok();
    }
}
