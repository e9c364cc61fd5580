//! Raw item files: `<sequence_index>.html` under the unit directory.
//!
//! The raw set of a unit only grows. A fetch run continues numbering after
//! the highest existing index and never rewrites an existing file, so the
//! position of every record derived from earlier runs stays put.

use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use quizharvest_shared::{HarvestError, RawItem, Result};

/// File extension of persisted raw items.
pub const RAW_ITEM_EXTENSION: &str = "html";

/// Persist one item block as `<dir>/<sequence_index>.html`.
///
/// Fails if that index is already taken.
pub fn write_raw_item(dir: &Path, sequence_index: u64, content: &str) -> Result<RawItem> {
    let path = dir.join(format!("{sequence_index}.{RAW_ITEM_EXTENSION}"));
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => HarvestError::Storage(format!(
                "raw item {} already exists",
                path.display()
            )),
            _ => HarvestError::io(&path, e),
        })?;
    file.write_all(content.as_bytes())
        .map_err(|e| HarvestError::io(&path, e))?;

    Ok(RawItem {
        source_path: path,
        sequence_index,
        content: content.to_string(),
    })
}

/// Every raw item file in `dir`, ordered by sequence index.
///
/// Files that are not `<number>.html` (the record set, the cursor, stray
/// files) are ignored.
pub fn list_raw_items(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(|e| HarvestError::io(dir, e))?;

    let mut items = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| HarvestError::io(dir, e))?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some(RAW_ITEM_EXTENSION) {
            continue;
        }
        let Some(index) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        else {
            debug!(path = %path.display(), "ignoring non-numeric item file");
            continue;
        };
        items.push((index, path));
    }

    items.sort_by_key(|(index, _)| *index);
    Ok(items)
}

/// Read one raw item file.
pub fn read_raw_item(sequence_index: u64, path: &Path) -> Result<RawItem> {
    let content = fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    Ok(RawItem {
        source_path: path.to_path_buf(),
        sequence_index,
        content,
    })
}

fn digest(content: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(content.as_bytes()));
    out
}

/// Append-only writer over the raw items of one unit directory.
///
/// Opening the log scans what earlier runs left behind. New items get the
/// next free index; an item whose content is already stored is skipped.
#[derive(Debug)]
pub struct RawItemLog {
    dir: PathBuf,
    next_index: u64,
    seen: HashSet<[u8; 32]>,
}

impl RawItemLog {
    pub fn open(dir: &Path) -> Result<Self> {
        let existing = list_raw_items(dir)?;
        let next_index = existing.last().map_or(0, |(index, _)| index + 1);

        let mut seen = HashSet::with_capacity(existing.len());
        for (index, path) in &existing {
            seen.insert(digest(&read_raw_item(*index, path)?.content));
        }
        debug!(dir = %dir.display(), existing = existing.len(), next_index, "raw item log opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            next_index,
            seen,
        })
    }

    /// Index the next new item will get.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Persist `content` under the next index, or return `None` if an
    /// identical item is already stored.
    pub fn append(&mut self, content: &str) -> Result<Option<RawItem>> {
        let hash = digest(content);
        if self.seen.contains(&hash) {
            return Ok(None);
        }
        let item = write_raw_item(&self.dir, self.next_index, content)?;
        self.seen.insert(hash);
        self.next_index += 1;
        Ok(Some(item))
    }
}
