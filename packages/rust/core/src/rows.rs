//! Per-category configuration rows.
//!
//! Each category has a `<rows_dir>/<category>.csv` with a header line and the
//! columns `query, base_number, start_page, end_page`. Extra columns are
//! ignored. Bad rows are skipped with a warning; the first empty row ends
//! the file.

use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, warn};

use quizharvest_shared::{HarvestError, Result, UnitOfWork};

/// Path of the row file for `category`.
pub fn rows_path(rows_dir: &Path, category: &str) -> PathBuf {
    rows_dir.join(format!("{category}.csv"))
}

/// Load the units of work for one category.
///
/// A missing file is not an error: the category is skipped with a warning
/// and no units are returned.
pub fn load_category_rows(rows_dir: &Path, category: &str) -> Result<Vec<UnitOfWork>> {
    let path = rows_path(rows_dir, category);
    if !path.exists() {
        warn!(file = %path.display(), category, "row file not found, skipping category");
        return Ok(Vec::new());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| HarvestError::io(&path, e))?;
    let units = parse_rows(category, text.as_bytes())?;
    debug!(file = %path.display(), units = units.len(), "rows loaded");
    Ok(units)
}

/// Parse row CSV for `category` from any reader.
pub fn parse_rows<R: Read>(category: &str, mut reader: R) -> Result<Vec<UnitOfWork>> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| HarvestError::config(format!("{category} rows: {e}")))?;

    // The CSV reader silently skips blank lines, so cut at the first one here.
    let mut kept = String::with_capacity(text.len());
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            warn!(category, row = line_no, "empty row, stopping");
            break;
        }
        kept.push_str(line);
        kept.push('\n');
    }

    let mut csv = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(kept.as_bytes());

    let mut units = Vec::new();
    for (index, record) in csv.records().enumerate() {
        let row = index + 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(category, row, error = %e, "unreadable row, skipping");
                continue;
            }
        };

        if record.iter().all(str::is_empty) {
            warn!(category, row, "empty row, stopping");
            break;
        }
        if let Some(unit) = unit_from_record(category, row, &record) {
            units.push(unit);
        }
    }
    Ok(units)
}

fn unit_from_record(category: &str, row: usize, record: &StringRecord) -> Option<UnitOfWork> {
    if record.len() < 4 {
        warn!(category, row, fields = record.len(), "row has fewer than 4 fields, skipping");
        return None;
    }

    let (query, base_number) = (&record[0], &record[1]);
    let (Ok(start_page), Ok(end_page)) = (record[2].parse::<u32>(), record[3].parse::<u32>()) else {
        warn!(
            category,
            row,
            start_page = &record[2],
            end_page = &record[3],
            "non-numeric page range, skipping"
        );
        return None;
    };

    Some(UnitOfWork {
        category: category.to_string(),
        query: query.to_string(),
        base_number: base_number.to_string(),
        start_page,
        end_page,
    })
}
