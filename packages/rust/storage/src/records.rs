//! Record set artifact: a CSV with columns question, options, answer, explanation.
//!
//! `options` holds a JSON array so the list survives a round-trip intact
//! (commas and quotes inside an option stay unambiguous).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use quizharvest_shared::{HarvestError, NormalizedRecord, RecordSet, Result};

use crate::write_atomic;

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    explanation: String,
}

impl CsvRow {
    fn from_record(record: &NormalizedRecord) -> Result<Self> {
        let options = serde_json::to_string(&record.options)
            .map_err(|e| HarvestError::Storage(format!("options encode failed: {e}")))?;
        Ok(Self {
            question: record.question.clone(),
            options,
            answer: record.answer.clone(),
            explanation: record.explanation.clone(),
        })
    }

    fn into_record(self, row: usize) -> Result<NormalizedRecord> {
        let options = if self.options.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&self.options).map_err(|e| {
                HarvestError::Storage(format!("row {row}: options column is not a list: {e}"))
            })?
        };
        Ok(NormalizedRecord {
            question: self.question,
            options,
            answer: self.answer,
            explanation: self.explanation,
        })
    }
}

/// Write the record set to `path`, replacing any previous version atomically.
pub fn write_record_set(path: &Path, records: &RecordSet) -> Result<()> {
    let csv_err = |e: csv::Error| HarvestError::Storage(format!("{}: {e}", path.display()));

    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(CsvRow::from_record(record)?).map_err(csv_err)?;
    }
    if records.is_empty() {
        // Keep the header so an empty set is still a well-formed artifact.
        writer
            .write_record(["question", "options", "answer", "explanation"])
            .map_err(csv_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| HarvestError::Storage(format!("{}: {e}", path.display())))?;

    write_atomic(path, &bytes)?;
    info!(path = %path.display(), records = records.len(), "record set saved");
    Ok(())
}

/// Read a record set back in file order.
pub fn read_record_set(path: &Path) -> Result<RecordSet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| HarvestError::Storage(format!("{}: {e}", path.display())))?;

    let mut records = Vec::new();
    for (row, result) in reader.deserialize::<CsvRow>().enumerate() {
        let csv_row =
            result.map_err(|e| HarvestError::Storage(format!("{}: {e}", path.display())))?;
        records.push(csv_row.into_record(row)?);
    }

    debug!(path = %path.display(), records = records.len(), "record set loaded");
    Ok(RecordSet::new(records))
}
