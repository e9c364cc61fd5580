//! Raw item → normalized record conversion.
//!
//! Items are parsed in parallel, then put back into fetch order by an
//! explicit sort on `sequence_index` before the record set is written. The
//! order of the written record set is the order the publisher will push.

mod extract;

use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use quizharvest_shared::{DropReason, NormalizedRecord, RawItem, RecordSet, Result, StepOutcome};
use quizharvest_storage::{UnitPaths, list_raw_items, read_raw_item, write_record_set};

pub use extract::{FieldSelectors, parse_item};

/// One item that did not make it into the record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub sequence_index: u64,
    pub reason: DropReason,
}

/// Counts and reasons for one parse run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    /// Records written to the record set.
    pub kept: usize,
    /// Items filtered out, in sequence order.
    pub dropped: Vec<DroppedItem>,
    /// Record set path, when one was written.
    pub output: Option<PathBuf>,
}

/// Records in sequence order plus the per-item drop log.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub records: RecordSet,
    pub report: ParseReport,
}

/// Sort per-item outcomes by sequence index.
///
/// Parallel parsing gives no ordering guarantee; this step restores fetch
/// order. The sort is stable so equal indices keep their relative order.
pub fn order_by_sequence<T>(mut outcomes: Vec<(u64, T)>) -> Vec<(u64, T)> {
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes
}

/// Parse `items` in parallel and fold the outcomes in sequence order.
pub fn parse_all(items: &[RawItem], selectors: &FieldSelectors) -> ParseOutput {
    let outcomes: Vec<(u64, StepOutcome<NormalizedRecord>)> = items
        .par_iter()
        .map(|item| (item.sequence_index, parse_item(item, selectors)))
        .collect();

    fold(order_by_sequence(outcomes))
}

fn fold(outcomes: Vec<(u64, StepOutcome<NormalizedRecord>)>) -> ParseOutput {
    let mut records = Vec::with_capacity(outcomes.len());
    let mut dropped = Vec::new();

    for (sequence_index, outcome) in outcomes {
        let reason = match outcome {
            StepOutcome::Ok(record) => {
                records.push(record);
                continue;
            }
            StepOutcome::Dropped(reason) => reason,
            StepOutcome::Retryable(e) | StepOutcome::Fatal(e) => {
                warn!(sequence_index, error = %e, "item failed to parse");
                DropReason::Unreadable(e.to_string())
            }
        };
        debug!(sequence_index, %reason, "item dropped");
        dropped.push(DroppedItem {
            sequence_index,
            reason,
        });
    }

    let report = ParseReport {
        kept: records.len(),
        dropped,
        output: None,
    };
    ParseOutput {
        records: RecordSet::new(records),
        report,
    }
}

/// Parse every raw item of one unit and write its record set.
///
/// Unreadable item files are dropped like malformed ones. The record set is
/// written even when nothing survives, so the publisher always finds a file.
pub fn parse_unit(paths: &UnitPaths, selectors: &FieldSelectors) -> Result<ParseReport> {
    let listed = list_raw_items(&paths.dir)?;

    let (items, unreadable): (Vec<_>, Vec<_>) = listed
        .par_iter()
        .map(|(index, path)| {
            read_raw_item(*index, path).map_err(|e| DroppedItem {
                sequence_index: *index,
                reason: DropReason::Unreadable(e.to_string()),
            })
        })
        .partition(|r| r.is_ok());
    let items: Vec<RawItem> = items.into_iter().filter_map(|r| r.ok()).collect();

    let mut output = parse_all(&items, selectors);
    for item in unreadable.into_iter().filter_map(|r| r.err()) {
        warn!(sequence_index = item.sequence_index, reason = %item.reason, "item unreadable");
        output.report.dropped.push(item);
    }
    output.report.dropped.sort_by_key(|d| d.sequence_index);

    write_record_set(&paths.record_set, &output.records)?;
    info!(
        dir = %paths.dir.display(),
        kept = output.report.kept,
        dropped = output.report.dropped.len(),
        "record set written"
    );

    output.report.output = Some(paths.record_set.clone());
    Ok(output.report)
}
