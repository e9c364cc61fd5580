//! Pipeline orchestration for quizharvest.
//!
//! This crate ties together row loading, fetching, parsing, and publishing
//! into end-to-end runs over every configured category.

pub mod pipeline;
pub mod rows;

pub use pipeline::{
    Pipeline, ProgressReporter, RunSummary, SilentProgress, Stage, StageSet, UnitReport,
};
pub use rows::{load_category_rows, parse_rows, rows_path};
