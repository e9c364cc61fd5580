//! Core domain types for the harvest pipeline.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{HarvestError, Result};

/// Sentinel stored in place of a field the source markup did not carry.
pub const NOT_AVAILABLE: &str = "N/A";

/// Number of options a question must have to be kept.
pub const OPTION_COUNT: usize = 4;

/// Width of the zero-padded base number once a page rolls past index 9.
pub const TOKEN_WIDTH: usize = 5;

// ---------------------------------------------------------------------------
// Page numbering
// ---------------------------------------------------------------------------

/// Derive the site-specific page token for `page` under `base_number`.
///
/// Pages 0–9 append the index to the base number verbatim. From page 10 on,
/// the tens digit is added to the base number numerically, the sum is
/// re-rendered at [`TOKEN_WIDTH`] with zero padding, and the ones digit is
/// appended: base `00100`, page 23 → `00102` + `3` → `001023`.
pub fn page_token(base_number: &str, page: u32) -> Result<String> {
    if page <= 9 {
        return Ok(format!("{base_number}{page}"));
    }

    let base: u64 = base_number.trim().parse().map_err(|_| {
        HarvestError::config(format!(
            "base number {base_number:?} is not numeric (needed for page {page})"
        ))
    })?;

    Ok(format!(
        "{:0width$}{}",
        base + u64::from(page / 10),
        page % 10,
        width = TOKEN_WIDTH
    ))
}

/// One page of one (category, query) listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub category: String,
    pub query: String,
    pub base_number: String,
    pub page_index: u32,
}

impl PageRequest {
    /// The page token for this request (see [`page_token`]).
    pub fn token(&self) -> Result<String> {
        page_token(&self.base_number, self.page_index)
    }

    /// Full page URL: `<base_url>/<category>/<query>/<token>`.
    pub fn url(&self, base_url: &Url) -> Result<Url> {
        let token = self.token()?;
        let mut url = base_url.clone();
        url.path_segments_mut()
            .map_err(|()| HarvestError::config(format!("cannot use {base_url} as a base URL")))?
            .pop_if_empty()
            .extend([self.category.as_str(), self.query.as_str(), token.as_str()]);
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// UnitOfWork
// ---------------------------------------------------------------------------

/// A single configuration row: one query of one category and its page range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    pub category: String,
    pub query: String,
    pub base_number: String,
    pub start_page: u32,
    pub end_page: u32,
}

impl UnitOfWork {
    /// Inclusive page range. Empty when `start_page > end_page`.
    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start_page..=self.end_page
    }

    /// Page requests for every page in range, in order.
    pub fn requests(&self) -> impl Iterator<Item = PageRequest> + '_ {
        self.pages().map(|page_index| PageRequest {
            category: self.category.clone(),
            query: self.query.clone(),
            base_number: self.base_number.clone(),
            page_index,
        })
    }
}

impl fmt::Display for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.query)
    }
}

// ---------------------------------------------------------------------------
// RawItem
// ---------------------------------------------------------------------------

/// One extracted item block, exactly as the page rendered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    /// File the item was persisted to (or read from).
    pub source_path: PathBuf,
    /// Position in fetch order; continues across pages of one fetch.
    pub sequence_index: u64,
    /// Outer HTML of the item container.
    pub content: String,
}

// ---------------------------------------------------------------------------
// NormalizedRecord / RecordSet
// ---------------------------------------------------------------------------

/// The canonical four-field form of one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    pub explanation: String,
}

impl NormalizedRecord {
    /// True when every field is blank. Such a row marks the end of data.
    pub fn is_blank(&self) -> bool {
        self.question.trim().is_empty()
            && self.answer.trim().is_empty()
            && self.explanation.trim().is_empty()
            && self.options.iter().all(|o| o.trim().is_empty())
    }

    /// True when any scalar field holds the [`NOT_AVAILABLE`] sentinel.
    pub fn has_sentinels(&self) -> bool {
        [&self.question, &self.answer, &self.explanation]
            .iter()
            .any(|f| f.as_str() == NOT_AVAILABLE)
    }

    /// SHA-256 over the canonical JSON form, as lowercase hex.
    pub fn content_key(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }
}

/// Ordered records for one (category, query). Order is publish order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: Vec<NormalizedRecord>,
}

impl RecordSet {
    pub fn new(records: Vec<NormalizedRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NormalizedRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NormalizedRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }
}

impl From<Vec<NormalizedRecord>> for RecordSet {
    fn from(records: Vec<NormalizedRecord>) -> Self {
        Self::new(records)
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a NormalizedRecord;
    type IntoIter = std::slice::Iter<'a, NormalizedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// PublishCursor
// ---------------------------------------------------------------------------

/// Count of leading records of a [`RecordSet`] confirmed delivered.
///
/// Never exceeds the record count and only moves forward one acknowledged
/// record at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PublishCursor(usize);

impl PublishCursor {
    /// Nothing published yet.
    pub const START: Self = Self(0);

    pub fn new(published: usize) -> Self {
        Self(published)
    }

    /// Number of leading records already published.
    pub fn published(self) -> usize {
        self.0
    }

    /// Check the cursor against the record set it indexes.
    pub fn validate(self, record_count: usize) -> Result<Self> {
        if self.0 > record_count {
            return Err(HarvestError::validation(format!(
                "cursor {} exceeds record count {record_count}",
                self.0
            )));
        }
        Ok(self)
    }

    /// The cursor after one more acknowledged record.
    pub fn advance(self, record_count: usize) -> Result<Self> {
        Self(self.0 + 1).validate(record_count)
    }
}

impl fmt::Display for PublishCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PublishCursor {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<usize>()
            .map(Self)
            .map_err(|e| HarvestError::Storage(format!("invalid cursor value {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Why an item was filtered out. Drops are policy, not failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("expected four options, found {found}")]
    WrongOptionCount { found: usize },

    #[error("unreadable item: {0}")]
    Unreadable(String),

    #[error("malformed markup: {0}")]
    Malformed(String),
}

/// Result of one pipeline step (one page, one item, or one record).
#[derive(Debug)]
pub enum StepOutcome<T> {
    /// The step produced a value.
    Ok(T),
    /// The input was filtered out; continue with the next one.
    Dropped(DropReason),
    /// A transient failure; the same step may succeed later.
    Retryable(HarvestError),
    /// A failure that retrying will not fix.
    Fatal(HarvestError),
}

impl<T> StepOutcome<T> {
    /// Classify an error as [`Retryable`](Self::Retryable) or [`Fatal`](Self::Fatal).
    pub fn from_error(err: HarvestError) -> Self {
        if err.is_transient() {
            Self::Retryable(err)
        } else {
            Self::Fatal(err)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// The produced value, discarding any drop or error.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<Result<T>> for StepOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::from_error(err),
        }
    }
}
