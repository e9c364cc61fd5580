//! Error types for quizharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all quizharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Bad config file, config row, or missing credentials.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching pages or probing connectivity.
    #[error("network error: {0}")]
    Network(String),

    /// The rendering capability failed or timed out on a page.
    #[error("render error: {0}")]
    Render(String),

    /// HTML parsing or field extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Local durable storage error (record set, cursor, raw items).
    #[error("storage error: {0}")]
    Storage(String),

    /// The remote sink rejected or failed a write.
    #[error("sink error: {0}")]
    Sink(String),

    /// Filesystem failure on a specific path.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invariant violation, bad format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Result alias for every library crate.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Shorthand for [`HarvestError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Shorthand for [`HarvestError::Parse`].
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Shorthand for [`HarvestError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Attach the failing path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Network, render, and sink failures are transient; everything else
    /// needs a code or data fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Render(_) | Self::Sink(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = HarvestError::config("DATABASE_URL is not set");
        assert_eq!(err.to_string(), "config error: DATABASE_URL is not set");

        let err = HarvestError::validation("cursor 7 exceeds record count 5");
        assert!(err.to_string().contains("cursor 7"));
    }

    #[test]
    fn transient_classification() {
        assert!(HarvestError::Network("reset".into()).is_transient());
        assert!(HarvestError::Sink("HTTP 503".into()).is_transient());
        assert!(HarvestError::Render("timeout".into()).is_transient());
        assert!(!HarvestError::parse("bad selector").is_transient());
        assert!(!HarvestError::config("missing").is_transient());
    }
}
