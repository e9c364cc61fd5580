//! Shared types, error model, and configuration for quizharvest.
//!
//! This crate is the foundation depended on by all other quizharvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`PageRequest`], [`RawItem`], [`NormalizedRecord`],
//!   [`RecordSet`], [`PublishCursor`], [`StepOutcome`])
//! - Configuration ([`AppConfig`], config loading, sink credentials)
//! - [`parse_selector`]: CSS selector parsing for the HTML stages

pub mod config;
pub mod error;
pub mod html;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConnectivityConfig, DefaultsConfig, RetryConfig, SinkConfig, SinkCredentials,
    SinkKind, SourceConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_sink_credentials,
};
pub use error::{HarvestError, Result};
pub use html::parse_selector;
pub use types::{
    DropReason, NOT_AVAILABLE, NormalizedRecord, OPTION_COUNT, PageRequest, PublishCursor,
    RawItem, RecordSet, StepOutcome, TOKEN_WIDTH, UnitOfWork, page_token,
};
