//! Incremental publisher and the remote sinks it writes to.
//!
//! This crate provides:
//! - [`sink`]: the [`RemoteSink`] trait with Firebase, file, and memory sinks
//! - [`publish`]: the cursor-driven [`Publisher`]

pub mod publish;
pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use quizharvest_shared::{Result, SinkConfig, SinkKind, resolve_sink_credentials};

pub use publish::{PublishReport, PublishState, Publisher, StopReason};
pub use sink::{FileEntry, FileSink, FirebaseSink, MemorySink, RemoteSink};

/// Build the configured sink.
///
/// Called once per process. For Firebase this resolves credentials from the
/// environment, and a failure here should abort the run.
pub fn build_sink(config: &SinkConfig, request_timeout: Duration) -> Result<Arc<dyn RemoteSink>> {
    let sink: Arc<dyn RemoteSink> = match config.kind {
        SinkKind::Firebase => {
            let credentials = resolve_sink_credentials(config)?;
            Arc::new(FirebaseSink::new(
                credentials,
                config.content_keys,
                request_timeout,
            )?)
        }
        SinkKind::File => Arc::new(FileSink::new(&config.file_dir, config.content_keys)),
    };
    info!(sink = %sink.describe(), "sink ready");
    Ok(sink)
}
