//! Cursor-driven incremental publish of one record set.
//!
//! ```text
//! Idle → Resuming → Publishing → Done
//!                   Publishing ⇄ Blocked      (network down)
//!                   Publishing → Paused       (push or cursor write failed)
//!                   Blocked    → Paused       (gave up waiting for network)
//! ```
//!
//! The cursor is persisted after every acknowledged push, so a rerun starts
//! at the first record the sink has not confirmed. A crash between the push
//! and the cursor write re-pushes that one record on the next run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use quizharvest_connectivity::ConnectivityGuard;
use quizharvest_shared::{AppConfig, PublishCursor, RecordSet, Result};
use quizharvest_storage::CursorStore;

use crate::sink::RemoteSink;

/// Where a publish run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    Resuming,
    Publishing { index: usize },
    Blocked { index: usize },
    Paused { index: usize },
    Done,
}

/// Why a publish run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every record up to the end of the set is published.
    Completed,
    /// An all-blank record marked the end of data at `index`.
    EndMarker { index: usize },
    /// Pushing the record at `index` failed; it is retried next run.
    PushFailed { index: usize, error: String },
    /// The network stayed down before the record at `index` was pushed.
    Offline { index: usize, error: String },
    /// The record at `index` was pushed but the cursor could not be saved.
    CursorWriteFailed { index: usize, error: String },
}

impl StopReason {
    /// Whether the run stopped early on an error.
    pub fn is_paused(&self) -> bool {
        matches!(
            self,
            Self::PushFailed { .. } | Self::Offline { .. } | Self::CursorWriteFailed { .. }
        )
    }
}

/// Outcome of one publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Records pushed and recorded in the cursor during this run.
    pub published: usize,
    /// Cursor as persisted at the end of the run.
    pub cursor: PublishCursor,
    pub stop: StopReason,
    /// State the run ended in: `Done`, or `Paused` at the stopping record.
    pub state: PublishState,
    /// Whether the run had to wait for the network at least once.
    pub was_blocked: bool,
    pub duration: Duration,
}

/// Pushes unpublished records to a sink, one at a time, in order.
pub struct Publisher {
    sink: Arc<dyn RemoteSink>,
    guard: ConnectivityGuard,
    root: String,
    pause: Duration,
}

impl Publisher {
    pub fn new(
        sink: Arc<dyn RemoteSink>,
        guard: ConnectivityGuard,
        root: impl Into<String>,
        pause: Duration,
    ) -> Self {
        Self {
            sink,
            guard,
            root: root.into(),
            pause,
        }
    }

    /// Publisher using the `[sink]` root and `[retry]` pause from `config`.
    pub fn from_app(sink: Arc<dyn RemoteSink>, guard: ConnectivityGuard, config: &AppConfig) -> Self {
        Self::new(sink, guard, config.sink.root.clone(), config.retry.publish_pause())
    }

    /// Logical sink path for one (category, query): `<root>/<category>/<query>`.
    pub fn sink_path(&self, category: &str, query: &str) -> String {
        format!("{}/{category}/{query}", self.root.trim_end_matches('/'))
    }

    /// Publish every record past the persisted cursor.
    pub async fn publish(
        &self,
        category: &str,
        query: &str,
        records: &RecordSet,
        cursor_store: &dyn CursorStore,
    ) -> Result<PublishReport> {
        self.publish_with(category, query, records, cursor_store, &mut |_| {})
            .await
    }

    /// Like [`publish`](Self::publish), calling `on_published` with the new
    /// cursor value after each recorded push.
    ///
    /// Only a cursor that cannot be loaded, or one larger than the record
    /// set, is returned as an error. Sink and cursor write failures stop the
    /// run and are reported in [`PublishReport::stop`].
    #[instrument(skip_all, fields(category = %category, query = %query, records = records.len()))]
    pub async fn publish_with(
        &self,
        category: &str,
        query: &str,
        records: &RecordSet,
        cursor_store: &dyn CursorStore,
        on_published: &mut (dyn FnMut(usize) + Send),
    ) -> Result<PublishReport> {
        let start = Instant::now();
        let total = records.len();
        let path = self.sink_path(category, query);

        let mut state = PublishState::Idle;
        transition(&mut state, PublishState::Resuming);
        let mut cursor = cursor_store.load()?.validate(total)?;
        info!(cursor = %cursor, sink = %self.sink.describe(), "resuming publish");

        let mut published = 0usize;
        let mut was_blocked = false;
        let mut stop = StopReason::Completed;

        for index in cursor.published()..total {
            transition(&mut state, PublishState::Publishing { index });

            let Some(record) = records.get(index) else {
                break;
            };
            if record.is_blank() {
                info!(row = index, "end-of-data marker reached");
                stop = StopReason::EndMarker { index };
                break;
            }

            if !self.guard.check().await {
                transition(&mut state, PublishState::Blocked { index });
                was_blocked = true;
                if let Err(e) = self.guard.wait_until_online().await {
                    error!(row = index, error = %e, "gave up waiting for network");
                    transition(&mut state, PublishState::Paused { index });
                    stop = StopReason::Offline {
                        index,
                        error: e.to_string(),
                    };
                    break;
                }
                transition(&mut state, PublishState::Publishing { index });
            }

            let key = match self.sink.push(&path, record).await {
                Ok(key) => key,
                Err(e) => {
                    error!(
                        row = index,
                        error = %e,
                        pause_secs = self.pause.as_secs(),
                        "push failed, pausing"
                    );
                    tokio::time::sleep(self.pause).await;
                    transition(&mut state, PublishState::Paused { index });
                    stop = StopReason::PushFailed {
                        index,
                        error: e.to_string(),
                    };
                    break;
                }
            };

            let next = cursor.advance(total)?;
            if let Err(e) = cursor_store.store(next) {
                error!(row = index, %key, error = %e, "record pushed but cursor not saved");
                transition(&mut state, PublishState::Paused { index });
                stop = StopReason::CursorWriteFailed {
                    index,
                    error: e.to_string(),
                };
                break;
            }

            cursor = next;
            published += 1;
            debug!(row = index, %key, cursor = %cursor, "record published");
            on_published(cursor.published());
        }

        if !stop.is_paused() {
            transition(&mut state, PublishState::Done);
        }

        let report = PublishReport {
            published,
            cursor,
            stop,
            state,
            was_blocked,
            duration: start.elapsed(),
        };
        if report.stop.is_paused() {
            warn!(published, cursor = %report.cursor, stop = ?report.stop, "publish paused");
        } else {
            info!(published, cursor = %report.cursor, "publish finished");
        }
        Ok(report)
    }
}

fn transition(state: &mut PublishState, next: PublishState) {
    if *state != next {
        debug!(from = ?*state, to = ?next, "publish state");
        *state = next;
    }
}
