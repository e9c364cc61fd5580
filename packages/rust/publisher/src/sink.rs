//! Remote sinks: where published records end up.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use url::Url;

use quizharvest_shared::{HarvestError, NormalizedRecord, Result, SinkCredentials};

/// An append-only keyed store.
///
/// `path` is a slash-separated logical location such as
/// `Questions/aptitude/problems-on-trains`. On success the sink returns the
/// key it stored the record under.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn push(&self, path: &str, record: &NormalizedRecord) -> Result<String>;

    /// Short human-readable name for logs.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// FirebaseSink
// ---------------------------------------------------------------------------

/// Body of a Firebase `POST` acknowledgement.
#[derive(Debug, Deserialize)]
struct PushAck {
    name: String,
}

/// Firebase Realtime Database over its REST API.
///
/// Default mode posts to `<path>.json` and the database assigns the key.
/// With content keys, each record is `PUT` to `<path>/<content_key>.json`,
/// so pushing the same record twice writes the same node.
pub struct FirebaseSink {
    client: Client,
    database_url: Url,
    auth_token: String,
    content_keys: bool,
}

impl FirebaseSink {
    pub fn new(credentials: SinkCredentials, content_keys: bool, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Sink(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            database_url: credentials.database_url,
            auth_token: credentials.auth_token,
            content_keys,
        })
    }

    /// `<database_url>/<path>[/<key>].json?auth=<token>`
    ///
    /// The URL carries the secret; errors built from a request must drop it.
    fn node_url(&self, path: &str, key: Option<&str>) -> Result<Url> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if let Some(key) = key {
            segments.push(key);
        }
        let Some(last) = segments.pop() else {
            return Err(HarvestError::validation("sink path is empty"));
        };
        let last = format!("{last}.json");

        let mut url = self.database_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                HarvestError::config(format!("cannot use {} as a database URL", self.database_url))
            })?
            .pop_if_empty()
            .extend(segments)
            .push(&last);
        url.query_pairs_mut().append_pair("auth", &self.auth_token);
        Ok(url)
    }
}

#[async_trait]
impl RemoteSink for FirebaseSink {
    #[instrument(skip_all, fields(path = %path))]
    async fn push(&self, path: &str, record: &NormalizedRecord) -> Result<String> {
        let (request, content_key) = if self.content_keys {
            let key = record.content_key();
            let url = self.node_url(path, Some(&key))?;
            (self.client.put(url), Some(key))
        } else {
            (self.client.post(self.node_url(path, None)?), None)
        };

        let response = request
            .json(record)
            .send()
            .await
            .map_err(|e| HarvestError::Sink(format!("{path}: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvestError::Sink(format!("{path}: HTTP {status}: {body}")));
        }

        let key = match content_key {
            Some(key) => key,
            None => {
                response
                    .json::<PushAck>()
                    .await
                    .map_err(|e| {
                        HarvestError::Sink(format!("{path}: unexpected ack: {}", e.without_url()))
                    })?
                    .name
            }
        };
        debug!(%key, "record acknowledged");
        Ok(key)
    }

    fn describe(&self) -> String {
        let mode = if self.content_keys { "content keys" } else { "append" };
        format!("firebase {} ({mode})", self.database_url)
    }
}

// ---------------------------------------------------------------------------
// FileSink
// ---------------------------------------------------------------------------

/// One line of a file sink.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    pub key: String,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: NormalizedRecord,
}

/// Local append-only JSON-lines files, one per logical path:
/// `<root>/<path>.jsonl`.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
    content_keys: bool,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>, content_keys: bool) -> Self {
        Self {
            root: root.into(),
            content_keys,
        }
    }

    /// File backing `path`.
    pub fn file_for(&self, path: &str) -> PathBuf {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let last = segments.pop().unwrap_or_default();

        let mut file = self.root.clone();
        file.extend(segments);
        file.push(format!("{last}.jsonl"));
        file
    }

    async fn append(file: &Path, line: &[u8]) -> std::io::Result<()> {
        if let Some(dir) = file.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .await?;
        handle.write_all(line).await?;
        handle.flush().await
    }
}

#[async_trait]
impl RemoteSink for FileSink {
    async fn push(&self, path: &str, record: &NormalizedRecord) -> Result<String> {
        let key = if self.content_keys {
            record.content_key()
        } else {
            uuid::Uuid::now_v7().to_string()
        };
        let entry = FileEntry {
            key: key.clone(),
            published_at: Utc::now(),
            record: record.clone(),
        };
        let mut line = serde_json::to_vec(&entry)
            .map_err(|e| HarvestError::Sink(format!("{path}: encode failed: {e}")))?;
        line.push(b'\n');

        let file = self.file_for(path);
        Self::append(&file, &line)
            .await
            .map_err(|e| HarvestError::Sink(format!("{}: {e}", file.display())))?;
        Ok(key)
    }

    fn describe(&self) -> String {
        format!("file {}", self.root.display())
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// In-memory sink for tests and dry runs.
///
/// Can be told to reject every push after a number of accepted ones.
#[derive(Debug, Default)]
pub struct MemorySink {
    pushed: Mutex<Vec<(String, NormalizedRecord)>>,
    accept_limit: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `limit` pushes, then fail every later one.
    pub fn failing_after(limit: usize) -> Self {
        Self {
            pushed: Mutex::default(),
            accept_limit: Some(limit),
        }
    }

    /// Every accepted `(path, record)`, in push order.
    pub fn pushed(&self) -> Vec<(String, NormalizedRecord)> {
        self.pushed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RemoteSink for MemorySink {
    async fn push(&self, path: &str, record: &NormalizedRecord) -> Result<String> {
        let mut pushed = self
            .pushed
            .lock()
            .map_err(|_| HarvestError::Sink("memory sink lock poisoned".into()))?;
        if self.accept_limit.is_some_and(|limit| pushed.len() >= limit) {
            return Err(HarvestError::Sink(format!("{path}: rejected")));
        }
        pushed.push((path.to_string(), record.clone()));
        Ok(format!("mem-{}", pushed.len() - 1))
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
