//! Application configuration for quizharvest.
//!
//! User config lives at `~/.quizharvest/quizharvest.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file: the `[sink]` section only names the
//! environment variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "quizharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".quizharvest";

// ---------------------------------------------------------------------------
// Config structs (matching quizharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Source site settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Fixed backoffs between retries.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Reachability probe settings.
    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    /// Remote sink settings.
    #[serde(default)]
    pub sink: SinkConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root for raw items, record sets, and cursors.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory holding one `<category>.csv` of query rows per category.
    #[serde(default = "default_rows_dir")]
    pub rows_dir: String,

    /// Categories processed by `run`, in order.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            rows_dir: default_rows_dir(),
            categories: default_categories(),
        }
    }
}

fn default_data_dir() -> String {
    "data".into()
}
fn default_rows_dir() -> String {
    ".".into()
}
fn default_categories() -> Vec<String> {
    vec![
        "aptitude".into(),
        "verbal-reasoning".into(),
        "logical-reasoning".into(),
    ]
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Site root; page URLs are `<base_url>/<category>/<query>/<token>`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// CSS selector of one question block on a listing page.
    #[serde(default = "default_item_selector")]
    pub item_selector: String,

    /// How long to wait for the first item block on a page.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,

    /// Re-fetch interval while waiting for item blocks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// HTTP request timeout for a single page load.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            item_selector: default_item_selector(),
            wait_timeout_secs: default_wait_timeout(),
            poll_interval_ms: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.indiabix.com".into()
}
fn default_item_selector() -> String {
    ".bix-div-container".into()
}
fn default_wait_timeout() -> u64 {
    10
}
fn default_poll_interval() -> u64 {
    500
}
fn default_request_timeout() -> u64 {
    30
}

impl SourceConfig {
    /// Parsed site root.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| HarvestError::config(format!("invalid base_url {:?}: {e}", self.base_url)))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Pause after a failed page before moving on.
    #[serde(default = "default_page_backoff")]
    pub page_backoff_secs: u64,

    /// Pause between reachability probes while offline.
    #[serde(default = "default_connectivity_backoff")]
    pub connectivity_backoff_secs: u64,

    /// Pause after a rejected push before the unit stops.
    #[serde(default = "default_publish_pause")]
    pub publish_pause_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            page_backoff_secs: default_page_backoff(),
            connectivity_backoff_secs: default_connectivity_backoff(),
            publish_pause_secs: default_publish_pause(),
        }
    }
}

fn default_page_backoff() -> u64 {
    5
}
fn default_connectivity_backoff() -> u64 {
    10
}
fn default_publish_pause() -> u64 {
    5
}

impl RetryConfig {
    pub fn page_backoff(&self) -> Duration {
        Duration::from_secs(self.page_backoff_secs)
    }

    pub fn connectivity_backoff(&self) -> Duration {
        Duration::from_secs(self.connectivity_backoff_secs)
    }

    pub fn publish_pause(&self) -> Duration {
        Duration::from_secs(self.publish_pause_secs)
    }
}

/// `[connectivity]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// Address a TCP connection is opened to as the reachability test.
    #[serde(default = "default_probe_addr")]
    pub probe_addr: String,

    /// Connect timeout for one probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Probe before every page, not just before the fetch starts.
    #[serde(default)]
    pub check_every_page: bool,

    /// Give up after this many offline probes. Unset waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_addr: default_probe_addr(),
            probe_timeout_secs: default_probe_timeout(),
            check_every_page: false,
            max_attempts: None,
        }
    }
}

fn default_probe_addr() -> String {
    "8.8.8.8:53".into()
}
fn default_probe_timeout() -> u64 {
    2
}

/// Which remote sink receives published records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    /// Firebase Realtime Database over its REST API.
    Firebase,
    /// Local append-only JSON-lines files (dry runs, offline use).
    File,
}

/// `[sink]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,

    /// Root of the logical path; records go to `<root>/<category>/<query>`.
    #[serde(default = "default_sink_root")]
    pub root: String,

    /// Name of the env var holding the database URL.
    #[serde(default = "default_database_url_env")]
    pub database_url_env: String,

    /// Name of the env var holding the database auth token.
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,

    /// Output directory for the `file` sink.
    #[serde(default = "default_file_dir")]
    pub file_dir: String,

    /// Key each record by its content hash instead of a sink-assigned key.
    #[serde(default)]
    pub content_keys: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            root: default_sink_root(),
            database_url_env: default_database_url_env(),
            auth_token_env: default_auth_token_env(),
            file_dir: default_file_dir(),
            content_keys: false,
        }
    }
}

fn default_sink_kind() -> SinkKind {
    SinkKind::Firebase
}
fn default_sink_root() -> String {
    "Questions".into()
}
fn default_database_url_env() -> String {
    "DATABASE_URL".into()
}
fn default_auth_token_env() -> String {
    "DATABASE_AUTH_TOKEN".into()
}
fn default_file_dir() -> String {
    "published".into()
}

/// Credentials for the Firebase sink, resolved from the environment.
#[derive(Clone)]
pub struct SinkCredentials {
    pub database_url: Url,
    pub auth_token: String,
}

impl std::fmt::Debug for SinkCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkCredentials")
            .field("database_url", &self.database_url.as_str())
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.quizharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.quizharvest/quizharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve Firebase credentials from the env vars named in `[sink]`.
///
/// Both variables must be set and non-empty, and the URL must parse.
/// Callers treat a failure here as fatal for the whole process.
pub fn resolve_sink_credentials(config: &SinkConfig) -> Result<SinkCredentials> {
    let url_var = &config.database_url_env;
    let token_var = &config.auth_token_env;

    let raw_url = match std::env::var(url_var) {
        Ok(val) if !val.trim().is_empty() => val,
        _ => {
            return Err(HarvestError::config(format!(
                "database URL not found. Set the {url_var} environment variable."
            )));
        }
    };
    let database_url = Url::parse(raw_url.trim())
        .map_err(|e| HarvestError::config(format!("{url_var} is not a valid URL: {e}")))?;

    let auth_token = match std::env::var(token_var) {
        Ok(val) if !val.trim().is_empty() => val.trim().to_string(),
        _ => {
            return Err(HarvestError::config(format!(
                "database credentials not found. Set the {token_var} environment variable."
            )));
        }
    };

    Ok(SinkCredentials {
        database_url,
        auth_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("DATABASE_URL"));
        assert!(toml_str.contains("kind = \"firebase\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retry.page_backoff_secs, 5);
        assert_eq!(parsed.retry.connectivity_backoff_secs, 10);
        assert_eq!(parsed.source.wait_timeout_secs, 10);
        assert_eq!(parsed.sink.root, "Questions");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
data_dir = "/tmp/harvest"
categories = ["aptitude"]

[connectivity]
check_every_page = true
max_attempts = 3

[sink]
kind = "file"
file_dir = "/tmp/published"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.categories, ["aptitude"]);
        assert_eq!(config.defaults.rows_dir, ".");
        assert!(config.connectivity.check_every_page);
        assert_eq!(config.connectivity.max_attempts, Some(3));
        assert_eq!(config.connectivity.probe_addr, "8.8.8.8:53");
        assert_eq!(config.sink.kind, SinkKind::File);
        assert_eq!(config.source.item_selector, ".bix-div-container");
    }

    #[test]
    fn durations_from_config() {
        let config = AppConfig::default();
        assert_eq!(config.retry.page_backoff(), Duration::from_secs(5));
        assert_eq!(config.source.poll_interval(), Duration::from_millis(500));
        assert!(config.source.base_url().is_ok());
    }

    #[test]
    fn missing_credentials_are_rejected() {
        // Unique env var names so parallel tests cannot interfere.
        let config = SinkConfig {
            database_url_env: "QH_TEST_NONEXISTENT_URL_12345".into(),
            auth_token_env: "QH_TEST_NONEXISTENT_TOKEN_12345".into(),
            ..SinkConfig::default()
        };
        let err = resolve_sink_credentials(&config).unwrap_err();
        assert!(err.to_string().contains("QH_TEST_NONEXISTENT_URL_12345"));
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = SinkCredentials {
            database_url: Url::parse("https://example.firebaseio.com").unwrap(),
            auth_token: "s3cret".into(),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("s3cret"));
        assert!(shown.contains("redacted"));
    }
}
