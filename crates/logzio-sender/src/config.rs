//! Configuration for the sender.
//!
//! [`HttpsRequestConfiguration`] holds everything the HTTP client needs to
//! talk to a listener. [`SenderConfig`] is the YAML file shape used by the
//! `logzio-ship` binary.

use crate::error::{Error, Result};
use crate::model::RtQuery;
use crate::queue::{DiskQueue, InMemoryQueue};
use crate::sender::{LogzioSender, LogzioSenderBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use url::Url;

/// Default Logz.io listener.
pub const DEFAULT_LISTENER_URL: &str = "https://listener.logz.io:8071";

/// Default number of attempts per batch.
pub const DEFAULT_MAX_RETRIES_ATTEMPTS: u32 = 3;

/// Default wait before the first retry; doubled after every failed try.
pub const DEFAULT_INITIAL_WAIT_BEFORE_RETRY: Duration = Duration::from_millis(2000);

/// Default socket (read) timeout.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default HTTP method for bulk requests.
pub const DEFAULT_REQUEST_METHOD: &str = "POST";

/// Settings for delivering batches to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsRequestConfiguration {
    token: String,
    log_type: Option<String>,
    listener_url: Url,
    max_retries_attempts: u32,
    initial_wait_before_retry: Duration,
    socket_timeout: Duration,
    connect_timeout: Duration,
    request_method: reqwest::Method,
    compress_requests: bool,
}

impl HttpsRequestConfiguration {
    /// Starts building a configuration with the defaults.
    #[must_use]
    pub fn builder() -> HttpsRequestConfigurationBuilder {
        HttpsRequestConfigurationBuilder::default()
    }

    /// The account token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The log type, if one was set.
    #[must_use]
    pub fn log_type(&self) -> Option<&str> {
        self.log_type.as_deref()
    }

    /// The full listener URL including the `token` and `type` query pairs.
    #[must_use]
    pub fn listener_url(&self) -> &Url {
        &self.listener_url
    }

    /// Attempts per batch before giving up until the next drain.
    #[must_use]
    pub fn max_retries_attempts(&self) -> u32 {
        self.max_retries_attempts
    }

    /// Wait before the first retry.
    #[must_use]
    pub fn initial_wait_before_retry(&self) -> Duration {
        self.initial_wait_before_retry
    }

    /// Read timeout per request.
    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    /// Connect timeout per request.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// HTTP method used for bulk requests.
    #[must_use]
    pub fn request_method(&self) -> &reqwest::Method {
        &self.request_method
    }

    /// Whether payloads are gzip-compressed.
    #[must_use]
    pub fn compress_requests(&self) -> bool {
        self.compress_requests
    }
}

/// Builder for [`HttpsRequestConfiguration`].
#[derive(Debug, Clone)]
pub struct HttpsRequestConfigurationBuilder {
    token: Option<String>,
    log_type: Option<String>,
    listener_url: String,
    max_retries_attempts: u32,
    initial_wait_before_retry: Duration,
    socket_timeout: Duration,
    connect_timeout: Duration,
    request_method: String,
    compress_requests: bool,
}

impl Default for HttpsRequestConfigurationBuilder {
    fn default() -> Self {
        Self {
            token: None,
            log_type: None,
            listener_url: DEFAULT_LISTENER_URL.to_string(),
            max_retries_attempts: DEFAULT_MAX_RETRIES_ATTEMPTS,
            initial_wait_before_retry: DEFAULT_INITIAL_WAIT_BEFORE_RETRY,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_method: DEFAULT_REQUEST_METHOD.to_string(),
            compress_requests: false,
        }
    }
}

impl HttpsRequestConfigurationBuilder {
    /// Sets the account token. Required.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the log type.
    #[must_use]
    pub fn log_type(mut self, log_type: impl Into<String>) -> Self {
        self.log_type = Some(log_type.into());
        self
    }

    /// Sets the listener base URL.
    #[must_use]
    pub fn listener_url(mut self, url: impl Into<String>) -> Self {
        self.listener_url = url.into();
        self
    }

    /// Sets the number of attempts per batch.
    #[must_use]
    pub fn max_retries_attempts(mut self, attempts: u32) -> Self {
        self.max_retries_attempts = attempts;
        self
    }

    /// Sets the wait before the first retry.
    #[must_use]
    pub fn initial_wait_before_retry(mut self, wait: Duration) -> Self {
        self.initial_wait_before_retry = wait;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn request_method(mut self, method: impl Into<String>) -> Self {
        self.request_method = method.into();
        self
    }

    /// Enables gzip compression of payloads.
    #[must_use]
    pub fn compress_requests(mut self, compress: bool) -> Self {
        self.compress_requests = compress;
        self
    }

    /// Validates the settings and builds the listener URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parameter`] if the token is missing, the listener URL
    /// cannot be parsed, or the request method is not a valid HTTP method.
    pub fn build(self) -> Result<HttpsRequestConfiguration> {
        let token = self
            .token
            .ok_or_else(|| Error::parameter("logzioToken", "logzioToken can't be null"))?;

        let mut listener_url = Url::parse(&self.listener_url).map_err(|e| {
            Error::parameter(
                format!(
                    "logzioUrl={} token={} type={}",
                    self.listener_url,
                    token,
                    self.log_type.as_deref().unwrap_or("")
                ),
                format!("For some reason could not initialize URL. Cant recover.. {e}"),
            )
        })?;
        {
            let mut query = listener_url.query_pairs_mut();
            query.append_pair("token", &token);
            if let Some(log_type) = &self.log_type {
                query.append_pair("type", log_type);
            }
        }

        let request_method = reqwest::Method::from_bytes(self.request_method.as_bytes())
            .map_err(|e| Error::parameter("requestMethod", e.to_string()))?;

        Ok(HttpsRequestConfiguration {
            token,
            log_type: self.log_type,
            listener_url,
            max_retries_attempts: self.max_retries_attempts.max(1),
            initial_wait_before_retry: self.initial_wait_before_retry,
            socket_timeout: self.socket_timeout,
            connect_timeout: self.connect_timeout,
            request_method,
            compress_requests: self.compress_requests,
        })
    }
}

/// Buffer section of a [`SenderConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "kind",
    rename_all = "lowercase",
    rename_all_fields = "kebab-case"
)]
pub enum QueueConfig {
    /// In-memory buffer.
    Memory {
        /// Capacity in bytes; `null` disables the limit.
        #[serde(default = "default_capacity_bytes")]
        capacity_bytes: Option<u64>,
    },
    /// Persistent buffer in a directory.
    Disk {
        /// Buffer directory.
        dir: PathBuf,
        /// Used-space percentage at which logs are dropped; `null` disables
        /// the check.
        #[serde(default = "default_fs_percent_threshold")]
        fs_percent_threshold: Option<u8>,
        /// Seconds between garbage collections of consumed segments.
        #[serde(default = "default_gc_interval_secs")]
        gc_interval_secs: u64,
    },
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::Memory {
            capacity_bytes: default_capacity_bytes(),
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_capacity_bytes() -> Option<u64> {
    Some(crate::queue::memory::DEFAULT_CAPACITY_BYTES)
}

#[allow(clippy::unnecessary_wraps)]
fn default_fs_percent_threshold() -> Option<u8> {
    Some(crate::queue::disk::DEFAULT_FS_PERCENT_THRESHOLD)
}

fn default_gc_interval_secs() -> u64 {
    crate::sender::DEFAULT_GC_INTERVAL.as_secs()
}

fn default_listener_url() -> String {
    DEFAULT_LISTENER_URL.to_string()
}

fn default_drain_timeout_secs() -> u64 {
    crate::sender::DEFAULT_DRAIN_TIMEOUT.as_secs()
}

/// Sender configuration file.
///
/// ```yaml
/// token: aBcDeFgHiJkLmNoPqRsT
/// type: nginx
/// listener-url: https://listener.logz.io:8071
/// drain-timeout-secs: 5
/// compress: true
/// queue:
///   kind: disk
///   dir: /var/lib/logzio-buffer
/// filters:
///   - id: 1
///     title: errors
///     query: level:ERROR
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SenderConfig {
    /// Account token.
    pub token: String,

    /// Log type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub log_type: Option<String>,

    /// Listener base URL.
    #[serde(default = "default_listener_url")]
    pub listener_url: String,

    /// Seconds between drains.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Gzip payloads.
    #[serde(default)]
    pub compress: bool,

    /// Report internal progress.
    #[serde(default)]
    pub debug: bool,

    /// Buffer to use.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Real-time queries; when non-empty only matching logs are shipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<RtQuery>,
}

impl SenderConfig {
    /// Creates a configuration with defaults for everything but the token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            log_type: None,
            listener_url: default_listener_url(),
            drain_timeout_secs: default_drain_timeout_secs(),
            compress: false,
            debug: false,
            queue: QueueConfig::default(),
            filters: Vec::new(),
        }
    }

    /// A sender builder carrying every setting of this file.
    #[must_use]
    pub fn sender_builder(&self) -> LogzioSenderBuilder {
        let mut builder = LogzioSender::builder()
            .token(&self.token)
            .listener_url(&self.listener_url)
            .drain_timeout(Duration::from_secs(self.drain_timeout_secs))
            .compress_requests(self.compress)
            .debug(self.debug)
            .filters(self.filters.clone());
        if let Some(log_type) = &self.log_type {
            builder = builder.log_type(log_type);
        }

        match &self.queue {
            QueueConfig::Memory { capacity_bytes } => builder.in_memory_queue(
                InMemoryQueue::builder().capacity_bytes(*capacity_bytes),
            ),
            QueueConfig::Disk {
                dir,
                fs_percent_threshold,
                gc_interval_secs,
            } => builder
                .gc_interval(Duration::from_secs(*gc_interval_secs))
                .disk_queue(
                    DiskQueue::builder()
                        .buffer_dir(dir)
                        .fs_percent_threshold(*fs_percent_threshold),
                ),
        }
    }

    /// Load configuration from a file
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read and [`Error::Config`] if
    /// it is not valid configuration YAML.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        serde_yaml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = HttpsRequestConfiguration::builder()
            .token("tok")
            .build()
            .unwrap();

        assert_eq!(config.token(), "tok");
        assert_eq!(config.log_type(), None);
        assert_eq!(config.max_retries_attempts(), 3);
        assert_eq!(config.initial_wait_before_retry(), Duration::from_millis(2000));
        assert_eq!(config.socket_timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_method(), &reqwest::Method::POST);
        assert!(!config.compress_requests());
        assert_eq!(
            config.listener_url().as_str(),
            "https://listener.logz.io:8071/?token=tok"
        );
    }

    #[test]
    fn url_carries_token_and_type() {
        let config = HttpsRequestConfiguration::builder()
            .token("aBcDeF")
            .log_type("nginx")
            .listener_url("http://127.0.0.1:8070")
            .build()
            .unwrap();

        assert_eq!(
            config.listener_url().as_str(),
            "http://127.0.0.1:8070/?token=aBcDeF&type=nginx"
        );
    }

    #[test]
    fn query_values_are_encoded() {
        let config = HttpsRequestConfiguration::builder()
            .token("a&b")
            .log_type("my type")
            .listener_url("http://localhost:1")
            .build()
            .unwrap();

        let pairs: Vec<(String, String)> = config
            .listener_url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("token".to_string(), "a&b".to_string()),
                ("type".to_string(), "my type".to_string()),
            ]
        );
    }

    #[test]
    fn missing_token_is_a_parameter_error() {
        let err = HttpsRequestConfiguration::builder().build().unwrap_err();
        assert!(err.to_string().contains("logzioToken can't be null"));
    }

    #[rstest]
    #[case::no_scheme("listener.logz.io")]
    #[case::garbage("::not a url::")]
    fn bad_url_is_a_parameter_error(#[case] url: &str) {
        let err = HttpsRequestConfiguration::builder()
            .token("t")
            .listener_url(url)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Parameter { .. }));
        assert!(err.to_string().contains("could not initialize URL"));
    }

    #[test]
    fn bad_method_is_a_parameter_error() {
        let err = HttpsRequestConfiguration::builder()
            .token("t")
            .request_method("PO ST")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("requestMethod"));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let config = HttpsRequestConfiguration::builder()
            .token("t")
            .max_retries_attempts(0)
            .build()
            .unwrap();
        assert_eq!(config.max_retries_attempts(), 1);
    }

    #[test]
    fn minimal_yaml_uses_defaults() {
        let config: SenderConfig = serde_yaml::from_str("token: abc\n").unwrap();
        assert_eq!(config, SenderConfig::new("abc"));
        assert_eq!(
            config.queue,
            QueueConfig::Memory {
                capacity_bytes: Some(100 * 1024 * 1024)
            }
        );
    }

    #[test]
    fn full_yaml_parses() {
        let yaml = r"
token: aBcDeFgHiJkLmNoPqRsT
type: nginx
listener-url: http://localhost:8070
drain-timeout-secs: 2
compress: true
debug: true
queue:
  kind: disk
  dir: /tmp/buffer
  fs-percent-threshold: null
filters:
  - id: 7
    title: Errors last hour
    query: level:ERROR
    hostname: [web-1, web-2]
    startDate: 1700000000000
";
        let config: SenderConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_type.as_deref(), Some("nginx"));
        assert_eq!(config.drain_timeout_secs, 2);
        assert!(config.compress);
        assert_eq!(
            config.queue,
            QueueConfig::Disk {
                dir: PathBuf::from("/tmp/buffer"),
                fs_percent_threshold: None,
                gc_interval_secs: 30,
            }
        );
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.filters[0].id(), 7);
        assert_eq!(config.filters[0].tag(), None);
        assert_eq!(config.filters[0].start_date(), 1_700_000_000_000);
    }

    #[test]
    fn unknown_queue_kind_is_rejected() {
        let result: std::result::Result<SenderConfig, _> =
            serde_yaml::from_str("token: a\nqueue:\n  kind: redis\n");
        assert!(result.is_err());
    }

    #[test]
    fn sender_builder_applies_file_settings() {
        let temp = TempDir::new().unwrap();
        let mut config = SenderConfig::new("tok");
        config.log_type = Some("app".to_string());
        config.listener_url = "http://localhost:8070".to_string();
        config.queue = QueueConfig::Disk {
            dir: temp.path().join("buffer"),
            fs_percent_threshold: None,
            gc_interval_secs: 1,
        };

        let sender = config.sender_builder().build().unwrap();

        assert_eq!(sender.log_type(), Some("app"));
        assert_eq!(
            sender.request_configuration().listener_url().as_str(),
            "http://localhost:8070/?token=tok&type=app"
        );
        assert!(temp.path().join("buffer").is_dir());
    }

    #[tokio::test]
    async fn save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logzio.yaml");

        let mut config = SenderConfig::new("tok");
        config.log_type = Some("app".to_string());
        config.filters.push(RtQuery::new(1, "t", "q", Some(vec![]), None, 0, 0));
        config.save(&path).await.unwrap();

        let loaded = SenderConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn load_reports_invalid_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.yaml");
        tokio::fs::write(&path, "token: [unclosed").await.unwrap();

        let err = SenderConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
