//! A mock Logz.io bulk listener for tests.
//!
//! [`MockBulkListener`] binds an HTTP server on a free loopback port and
//! records every log line it receives, together with the `token` and `type`
//! query parameters of the request that carried it. The method and headers of
//! each request are kept too. Tests can make it fail,
//! answer with a fixed status or stall to exercise the sender's retry paths.
//!
//! ```no_run
//! use logzio_sender_test::MockBulkListener;
//!
//! # async fn example() -> Result<(), logzio_sender_test::Error> {
//! let listener = MockBulkListener::start().await?;
//! // point a sender at listener.url() ...
//! assert!(listener.find_by_message("hello").is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header::CONTENT_ENCODING};
use axum::routing::any;
use flate2::read::GzDecoder;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const LISTENER_ADDRESS: &str = "127.0.0.1:0";

/// Larger than any batch a sender produces.
const MAX_BULK_SIZE: usize = 64 * 1024 * 1024;

/// Errors raised while starting or stopping the listener.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket could not be bound.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server task ended abnormally.
    #[error("Listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One log line received by the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRequest {
    token: String,
    log_type: Option<String>,
    json: Value,
}

impl LogRequest {
    /// The `token` query parameter.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The `type` query parameter.
    #[must_use]
    pub fn log_type(&self) -> Option<&str> {
        self.log_type.as_deref()
    }

    /// The parsed log line.
    #[must_use]
    pub fn json(&self) -> &Value {
        &self.json
    }

    /// The `message` field.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.string_field("message")
    }

    /// A top-level string field.
    #[must_use]
    pub fn string_field(&self, name: &str) -> Option<&str> {
        self.json.get(name).and_then(Value::as_str)
    }
}

impl std::fmt::Display for LogRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[Token = {}, type = {}]: {}",
            self.token,
            self.log_type.as_deref().unwrap_or(""),
            self.json
        )
    }
}

/// Method and headers of one HTTP request, whatever its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRequest {
    method: String,
    headers: Vec<(String, String)>,
}

impl BulkRequest {
    fn new(method: &Method, headers: &HeaderMap) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self {
            method: method.as_str().to_string(),
            headers,
        }
    }

    /// The HTTP method, e.g. `POST`.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// First value of the header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Default)]
struct Shared {
    bulks: Mutex<Vec<BulkRequest>>,
    requests: Mutex<Vec<LogRequest>>,
    malformed: AtomicUsize,
    fail_with_server_error: AtomicBool,
    response_status: Mutex<Option<u16>>,
    server_timeout: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why a bulk request was rejected.
#[derive(Debug, thiserror::Error)]
enum Malformed {
    #[error("Token not found in query string")]
    MissingToken,
    #[error("Could not decompress body: {0}")]
    Gzip(std::io::Error),
    #[error("Not a valid json received in body of request. logLine = {0}")]
    NotJson(String),
}

fn decode_body(headers: &HeaderMap, body: &[u8]) -> Result<String, Malformed> {
    let gzip = headers
        .get(CONTENT_ENCODING)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"gzip"));
    if gzip {
        let mut text = String::new();
        GzDecoder::new(body)
            .read_to_string(&mut text)
            .map_err(Malformed::Gzip)?;
        Ok(text)
    } else {
        Ok(String::from_utf8_lossy(body).into_owned())
    }
}

impl Shared {
    fn record(
        &self,
        params: &HashMap<String, String>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), Malformed> {
        let token = params.get("token").ok_or(Malformed::MissingToken)?;
        let log_type = params.get("type");
        let text = decode_body(headers, body)?;

        // Lines before a bad one are kept.
        for line in text.lines().filter(|line| !line.is_empty()) {
            let json = serde_json::from_str::<Value>(line)
                .ok()
                .filter(Value::is_object)
                .ok_or_else(|| Malformed::NotJson(line.to_string()))?;
            tracing::debug!(%line, "got log");
            lock(&self.requests).push(LogRequest {
                token: token.clone(),
                log_type: log_type.cloned(),
                json,
            });
        }
        Ok(())
    }
}

async fn bulk(
    State(shared): State<Arc<Shared>>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    tracing::debug!(%method, ?params, "got request");
    lock(&shared.bulks).push(BulkRequest::new(&method, &headers));

    let timeout = *lock(&shared.server_timeout);
    if let Some(timeout) = timeout {
        tokio::time::sleep(timeout).await;
        return StatusCode::OK;
    }

    let status = *lock(&shared.response_status);
    if let Some(status) = status {
        return StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if shared.fail_with_server_error.load(Ordering::Acquire) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    match shared.record(&params, &headers, &body) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::debug!(error = %e, "malformed bulk");
            shared.malformed.fetch_add(1, Ordering::AcqRel);
            StatusCode::BAD_REQUEST
        }
    }
}

/// An in-process bulk listener.
///
/// The server runs until [`stop`](Self::stop) is called or the listener is
/// dropped.
#[derive(Debug)]
pub struct MockBulkListener {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl MockBulkListener {
    /// Binds a free loopback port and starts serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn start() -> Result<Self, Error> {
        let shared = Arc::new(Shared::default());
        let app = Router::new()
            .route("/", any(bulk))
            .layer(DefaultBodyLimit::max(MAX_BULK_SIZE))
            .with_state(Arc::clone(&shared));

        let listener = TcpListener::bind(LISTENER_ADDRESS).await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        tracing::info!(%addr, "Started mock listener");

        Ok(Self {
            addr,
            shared,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    /// Base URL to point a sender at, e.g. `http://127.0.0.1:41234`.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Bound socket address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Answer every request with `500` while set.
    pub fn set_fail_with_server_error(&self, fail: bool) {
        self.shared
            .fail_with_server_error
            .store(fail, Ordering::Release);
    }

    /// Answer every request with this status, recording nothing.
    pub fn set_response_status(&self, status: Option<u16>) {
        *lock(&self.shared.response_status) = status;
    }

    /// Sleep this long before answering, recording nothing.
    pub fn set_server_timeout(&self, timeout: Option<Duration>) {
        *lock(&self.shared.server_timeout) = timeout;
    }

    /// Every log received so far, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<LogRequest> {
        lock(&self.shared.requests).clone()
    }

    /// Every HTTP request received so far, including rejected ones.
    #[must_use]
    pub fn requests(&self) -> Vec<BulkRequest> {
        lock(&self.shared.bulks).clone()
    }

    /// Number of logs received so far.
    #[must_use]
    pub fn number_of_received_msgs(&self) -> usize {
        lock(&self.shared.requests).len()
    }

    /// Number of requests rejected as malformed.
    #[must_use]
    pub fn malformed_count(&self) -> usize {
        self.shared.malformed.load(Ordering::Acquire)
    }

    /// First received log whose `message` field equals `message`.
    #[must_use]
    pub fn find_by_message(&self, message: &str) -> Option<LogRequest> {
        lock(&self.shared.requests)
            .iter()
            .find(|request| request.message() == Some(message))
            .cloned()
    }

    /// Shuts the server down and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the server task failed.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.await??;
        }
        tracing::info!(addr = %self.addr, "Stopped mock listener");
        Ok(())
    }
}

impl Drop for MockBulkListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use rstest::rstest;
    use std::io::Write;

    async fn post(listener: &MockBulkListener, query: &str, body: &str) -> reqwest::StatusCode {
        reqwest::Client::new()
            .post(format!("{}/?{query}", listener.url()))
            .body(body.to_string())
            .send()
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn records_lines_with_token_and_type() {
        let listener = MockBulkListener::start().await.unwrap();

        let status = post(
            &listener,
            "token=abc&type=web",
            "{\"message\":\"one\"}\n{\"message\":\"two\"}\n",
        )
        .await;

        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(listener.number_of_received_msgs(), 2);
        let two = listener.find_by_message("two").unwrap();
        assert_eq!(two.token(), "abc");
        assert_eq!(two.log_type(), Some("web"));
        assert_eq!(
            two.to_string(),
            r#"[Token = abc, type = web]: {"message":"two"}"#
        );
    }

    #[tokio::test]
    async fn inflates_gzip_bodies() {
        let listener = MockBulkListener::start().await.unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"message\":\"zipped\"}\n").unwrap();

        let status = reqwest::Client::new()
            .post(format!("{}/?token=t", listener.url()))
            .header("Content-Encoding", "gzip")
            .body(encoder.finish().unwrap())
            .send()
            .await
            .unwrap()
            .status();

        assert_eq!(status, reqwest::StatusCode::OK);
        assert!(listener.find_by_message("zipped").is_some());
    }

    #[rstest]
    #[case::not_json("token=t", "plain text\n")]
    #[case::not_an_object("token=t", "[1,2]\n")]
    #[case::no_token("type=x", "{\"message\":\"m\"}\n")]
    #[tokio::test]
    async fn malformed_requests_get_400(#[case] query: &str, #[case] body: &str) {
        let listener = MockBulkListener::start().await.unwrap();

        let status = post(&listener, query, body).await;

        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(listener.malformed_count(), 1);
        assert_eq!(listener.number_of_received_msgs(), 0);
    }

    #[tokio::test]
    async fn failure_modes_record_nothing() {
        let listener = MockBulkListener::start().await.unwrap();

        listener.set_fail_with_server_error(true);
        assert_eq!(
            post(&listener, "token=t", "{\"message\":\"x\"}").await,
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        );

        listener.set_fail_with_server_error(false);
        listener.set_response_status(Some(401));
        assert_eq!(
            post(&listener, "token=t", "{\"message\":\"x\"}").await,
            reqwest::StatusCode::UNAUTHORIZED
        );

        listener.set_response_status(None);
        listener.set_server_timeout(Some(Duration::from_millis(10)));
        assert_eq!(
            post(&listener, "token=t", "{\"message\":\"x\"}").await,
            reqwest::StatusCode::OK
        );

        assert_eq!(listener.number_of_received_msgs(), 0);
    }

    #[tokio::test]
    async fn keeps_method_and_headers_of_every_request() {
        let listener = MockBulkListener::start().await.unwrap();

        reqwest::Client::new()
            .put(format!("{}/?token=t", listener.url()))
            .header("Content-Type", "text/plain")
            .body("{\"message\":\"put\"}\n")
            .send()
            .await
            .unwrap();
        post(&listener, "type=x", "not recorded as a log").await;

        let requests = listener.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method(), "PUT");
        assert_eq!(requests[0].header("content-type"), Some("text/plain"));
        assert_eq!(requests[1].method(), "POST");
        assert!(listener.find_by_message("put").is_some());
    }

    #[tokio::test]
    async fn stop_closes_the_port() {
        let mut listener = MockBulkListener::start().await.unwrap();
        let url = listener.url();

        listener.stop().await.unwrap();

        let result = reqwest::Client::new().post(url).body("x").send().await;
        assert!(result.is_err());
    }
}
