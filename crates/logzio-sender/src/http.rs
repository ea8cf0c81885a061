//! Delivery of log batches to the listener.

use crate::config::HttpsRequestConfiguration;
use crate::error::{Error, Result};
use crate::reporter::StatusReporter;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::io::Write;
use std::sync::Arc;

const NEW_LINE: &[u8] = b"\n";

/// Outcome of a single request.
enum Attempt {
    /// The listener took the batch, or rejected it for good.
    Done,
    /// Worth trying again.
    Retry { code: u16, message: String },
}

/// Sends batches to a listener, retrying with exponential back-off.
pub struct HttpSender {
    client: reqwest::Client,
    configuration: HttpsRequestConfiguration,
    reporter: Arc<dyn StatusReporter>,
}

impl std::fmt::Debug for HttpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSender")
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

impl HttpSender {
    /// Creates a sender for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be initialised.
    pub fn new(
        configuration: HttpsRequestConfiguration,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        if configuration.compress_requests() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("rust/", env!("CARGO_PKG_VERSION"), "/logs"))
            .default_headers(headers)
            .connect_timeout(configuration.connect_timeout())
            .read_timeout(configuration.socket_timeout())
            .build()?;

        Ok(Self {
            client,
            configuration,
            reporter,
        })
    }

    /// The configuration this sender was built with.
    #[must_use]
    pub fn configuration(&self) -> &HttpsRequestConfiguration {
        &self.configuration
    }

    /// Sends one batch.
    ///
    /// A `400` or `401` answer is reported and the batch is dropped; those
    /// are not retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Server`] when every attempt failed, so the caller can
    /// keep the batch for a later run.
    pub async fn send_to_logzio(&self, messages: &[Vec<u8>]) -> Result<()> {
        let payload = self.payload(messages)?;
        let max_attempts = self.configuration.max_retries_attempts();
        let mut retry_wait = self.configuration.initial_wait_before_retry();

        for attempt in 1..=max_attempts {
            let (code, message) = match self.attempt(&payload).await {
                Attempt::Done => return Ok(()),
                Attempt::Retry { code, message } => (code, message),
            };

            if attempt == max_attempts {
                return Err(Error::Server(format!(
                    "Got HTTP {code} code from logz.io, with message: {message}"
                )));
            }

            self.reporter.warning(&format!(
                "Could not send log to logz.io, retry ({attempt}/{max_attempts})"
            ));
            self.reporter.warning(&format!(
                "Sleeping for {} ms and will try again.",
                retry_wait.as_millis()
            ));
            tokio::time::sleep(retry_wait).await;
            retry_wait *= 2;
        }

        Ok(())
    }

    async fn attempt(&self, payload: &[u8]) -> Attempt {
        let response = match self
            .client
            .request(
                self.configuration.request_method().clone(),
                self.configuration.listener_url().clone(),
            )
            .body(payload.to_vec())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.reporter.error(&format!("Got IO exception - {e}"));
                return Attempt::Retry {
                    code: 0,
                    message: e.to_string(),
                };
            }
        };

        let status = response.status();
        let reason = status.canonical_reason().unwrap_or_default().to_string();

        if status.is_success() {
            self.reporter.info(&format!(
                "Successfully sent bulk to logz.io, size: {}",
                payload.len()
            ));
            return Attempt::Done;
        }

        match status {
            StatusCode::BAD_REQUEST => {
                let output: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .lines()
                    .map(|line| format!("\n{line}"))
                    .collect();
                self.reporter.warning(&format!(
                    "Got 400 from logzio, here is the output: {output}"
                ));
                Attempt::Done
            }
            StatusCode::UNAUTHORIZED => {
                self.reporter.error(&format!(
                    "Logz.io: Got forbidden! Your token is not right. Unfortunately, dropping logs. Message: {reason}"
                ));
                Attempt::Done
            }
            _ => Attempt::Retry {
                code: status.as_u16(),
                message: reason,
            },
        }
    }

    fn payload(&self, messages: &[Vec<u8>]) -> Result<Vec<u8>> {
        let size: usize = messages.iter().map(|m| m.len() + NEW_LINE.len()).sum();
        let mut plain = Vec::with_capacity(size);
        for message in messages {
            plain.extend_from_slice(message);
            plain.extend_from_slice(NEW_LINE);
        }

        if !self.configuration.compress_requests() {
            return Ok(plain);
        }

        let mut encoder = GzEncoder::new(Vec::with_capacity(size / 4), Compression::default());
        encoder.write_all(&plain)?;
        Ok(encoder.finish()?)
    }
}
