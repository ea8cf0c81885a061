//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use logzio_sender::queue::InMemoryQueue;
use logzio_sender::reporter::CollectingReporter;
use logzio_sender::{LogzioSender, LogzioSenderBuilder};
use logzio_sender_test::MockBulkListener;
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN: &str = "aBcDeFgHiJkLmNoPqRsTuVwXyZ";
pub const LOG_TYPE: &str = "integration";

/// A builder pointed at `listener` with fast retries and an unbounded
/// in-memory queue.
pub fn builder_for(listener: &MockBulkListener, reporter: &CollectingReporter) -> LogzioSenderBuilder {
    LogzioSender::builder()
        .token(TOKEN)
        .log_type(LOG_TYPE)
        .listener_url(listener.url())
        .max_retries_attempts(2)
        .initial_wait_before_retry(Duration::from_millis(10))
        .socket_timeout(Duration::from_secs(2))
        .connect_timeout(Duration::from_secs(2))
        .in_memory_queue(InMemoryQueue::builder().capacity_bytes(None))
        .reporter(Arc::new(reporter.clone()))
}

/// A JSON log line with the given message.
pub fn log_line(message: &str) -> String {
    serde_json::json!({
        "message": message,
        "hostname": "web-1",
        "level": "INFO",
        "@timestamp": "2024-05-01T12:00:00Z",
    })
    .to_string()
}
