//! Buffered, batching log shipper for Logz.io compatible HTTP listeners.
//!
//! Logs are enqueued in a memory or disk buffer and shipped periodically in
//! newline-delimited batches, optionally gzip-compressed. Failed batches are
//! retried with exponential back-off and returned to the buffer when the
//! listener stays unavailable. Real-time queries ([`RtQuery`]) can restrict
//! shipping to matching JSON logs.
//!
//! # Example
//!
//! ```no_run
//! use logzio_sender::LogzioSender;
//! use logzio_sender::queue::DiskQueue;
//!
//! # async fn example() -> logzio_sender::Result<()> {
//! let sender = LogzioSender::builder()
//!     .token("aBcDeFgHiJkLmNoPqRsT")
//!     .log_type("app")
//!     .compress_requests(true)
//!     .disk_queue(DiskQueue::builder().buffer_dir("/tmp/logzio-buffer"))
//!     .build()?;
//! sender.start();
//! sender.send(r#"{"message":"started"}"#);
//! sender.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod model;
pub mod queue;
pub mod reporter;
pub mod sender;

pub use config::{HttpsRequestConfiguration, HttpsRequestConfigurationBuilder, SenderConfig};
pub use error::{Error, Result};
pub use model::RtQuery;
pub use reporter::{StatusReporter, TracingReporter};
pub use sender::{LogzioSender, LogzioSenderBuilder, SenderRegistry};
