//! Status reporting for the sender and its buffers.
//!
//! The sender never propagates errors out of its background loops. Instead,
//! everything worth telling the host application (dropped logs, rejected
//! tokens, retry progress) goes through a [`StatusReporter`].
//!
//! [`TracingReporter`] is the default and forwards every message to
//! `tracing`. Applications that route their own logs through the sender should
//! supply a reporter that does not log back into it.

use std::fmt;

/// Receives status messages from the sender, its queues and its HTTP client.
pub trait StatusReporter: Send + Sync {
    /// Something failed and logs may have been lost.
    fn error(&self, msg: &str);

    /// Something failed, with the underlying cause.
    fn error_with_source(&self, msg: &str, source: &dyn std::error::Error) {
        self.error(&format!("{msg}: {source}"));
    }

    /// A recoverable problem, such as a dropped log or a retry.
    fn warning(&self, msg: &str);

    /// Progress information.
    fn info(&self, msg: &str);
}

/// A [`StatusReporter`] that emits through the `tracing` macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn error(&self, msg: &str) {
        tracing::error!(target: "logzio_sender", "{msg}");
    }

    fn error_with_source(&self, msg: &str, source: &dyn std::error::Error) {
        tracing::error!(target: "logzio_sender", error = %source, "{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!(target: "logzio_sender", "{msg}");
    }

    fn info(&self, msg: &str) {
        tracing::info!(target: "logzio_sender", "{msg}");
    }
}

/// Severity of a reported message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Reported through [`StatusReporter::error`].
    Error,
    /// Reported through [`StatusReporter::warning`].
    Warning,
    /// Reported through [`StatusReporter::info`].
    Info,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use collecting::CollectingReporter;

#[cfg(any(test, feature = "test-util"))]
mod collecting {
    use super::{Level, StatusReporter};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    /// A reporter that keeps every message for later inspection.
    ///
    /// Clones share the same message list, so one clone can be handed to the
    /// sender while the test holds another.
    #[derive(Debug, Clone, Default)]
    pub struct CollectingReporter {
        messages: Arc<Mutex<Vec<(Level, String)>>>,
    }

    impl CollectingReporter {
        /// Creates an empty reporter.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A copy of every message reported so far, in order.
        #[must_use]
        pub fn messages(&self) -> Vec<(Level, String)> {
            self.lock().clone()
        }

        /// Messages reported at the given level.
        #[must_use]
        pub fn at(&self, level: Level) -> Vec<String> {
            self.messages()
                .into_iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m)
                .collect()
        }

        /// Whether any message at `level` contains `needle`.
        #[must_use]
        pub fn contains(&self, level: Level, needle: &str) -> bool {
            self.at(level).iter().any(|m| m.contains(needle))
        }

        fn push(&self, level: Level, msg: &str) {
            self.lock().push((level, msg.to_string()));
        }

        pub(super) fn lock(&self) -> MutexGuard<'_, Vec<(Level, String)>> {
            self.messages.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl StatusReporter for CollectingReporter {
        fn error(&self, msg: &str) {
            self.push(Level::Error, msg);
        }

        fn warning(&self, msg: &str) {
            self.push(Level::Warning, msg);
        }

        fn info(&self, msg: &str) {
            self.push(Level::Info, msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn collecting_reporter_records_levels_in_order() {
        let reporter = CollectingReporter::new();
        reporter.info("one");
        reporter.warning("two");
        reporter.error("three");

        assert_eq!(
            reporter.messages(),
            vec![
                (Level::Info, "one".to_string()),
                (Level::Warning, "two".to_string()),
                (Level::Error, "three".to_string()),
            ]
        );
    }

    #[test]
    fn error_with_source_appends_cause() {
        let reporter = CollectingReporter::new();
        let cause = io::Error::other("disk on fire");
        reporter.error_with_source("gc failed", &cause);

        assert!(reporter.contains(Level::Error, "gc failed: disk on fire"));
    }

    #[test]
    fn clones_share_messages() {
        let reporter = CollectingReporter::new();
        let clone = reporter.clone();
        clone.warning("shared");
        assert_eq!(reporter.at(Level::Warning), vec!["shared".to_string()]);
    }

    #[test]
    fn poisoned_reporter_keeps_recording() {
        let reporter = CollectingReporter::new();
        reporter.info("before");

        let poisoner = reporter.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison the message list");
        })
        .join();

        reporter.warning("after");
        assert_eq!(reporter.messages().len(), 2);
        assert!(reporter.contains(Level::Warning, "after"));
    }

    #[test]
    fn tracing_reporter_is_usable_as_trait_object() {
        let reporter: &dyn StatusReporter = &TracingReporter;
        reporter.info("hello");
        reporter.error_with_source("boom", &io::Error::other("cause"));
    }

    #[test]
    fn level_display() {
        assert_eq!(Level::Error.to_string(), "error");
        assert_eq!(Level::Warning.to_string(), "warning");
        assert_eq!(Level::Info.to_string(), "info");
    }
}
