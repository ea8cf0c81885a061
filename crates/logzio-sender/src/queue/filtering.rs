//! Queue decorator that keeps only logs matching real-time queries.

use super::LogsQueue;
use crate::error::Result;
use crate::filter::{Filter, RtQueryFilter};
use crate::model::RtQuery;
use crate::reporter::{StatusReporter, TracingReporter};
use std::sync::Arc;

/// Wraps another queue and drops logs that match none of its filters.
///
/// With no filters every log is forwarded. With filters, a log is parsed as
/// JSON and forwarded if at least one filter matches; logs that are not valid
/// JSON are dropped with a warning.
pub struct FilteringQueue {
    inner: Arc<dyn LogsQueue>,
    filters: Vec<Box<dyn Filter>>,
    reporter: Arc<dyn StatusReporter>,
}

impl std::fmt::Debug for FilteringQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteringQueue")
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

impl FilteringQueue {
    /// Creates a filtering queue with no filters.
    #[must_use]
    pub fn new(inner: Arc<dyn LogsQueue>) -> Self {
        Self {
            inner,
            filters: Vec::new(),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Creates a filtering queue with one [`RtQueryFilter`] per query.
    #[must_use]
    pub fn from_queries(inner: Arc<dyn LogsQueue>, queries: impl IntoIterator<Item = RtQuery>) -> Self {
        let mut queue = Self::new(inner);
        for query in queries {
            queue = queue.with_filter(Box::new(RtQueryFilter::new(query)));
        }
        queue
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Box<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets where dropped-log warnings go.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Number of configured filters.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    fn should_enqueue(&self, log: &[u8]) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        match serde_json::from_slice::<serde_json::Value>(log) {
            Ok(json) => self.filters.iter().any(|filter| filter.matches(&json)),
            Err(e) => {
                self.reporter
                    .warning(&format!("Dropping log that is not valid JSON: {e}"));
                false
            }
        }
    }
}

impl LogsQueue for FilteringQueue {
    fn enqueue(&self, log: Vec<u8>) {
        if self.should_enqueue(&log) {
            self.inner.enqueue(log);
        }
    }

    fn dequeue(&self) -> Option<Vec<u8>> {
        self.inner.dequeue()
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn gc(&self) -> Result<()> {
        self.inner.gc()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
