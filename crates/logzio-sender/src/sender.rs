//! The scheduled shipper.
//!
//! A [`LogzioSender`] owns a queue and an [`HttpSender`]. Callers enqueue
//! lines with [`LogzioSender::send`]; two background loops started by
//! [`LogzioSender::start`] drain the queue into batches and collect garbage
//! left behind by the queue.

use crate::config::{HttpsRequestConfiguration, HttpsRequestConfigurationBuilder};
use crate::error::{Error, Result};
use crate::http::HttpSender;
use crate::model::RtQuery;
use crate::queue::{
    DiskQueueBuilder, FilteringQueue, InMemoryQueueBuilder, LogsQueue, ONE_MEGABYTE_IN_BYTES,
};
use crate::reporter::{StatusReporter, TracingReporter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default interval between drains.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between queue garbage collections.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on the final drain performed by [`LogzioSender::stop`].
pub const FINAL_DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// A batch is sent once it reaches this many bytes.
#[allow(clippy::cast_possible_truncation)]
pub const MAX_BATCH_SIZE_IN_BYTES: usize = 3 * ONE_MEGABYTE_IN_BYTES as usize;

/// Background tasks of a started sender.
struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct Inner {
    log_type: Option<String>,
    queue: Arc<dyn LogsQueue>,
    http: HttpSender,
    reporter: Arc<dyn StatusReporter>,
    debug: bool,
    drain_timeout: Duration,
    gc_interval: Duration,
    drain_running: AtomicBool,
    running: Mutex<Option<Running>>,
}

/// Resets the drain flag even if the drain future is dropped mid-way.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    fn debug(&self, msg: &str) {
        if self.debug {
            self.reporter.info(&format!("DEBUG: {msg}"));
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drain_queue_and_send(&self) {
        if self.drain_running.swap(true, Ordering::AcqRel) {
            self.debug("Drain is running so we won't run another one in parallel");
            return;
        }
        let _guard = DrainGuard(&self.drain_running);
        self.drain_queue().await;
    }

    async fn drain_queue(&self) {
        self.debug("Attempting to drain queue");
        while !self.queue.is_empty() {
            let batch = self.dequeue_up_to_max_batch_size();
            if batch.is_empty() {
                break;
            }

            match self.http.send_to_logzio(&batch).await {
                Ok(()) => {}
                Err(e @ Error::Server(_)) => {
                    self.debug(&format!("Could not send log to logz.io: {e}"));
                    self.debug("Will retry in the next interval");
                    for message in batch {
                        self.queue.enqueue(message);
                    }
                    break;
                }
                Err(e) => {
                    self.reporter
                        .error_with_source("Uncaught error from Logz.io sender", &e);
                    break;
                }
            }
        }
    }

    fn dequeue_up_to_max_batch_size(&self) -> Vec<Vec<u8>> {
        let mut batch = Vec::new();
        let mut size = 0;
        while let Some(message) = self.queue.dequeue() {
            if message.is_empty() {
                continue;
            }
            size += message.len();
            batch.push(message);
            if size >= MAX_BATCH_SIZE_IN_BYTES {
                break;
            }
        }
        batch
    }

    fn gc(&self) {
        if let Err(e) = self.queue.gc() {
            self.reporter
                .error_with_source("Uncaught error from queue gc", &e);
        }
    }
}

async fn drain_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(inner.drain_timeout);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => inner.drain_queue_and_send().await,
        }
    }
}

async fn gc_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(inner.gc_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => inner.gc(),
        }
    }
}

/// Buffers log lines and ships them to a Logz.io listener in batches.
///
/// Cloning is cheap; clones share the queue and the background tasks.
///
/// # Examples
///
/// ```no_run
/// use logzio_sender::LogzioSender;
///
/// # async fn example() -> logzio_sender::Result<()> {
/// let sender = LogzioSender::builder()
///     .token("aBcDeFgHiJkLmNoPqRsT")
///     .log_type("nginx")
///     .build()?;
/// sender.start();
///
/// sender.send(r#"{"message":"hello"}"#);
///
/// sender.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LogzioSender {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LogzioSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogzioSender")
            .field("log_type", &self.inner.log_type)
            .field("http", &self.inner.http)
            .field("drain_timeout", &self.inner.drain_timeout)
            .field("gc_interval", &self.inner.gc_interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl LogzioSender {
    /// Starts building a sender.
    #[must_use]
    pub fn builder() -> LogzioSenderBuilder {
        LogzioSenderBuilder::default()
    }

    /// The log type this sender ships as.
    #[must_use]
    pub fn log_type(&self) -> Option<&str> {
        self.inner.log_type.as_deref()
    }

    /// The queue logs are buffered in.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn LogsQueue> {
        &self.inner.queue
    }

    /// The request configuration.
    #[must_use]
    pub fn request_configuration(&self) -> &HttpsRequestConfiguration {
        self.inner.http.configuration()
    }

    /// Returns `true` between [`start`](Self::start) and
    /// [`stop`](Self::stop).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running().is_some()
    }

    /// Enqueues one log line.
    pub fn send(&self, message: &str) {
        self.send_bytes(message.as_bytes().to_vec());
    }

    /// Enqueues a JSON document as a single compact line.
    pub fn send_json(&self, message: &serde_json::Value) {
        self.send_bytes(message.to_string().into_bytes());
    }

    /// Enqueues a raw log line.
    pub fn send_bytes(&self, message: Vec<u8>) {
        self.inner.queue.enqueue(message);
    }

    /// Spawns the drain and gc loops on the current tokio runtime. Calling it
    /// again while the loops are running does nothing.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) {
        let mut running = self.inner.running();
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handles = vec![
            tokio::spawn(drain_loop(Arc::clone(&self.inner), cancel.clone())),
            tokio::spawn(gc_loop(Arc::clone(&self.inner), cancel.clone())),
        ];
        *running = Some(Running { cancel, handles });
        drop(running);

        self.inner.debug(&format!(
            "Started drain every {:?} and gc every {:?}",
            self.inner.drain_timeout, self.inner.gc_interval
        ));
    }

    /// Runs one drain now. Does nothing if another drain is in progress.
    /// Failures are reported, never returned.
    pub async fn drain_queue_and_send(&self) {
        self.inner.drain_queue_and_send().await;
    }

    /// Stops the background loops and drains what is left.
    ///
    /// Waiting for an in-flight drain and the final drain together give up
    /// after [`FINAL_DRAIN_TIMEOUT`], and background tasks still running then
    /// are aborted. The queue is then garbage collected and closed.
    pub async fn stop(&self) {
        let mut handles = match self.inner.running().take() {
            Some(Running { cancel, handles }) => {
                cancel.cancel();
                handles
            }
            None => Vec::new(),
        };

        self.inner.debug(&format!(
            "Got stop request, Submitting a final drain queue task to drain before shutdown. Will timeout in {} seconds.",
            FINAL_DRAIN_TIMEOUT.as_secs()
        ));

        let inner = &self.inner;
        let final_drain = async {
            while let Some(handle) = handles.last_mut() {
                let joined = handle.await;
                handles.pop();
                if let Err(e) = joined {
                    inner.reporter.error_with_source("Background task failed", &e);
                }
            }
            inner.drain_queue_and_send().await;
        };

        if tokio::time::timeout(FINAL_DRAIN_TIMEOUT, final_drain)
            .await
            .is_err()
        {
            self.inner.debug(&format!(
                "Waited {} seconds, but could not finish draining. quitting.",
                FINAL_DRAIN_TIMEOUT.as_secs()
            ));
            for handle in &handles {
                handle.abort();
            }
            for handle in handles {
                match handle.await {
                    Err(e) if !e.is_cancelled() => {
                        self.inner
                            .reporter
                            .error_with_source("Background task failed", &e);
                    }
                    _ => {}
                }
            }
        }

        self.inner.gc();
        if let Err(e) = self.inner.queue.close() {
            self.inner
                .reporter
                .error_with_source("Could not close the queue", &e);
        }
    }
}

enum QueueChoice {
    Memory(InMemoryQueueBuilder),
    Disk(DiskQueueBuilder),
    Custom(Arc<dyn LogsQueue>),
}

/// Builder for [`LogzioSender`].
pub struct LogzioSenderBuilder {
    request: HttpsRequestConfigurationBuilder,
    drain_timeout: Duration,
    gc_interval: Duration,
    debug: bool,
    reporter: Option<Arc<dyn StatusReporter>>,
    queue: QueueChoice,
    filters: Vec<RtQuery>,
}

impl Default for LogzioSenderBuilder {
    fn default() -> Self {
        Self {
            request: HttpsRequestConfiguration::builder(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            gc_interval: DEFAULT_GC_INTERVAL,
            debug: false,
            reporter: None,
            queue: QueueChoice::Memory(InMemoryQueueBuilder::default()),
            filters: Vec::new(),
        }
    }
}

impl std::fmt::Debug for LogzioSenderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogzioSenderBuilder")
            .field("request", &self.request)
            .field("drain_timeout", &self.drain_timeout)
            .field("gc_interval", &self.gc_interval)
            .field("debug", &self.debug)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

impl LogzioSenderBuilder {
    /// Replaces all request settings at once.
    #[must_use]
    pub fn request_configuration(mut self, request: HttpsRequestConfigurationBuilder) -> Self {
        self.request = request;
        self
    }

    /// Sets the account token. Required.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.request = self.request.token(token);
        self
    }

    /// Sets the log type.
    #[must_use]
    pub fn log_type(mut self, log_type: impl Into<String>) -> Self {
        self.request = self.request.log_type(log_type);
        self
    }

    /// Sets the listener base URL.
    #[must_use]
    pub fn listener_url(mut self, url: impl Into<String>) -> Self {
        self.request = self.request.listener_url(url);
        self
    }

    /// Sets the number of attempts per batch.
    #[must_use]
    pub fn max_retries_attempts(mut self, attempts: u32) -> Self {
        self.request = self.request.max_retries_attempts(attempts);
        self
    }

    /// Sets the wait before the first retry.
    #[must_use]
    pub fn initial_wait_before_retry(mut self, wait: Duration) -> Self {
        self.request = self.request.initial_wait_before_retry(wait);
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.request = self.request.socket_timeout(timeout);
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.request = self.request.connect_timeout(timeout);
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn request_method(mut self, method: impl Into<String>) -> Self {
        self.request = self.request.request_method(method);
        self
    }

    /// Enables gzip compression of payloads.
    #[must_use]
    pub fn compress_requests(mut self, compress: bool) -> Self {
        self.request = self.request.compress_requests(compress);
        self
    }

    /// Sets the interval between drains.
    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the interval between queue garbage collections.
    #[must_use]
    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Reports internal progress as `DEBUG:` info messages.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the status reporter. Queues built by this builder without their
    /// own reporter share it.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Buffers in memory.
    #[must_use]
    pub fn in_memory_queue(mut self, queue: InMemoryQueueBuilder) -> Self {
        self.queue = QueueChoice::Memory(queue);
        self
    }

    /// Buffers on disk.
    #[must_use]
    pub fn disk_queue(mut self, queue: DiskQueueBuilder) -> Self {
        self.queue = QueueChoice::Disk(queue);
        self
    }

    /// Buffers in an already built queue.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn LogsQueue>) -> Self {
        self.queue = QueueChoice::Custom(queue);
        self
    }

    /// Only ships logs matching at least one of these queries.
    #[must_use]
    pub fn filters(mut self, filters: Vec<RtQuery>) -> Self {
        self.filters = filters;
        self
    }

    /// Builds the sender. The background loops are not started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parameter`] for invalid request settings or zero
    /// intervals, and any error raised while opening a disk queue.
    pub fn build(self) -> Result<LogzioSender> {
        if self.drain_timeout.is_zero() {
            return Err(Error::parameter("drainTimeout", "must be greater than zero"));
        }
        if self.gc_interval.is_zero() {
            return Err(Error::parameter(
                "gcPersistedQueueFilesIntervalSeconds",
                "must be greater than zero",
            ));
        }

        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingReporter));
        let configuration = self.request.build()?;

        let queue: Arc<dyn LogsQueue> = match self.queue {
            QueueChoice::Memory(builder) => Arc::new(builder.default_reporter(&reporter).build()),
            QueueChoice::Disk(builder) => Arc::new(builder.default_reporter(&reporter).build()?),
            QueueChoice::Custom(queue) => queue,
        };
        let queue: Arc<dyn LogsQueue> = if self.filters.is_empty() {
            queue
        } else {
            Arc::new(
                FilteringQueue::from_queries(queue, self.filters)
                    .with_reporter(Arc::clone(&reporter)),
            )
        };

        let inner = Inner {
            log_type: configuration.log_type().map(str::to_string),
            http: HttpSender::new(configuration, Arc::clone(&reporter))?,
            queue,
            reporter,
            debug: self.debug,
            drain_timeout: self.drain_timeout,
            gc_interval: self.gc_interval,
            drain_running: AtomicBool::new(false),
            running: Mutex::new(None),
        };
        inner.debug("Created new LogzioSender class");

        Ok(LogzioSender {
            inner: Arc::new(inner),
        })
    }
}

/// Keeps one sender per log type.
///
/// Several appenders configured with the same type end up sharing one
/// buffer instead of racing on it.
pub struct SenderRegistry {
    senders: Mutex<HashMap<Option<String>, LogzioSender>>,
    reporter: Arc<dyn StatusReporter>,
}

impl Default for SenderRegistry {
    fn default() -> Self {
        Self::new(Arc::new(TracingReporter))
    }
}

impl std::fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderRegistry")
            .field("senders", &self.len())
            .finish_non_exhaustive()
    }
}

impl SenderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            reporter,
        }
    }

    /// Returns the sender registered for `log_type`, or builds, stores and
    /// returns a new one.
    ///
    /// # Errors
    ///
    /// Returns whatever `build` returns; nothing is stored in that case.
    pub fn get_or_create<F>(&self, log_type: Option<&str>, build: F) -> Result<LogzioSender>
    where
        F: FnOnce() -> Result<LogzioSender>,
    {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let key = log_type.map(str::to_string);
        if let Some(sender) = senders.get(&key) {
            self.reporter.info(&format!(
                "Already found appender configured for type {}, re-using the same one.",
                log_type.unwrap_or("")
            ));
            return Ok(sender.clone());
        }

        let sender = build()?;
        senders.insert(key, sender.clone());
        Ok(sender)
    }

    /// The sender registered for `log_type`, if any.
    #[must_use]
    pub fn get(&self, log_type: Option<&str>) -> Option<LogzioSender> {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&log_type.map(str::to_string))
            .cloned()
    }

    /// Number of registered senders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no sender is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::reporter::{CollectingReporter, Level};

    // Nothing listens on port 1, so every request fails to connect.
    const DEAD_LISTENER: &str = "http://127.0.0.1:1";

    fn dead_sender(reporter: &CollectingReporter) -> LogzioSender {
        LogzioSender::builder()
            .token("t")
            .log_type("test")
            .listener_url(DEAD_LISTENER)
            .max_retries_attempts(1)
            .initial_wait_before_retry(Duration::from_millis(1))
            .in_memory_queue(InMemoryQueue::builder().capacity_bytes(None))
            .reporter(Arc::new(reporter.clone()))
            .debug(true)
            .build()
            .unwrap()
    }

    #[test]
    fn zero_drain_timeout_is_rejected() {
        let err = LogzioSender::builder()
            .token("t")
            .drain_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("drainTimeout"));
    }

    #[test]
    fn missing_token_is_rejected() {
        let err = LogzioSender::builder().build().unwrap_err();
        assert!(matches!(err, Error::Parameter { .. }));
    }

    #[test]
    fn send_variants_enqueue_one_line_each() {
        let sender = dead_sender(&CollectingReporter::new());
        sender.send("plain");
        sender.send_json(&serde_json::json!({"message": "hi"}));
        sender.send_bytes(b"raw".to_vec());

        let queue = sender.queue();
        assert_eq!(queue.dequeue(), Some(b"plain".to_vec()));
        assert_eq!(queue.dequeue(), Some(br#"{"message":"hi"}"#.to_vec()));
        assert_eq!(queue.dequeue(), Some(b"raw".to_vec()));
        assert!(queue.is_empty());
    }

    #[test]
    fn filters_wrap_the_queue() {
        let sender = LogzioSender::builder()
            .token("t")
            .filters(vec![RtQuery::new(1, "errors", "level:ERROR", None, None, 0, 0)])
            .reporter(Arc::new(CollectingReporter::new()))
            .build()
            .unwrap();

        sender.send(r#"{"level":"INFO"}"#);
        sender.send(r#"{"level":"ERROR"}"#);

        assert_eq!(sender.queue().dequeue(), Some(br#"{"level":"ERROR"}"#.to_vec()));
        assert!(sender.queue().is_empty());
    }

    #[test]
    fn batches_skip_empty_messages_and_stop_at_max_size() {
        let sender = dead_sender(&CollectingReporter::new());
        sender.send("");
        sender.send_bytes(vec![b'a'; MAX_BATCH_SIZE_IN_BYTES - 1]);
        sender.send("bc");
        sender.send("left over");

        let batch = sender.inner.dequeue_up_to_max_batch_size();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], b"bc");
        assert_eq!(sender.queue().dequeue(), Some(b"left over".to_vec()));
    }

    #[tokio::test]
    async fn failed_batch_is_returned_to_the_queue() {
        let reporter = CollectingReporter::new();
        let sender = dead_sender(&reporter);
        sender.send("one");
        sender.send("two");

        sender.drain_queue_and_send().await;

        assert_eq!(sender.queue().dequeue(), Some(b"one".to_vec()));
        assert_eq!(sender.queue().dequeue(), Some(b"two".to_vec()));
        assert!(reporter.contains(Level::Info, "DEBUG: Will retry in the next interval"));
    }

    #[tokio::test]
    async fn drain_is_skipped_while_another_runs() {
        let reporter = CollectingReporter::new();
        let sender = dead_sender(&reporter);
        sender.send("kept");

        sender.inner.drain_running.store(true, Ordering::Release);
        sender.drain_queue_and_send().await;

        assert!(!sender.queue().is_empty());
        assert!(reporter.contains(Level::Info, "won't run another one in parallel"));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_clears_it() {
        let sender = dead_sender(&CollectingReporter::new());
        assert!(!sender.is_running());

        sender.start();
        sender.start();
        assert!(sender.is_running());

        sender.stop().await;
        assert!(!sender.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_a_drain_stuck_past_the_final_timeout() {
        // Accepts connections into its backlog but never answers.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let reporter = CollectingReporter::new();
        let sender = LogzioSender::builder()
            .token("t")
            .listener_url(format!("http://{}", silent.local_addr().unwrap()))
            .max_retries_attempts(1)
            .connect_timeout(Duration::from_secs(120))
            .socket_timeout(Duration::from_secs(120))
            .drain_timeout(Duration::from_secs(1))
            .in_memory_queue(InMemoryQueue::builder().capacity_bytes(None))
            .reporter(Arc::new(reporter.clone()))
            .debug(true)
            .build()
            .unwrap();

        sender.send("stuck");
        sender.start();
        // The first tick fires at once and takes the log off the queue.
        while !sender.queue().is_empty() {
            tokio::task::yield_now().await;
        }

        let started = tokio::time::Instant::now();
        sender.stop().await;
        let waited = started.elapsed();

        assert!(waited >= FINAL_DRAIN_TIMEOUT, "{waited:?}");
        assert!(waited < FINAL_DRAIN_TIMEOUT + Duration::from_secs(1), "{waited:?}");
        assert!(reporter.contains(Level::Info, "could not finish draining"));
        assert!(!reporter.contains(Level::Error, "Background task failed"));
        assert!(!sender.inner.drain_running.load(Ordering::Acquire));
        assert!(!sender.is_running());
    }

    #[test]
    fn registry_reuses_senders_per_type() {
        let reporter = CollectingReporter::new();
        let registry = SenderRegistry::new(Arc::new(reporter.clone()));

        let first = registry
            .get_or_create(Some("test"), || Ok(dead_sender(&reporter)))
            .unwrap();
        let second = registry
            .get_or_create(Some("test"), || panic!("must not build twice"))
            .unwrap();
        first.send("shared");

        assert_eq!(registry.len(), 1);
        assert_eq!(second.queue().dequeue(), Some(b"shared".to_vec()));
        assert!(reporter.contains(Level::Info, "re-using the same one"));
    }

    #[test]
    fn registry_keeps_nothing_when_build_fails() {
        let registry = SenderRegistry::default();
        let result = registry.get_or_create(None, || LogzioSender::builder().build());

        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(registry.get(None).is_none());
    }
}
