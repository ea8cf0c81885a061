//! Bounded in-memory log buffer.

use super::{LogsQueue, ONE_MEGABYTE_IN_BYTES};
use crate::reporter::{StatusReporter, TracingReporter};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Default capacity: 100 MiB of buffered log bytes.
pub const DEFAULT_CAPACITY_BYTES: u64 = 100 * ONE_MEGABYTE_IN_BYTES;

#[derive(Debug, Default)]
struct Buffer {
    logs: VecDeque<Vec<u8>>,
    size_in_bytes: u64,
}

/// An in-process FIFO that stops accepting logs once it holds
/// `capacity_bytes` bytes.
///
/// # Examples
///
/// ```
/// use logzio_sender::queue::{InMemoryQueue, LogsQueue};
///
/// let queue = InMemoryQueue::builder().capacity_bytes(Some(1024)).build();
/// queue.enqueue(b"first".to_vec());
/// queue.enqueue(b"second".to_vec());
///
/// assert_eq!(queue.dequeue(), Some(b"first".to_vec()));
/// assert_eq!(queue.size_in_bytes(), 6);
/// ```
pub struct InMemoryQueue {
    buffer: Mutex<Buffer>,
    capacity_bytes: Option<u64>,
    reporter: Arc<dyn StatusReporter>,
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("size_in_bytes", &self.size_in_bytes())
            .field("reporter", &"<dyn StatusReporter>")
            .finish()
    }
}

impl InMemoryQueue {
    /// Starts building a queue with the default capacity.
    #[must_use]
    pub fn builder() -> InMemoryQueueBuilder {
        InMemoryQueueBuilder::default()
    }

    /// Total bytes currently buffered.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.lock().size_in_bytes
    }

    /// Number of buffered logs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().logs.len()
    }

    /// The configured capacity; `None` means unbounded.
    #[must_use]
    pub fn capacity_bytes(&self) -> Option<u64> {
        self.capacity_bytes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogsQueue for InMemoryQueue {
    fn enqueue(&self, log: Vec<u8>) {
        let mut buffer = self.lock();
        if let Some(capacity) = self.capacity_bytes {
            if buffer.size_in_bytes >= capacity {
                drop(buffer);
                self.reporter.warning(&format!(
                    "Logz.io: Dropping logs - we crossed the memory threshold of {} MB",
                    capacity / ONE_MEGABYTE_IN_BYTES
                ));
                return;
            }
        }
        buffer.size_in_bytes += log.len() as u64;
        buffer.logs.push_back(log);
    }

    fn dequeue(&self) -> Option<Vec<u8>> {
        let mut buffer = self.lock();
        let log = buffer.logs.pop_front()?;
        buffer.size_in_bytes -= log.len() as u64;
        Some(log)
    }

    fn is_empty(&self) -> bool {
        self.lock().logs.is_empty()
    }
}

/// Builder for [`InMemoryQueue`].
#[derive(Clone)]
pub struct InMemoryQueueBuilder {
    capacity_bytes: Option<u64>,
    reporter: Option<Arc<dyn StatusReporter>>,
}

impl Default for InMemoryQueueBuilder {
    fn default() -> Self {
        Self {
            capacity_bytes: Some(DEFAULT_CAPACITY_BYTES),
            reporter: None,
        }
    }
}

impl InMemoryQueueBuilder {
    /// Sets the capacity in bytes. `None` disables the limit.
    #[must_use]
    pub fn capacity_bytes(mut self, capacity_bytes: Option<u64>) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Sets where dropped-log warnings go.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub(crate) fn default_reporter(mut self, reporter: &Arc<dyn StatusReporter>) -> Self {
        self.reporter.get_or_insert_with(|| Arc::clone(reporter));
        self
    }

    /// Builds the queue.
    #[must_use]
    pub fn build(self) -> InMemoryQueue {
        InMemoryQueue {
            buffer: Mutex::new(Buffer::default()),
            capacity_bytes: self.capacity_bytes,
            reporter: self
                .reporter
                .unwrap_or_else(|| Arc::new(TracingReporter)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{CollectingReporter, Level};
    use std::thread;

    fn queue_with_capacity(capacity: Option<u64>) -> (InMemoryQueue, CollectingReporter) {
        let reporter = CollectingReporter::new();
        let queue = InMemoryQueue::builder()
            .capacity_bytes(capacity)
            .reporter(Arc::new(reporter.clone()))
            .build();
        (queue, reporter)
    }

    #[test]
    fn new_queue_is_empty() {
        let (queue, _) = queue_with_capacity(Some(10));
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn default_capacity_is_one_hundred_megabytes() {
        let queue = InMemoryQueue::builder().build();
        assert_eq!(queue.capacity_bytes(), Some(100 * 1024 * 1024));
    }

    #[test]
    fn fifo_order_and_size_tracking() {
        let (queue, _) = queue_with_capacity(None);
        queue.enqueue(b"a".to_vec());
        queue.enqueue(b"bb".to_vec());
        queue.enqueue(b"ccc".to_vec());
        assert_eq!(queue.size_in_bytes(), 6);

        assert_eq!(queue.dequeue(), Some(b"a".to_vec()));
        assert_eq!(queue.size_in_bytes(), 5);
        assert_eq!(queue.dequeue(), Some(b"bb".to_vec()));
        assert_eq!(queue.dequeue(), Some(b"ccc".to_vec()));
        assert_eq!(queue.size_in_bytes(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn drops_once_capacity_is_reached() {
        let (queue, reporter) = queue_with_capacity(Some(4));
        queue.enqueue(b"abc".to_vec());
        // Still below the threshold, so this one is accepted and overshoots.
        queue.enqueue(b"de".to_vec());
        queue.enqueue(b"f".to_vec());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.size_in_bytes(), 5);
        assert!(reporter.contains(
            Level::Warning,
            "Dropping logs - we crossed the memory threshold of 0 MB"
        ));
    }

    #[test]
    fn accepts_again_after_draining_below_capacity() {
        let (queue, _) = queue_with_capacity(Some(2));
        queue.enqueue(b"xy".to_vec());
        queue.enqueue(b"dropped".to_vec());
        assert_eq!(queue.len(), 1);

        queue.dequeue();
        queue.enqueue(b"z".to_vec());
        assert_eq!(queue.dequeue(), Some(b"z".to_vec()));
    }

    #[test]
    fn unbounded_queue_never_drops() {
        let (queue, reporter) = queue_with_capacity(None);
        for _ in 0..1000 {
            queue.enqueue(vec![0; 1024]);
        }
        assert_eq!(queue.len(), 1000);
        assert!(reporter.messages().is_empty());
    }

    #[test]
    fn concurrent_enqueues() {
        let (queue, _) = queue_with_capacity(None);
        let queue = Arc::new(queue);
        let mut handles = vec![];

        for i in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    queue.enqueue(format!("{i}-{j}").into_bytes());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 800);
    }
}
