//! Log buffers.
//!
//! Logs handed to the sender are buffered in a [`LogsQueue`] until the next
//! drain ships them. Three implementations are provided:
//!
//! - [`InMemoryQueue`]: a bounded in-process FIFO. Fast, lost on exit.
//! - [`DiskQueue`]: a persistent FIFO of segment files that survives restarts.
//! - [`FilteringQueue`]: a decorator that only lets through logs matching at
//!   least one real-time query.
//!
//! # Thread Safety
//!
//! Queues are shared between the callers of `send` and the background drain
//! task, so every method takes `&self` and implementations synchronise
//! internally.

use crate::error::Result;

pub mod disk;
pub mod filtering;
pub mod memory;

pub use disk::{DiskQueue, DiskQueueBuilder, FsSpaceProbe, SpaceProbe};
pub use filtering::FilteringQueue;
pub use memory::{InMemoryQueue, InMemoryQueueBuilder};

/// Bytes in one mebibyte, used for capacity defaults and messages.
pub const ONE_MEGABYTE_IN_BYTES: u64 = 1024 * 1024;

/// A FIFO buffer of raw log lines.
pub trait LogsQueue: Send + Sync {
    /// Appends a log. Implementations may drop it (after reporting a warning)
    /// when a capacity limit is reached; enqueueing never fails.
    fn enqueue(&self, log: Vec<u8>);

    /// Removes and returns the oldest log, or `None` when the queue is empty.
    fn dequeue(&self) -> Option<Vec<u8>>;

    /// Returns `true` if there is nothing to dequeue.
    fn is_empty(&self) -> bool;

    /// Reclaims storage held by already dequeued logs.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be cleaned.
    fn gc(&self) -> Result<()> {
        Ok(())
    }

    /// Releases resources held by the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if pending state cannot be flushed.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
