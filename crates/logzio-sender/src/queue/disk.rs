//! Persistent log buffer backed by segment files.
//!
//! # Layout
//!
//! The buffer directory holds:
//!
//! - `segment-NNNNNNNNNN.dat`: append-only files of records, each a 4-byte
//!   big-endian length followed by that many bytes.
//! - `cursor`: 16 bytes, the segment index and byte offset of the next record
//!   to dequeue.
//!
//! Writes append to the newest segment and roll over to a new one once it
//! would exceed the segment size. Reads advance the persisted cursor, so logs
//! enqueued but not yet dequeued are still there after a restart. A record
//! cut short by a crash mid-write is truncated away when the queue is opened,
//! and one cut short by a failed write (a full disk, say) is truncated at
//! once. A record that cannot be read is skipped together with the rest of
//! its segment.
//!
//! [`LogsQueue::gc`] deletes segments the cursor has moved past, and rewinds
//! the last segment once everything in it has been consumed.

use super::{LogsQueue, ONE_MEGABYTE_IN_BYTES};
use crate::error::{Error, Result};
use crate::reporter::{StatusReporter, TracingReporter};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default used-space percentage at which logs are dropped.
pub const DEFAULT_FS_PERCENT_THRESHOLD: u8 = 98;

/// Default maximum segment file size.
pub const DEFAULT_SEGMENT_SIZE: u64 = 32 * ONE_MEGABYTE_IN_BYTES;

const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".dat";
const CURSOR_FILE_NAME: &str = "cursor";
const LENGTH_PREFIX_SIZE: u64 = 4;

/// Reports how full the filesystem holding the buffer is.
pub trait SpaceProbe: Send + Sync {
    /// Used space of the filesystem containing `path`, in whole percent.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem cannot be queried.
    fn used_percent(&self, path: &Path) -> io::Result<u8>;
}

/// [`SpaceProbe`] that asks the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn used_percent(&self, path: &Path) -> io::Result<u8> {
        let available = fs2::available_space(path)?;
        let total = fs2::total_space(path)?;
        Ok(used_percent(available, total))
    }
}

/// `100 - floor(available / total * 100)`, treating an empty filesystem as full.
fn used_percent(available: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let free = (u128::from(available) * 100 / u128::from(total)).min(100);
    // free <= 100, so the difference always fits.
    u8::try_from(100 - free).unwrap_or(100)
}

/// A position inside the segment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
struct Position {
    segment: u64,
    offset: u64,
}

#[derive(Debug)]
struct DiskState {
    head: Position,
    tail: Position,
    pending: usize,
    writer: File,
    reader: Option<(u64, File)>,
    cursor: File,
    /// Makes the next append write only this many bytes, then fail.
    #[cfg(test)]
    fail_write_after: Option<usize>,
}

/// A persistent FIFO stored in a directory of segment files.
///
/// # Examples
///
/// ```no_run
/// use logzio_sender::queue::{DiskQueue, LogsQueue};
///
/// # fn example() -> logzio_sender::Result<()> {
/// let queue = DiskQueue::builder()
///     .buffer_dir("/var/lib/myapp/logzio-buffer")
///     .build()?;
/// queue.enqueue(br#"{"message":"hello"}"#.to_vec());
/// # Ok(())
/// # }
/// ```
pub struct DiskQueue {
    dir: PathBuf,
    fs_percent_threshold: Option<u8>,
    segment_size: u64,
    probe: Arc<dyn SpaceProbe>,
    reporter: Arc<dyn StatusReporter>,
    state: Mutex<DiskState>,
}

impl std::fmt::Debug for DiskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskQueue")
            .field("dir", &self.dir)
            .field("fs_percent_threshold", &self.fs_percent_threshold)
            .field("segment_size", &self.segment_size)
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl DiskQueue {
    /// Starts building a disk queue.
    #[must_use]
    pub fn builder() -> DiskQueueBuilder {
        DiskQueueBuilder::default()
    }

    /// The buffer directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of logs waiting to be dequeued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending
    }

    /// Number of segment files currently on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer directory cannot be listed.
    pub fn segment_count(&self) -> Result<usize> {
        Ok(list_segments(&self.dir)?.len())
    }

    fn open(
        dir: PathBuf,
        fs_percent_threshold: Option<u8>,
        segment_size: u64,
        probe: Arc<dyn SpaceProbe>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<Self> {
        fs::create_dir_all(&dir)?;

        let segments = list_segments(&dir)?;
        let mut head = read_cursor(&dir.join(CURSOR_FILE_NAME))?.unwrap_or_default();
        if !segments.contains(&head.segment) {
            if let Some(&next) = segments.iter().find(|&&s| s > head.segment) {
                head = Position {
                    segment: next,
                    offset: 0,
                };
            }
        }

        let mut pending = 0;
        let mut tail = Position {
            segment: head.segment,
            offset: 0,
        };
        for &segment in segments.iter().filter(|&&s| s >= head.segment) {
            let start = if segment == head.segment { head.offset } else { 0 };
            let (count, end) = scan_segment(&segment_path(&dir, segment), start)?;
            pending += count;
            tail = Position {
                segment,
                offset: end,
            };
        }
        if head.offset > tail.offset && head.segment == tail.segment {
            // The cursor points past truncated data; nothing is left to read.
            head.offset = tail.offset;
        }

        for &segment in segments.iter().filter(|&&s| s < head.segment) {
            fs::remove_file(segment_path(&dir, segment))?;
        }

        let writer = open_segment_writer(&dir, tail.segment)?;
        let cursor = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(CURSOR_FILE_NAME))?;

        let queue = Self {
            dir,
            fs_percent_threshold,
            segment_size,
            probe,
            reporter,
            state: Mutex::new(DiskState {
                head,
                tail,
                pending,
                writer,
                reader: None,
                cursor,
                #[cfg(test)]
                fail_write_after: None,
            }),
        };
        {
            let mut state = queue.lock();
            write_cursor(&mut state.cursor, head)?;
        }
        tracing::debug!(
            dir = %queue.dir.display(),
            pending,
            "Opened disk queue"
        );
        Ok(queue)
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_enough_space(&self) -> bool {
        let Some(threshold) = self.fs_percent_threshold else {
            return true;
        };
        match self.probe.used_percent(&self.dir) {
            Ok(used) if used >= threshold => {
                self.reporter.warning(&format!(
                    "Logz.io: Dropping logs, as FS used space on {} is {} percent, and the drop threshold is {} percent",
                    self.dir.display(),
                    used,
                    threshold
                ));
                false
            }
            Ok(_) => true,
            Err(e) => {
                self.reporter.error_with_source(
                    &format!(
                        "Could not read free space of {}, buffering anyway",
                        self.dir.display()
                    ),
                    &e,
                );
                true
            }
        }
    }

    fn append(&self, state: &mut DiskState, log: &[u8]) -> Result<()> {
        let len = u32::try_from(log.len()).map_err(|_| {
            Error::parameter("log", format!("{} bytes exceeds the record limit", log.len()))
        })?;
        let record_size = LENGTH_PREFIX_SIZE + u64::from(len);

        if state.tail.offset > 0 && state.tail.offset + record_size > self.segment_size {
            let next = state.tail.segment + 1;
            state.writer = open_segment_writer(&self.dir, next)?;
            state.tail = Position {
                segment: next,
                offset: 0,
            };
        }

        let mut record = Vec::with_capacity(log.len() + 4);
        record.extend_from_slice(&len.to_be_bytes());
        record.extend_from_slice(log);
        if let Err(e) = write_record(state, &record) {
            // Whatever part of the record reached the file must not stay in
            // front of the next one.
            state.writer.set_len(state.tail.offset)?;
            return Err(e.into());
        }

        state.tail.offset += record_size;
        state.pending += 1;
        Ok(())
    }

    fn read_next(&self, state: &mut DiskState) -> Result<Option<Vec<u8>>> {
        while state.pending > 0 {
            if state.head.segment == state.tail.segment && state.head.offset >= state.tail.offset {
                break;
            }

            let segment = state.head.segment;
            let reader = match &mut state.reader {
                Some((open, file)) if *open == segment => file,
                slot => {
                    let file = File::open(segment_path(&self.dir, segment))?;
                    &mut slot.insert((segment, file)).1
                }
            };
            reader.seek(SeekFrom::Start(state.head.offset))?;

            let mut len_bytes = [0_u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    if segment < state.tail.segment {
                        state.head = Position {
                            segment: segment + 1,
                            offset: 0,
                        };
                        state.reader = None;
                        continue;
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_be_bytes(len_bytes) as usize;
            let end = state.head.offset + LENGTH_PREFIX_SIZE + len as u64;
            if end > reader.metadata()?.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "record of {len} bytes at offset {} runs past the end of segment {segment}",
                        state.head.offset
                    ),
                )
                .into());
            }
            let mut log = vec![0_u8; len];
            reader.read_exact(&mut log)?;

            state.head.offset = end;
            state.pending -= 1;
            let head = state.head;
            write_cursor(&mut state.cursor, head)?;
            return Ok(Some(log));
        }
        Ok(None)
    }

    /// Moves the head past an unreadable record to the start of the next
    /// segment, or to the tail when it is in the last one, and recounts what
    /// is left.
    fn skip_unreadable(&self, state: &mut DiskState) -> Result<()> {
        state.head = if state.head.segment < state.tail.segment {
            Position {
                segment: state.head.segment + 1,
                offset: 0,
            }
        } else {
            state.tail
        };
        state.reader = None;

        let mut pending = 0;
        for segment in list_segments(&self.dir)?
            .into_iter()
            .filter(|&s| s >= state.head.segment)
        {
            let start = if segment == state.head.segment {
                state.head.offset
            } else {
                0
            };
            let (count, end) = scan_segment(&segment_path(&self.dir, segment), start)?;
            pending += count;
            if segment == state.tail.segment {
                state.tail.offset = end;
            }
        }
        state.pending = pending;

        let head = state.head;
        write_cursor(&mut state.cursor, head)?;
        Ok(())
    }
}

#[cfg(not(test))]
fn write_record(state: &mut DiskState, record: &[u8]) -> io::Result<()> {
    state.writer.write_all(record)
}

#[cfg(test)]
fn write_record(state: &mut DiskState, record: &[u8]) -> io::Result<()> {
    if let Some(written) = state.fail_write_after.take() {
        state.writer.write_all(&record[..written.min(record.len())])?;
        return Err(io::Error::other("No space left on device"));
    }
    state.writer.write_all(record)
}

impl LogsQueue for DiskQueue {
    fn enqueue(&self, log: Vec<u8>) {
        if !self.is_enough_space() {
            return;
        }
        let mut state = self.lock();
        if let Err(e) = self.append(&mut state, &log) {
            drop(state);
            self.reporter
                .error_with_source("Could not write log to the disk buffer, dropping it", &e);
        }
    }

    fn dequeue(&self) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let err = match self.read_next(&mut state) {
            Ok(log) => return log,
            Err(e) => e,
        };

        let retried = self
            .skip_unreadable(&mut state)
            .and_then(|()| self.read_next(&mut state));
        drop(state);
        self.reporter.error_with_source(
            "Could not read log from the disk buffer, skipping the rest of its segment",
            &err,
        );
        match retried {
            Ok(log) => log,
            Err(e) => {
                self.reporter
                    .error_with_source("Could not read log from the disk buffer", &e);
                None
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.lock().pending == 0
    }

    fn gc(&self) -> Result<()> {
        let mut state = self.lock();

        for segment in list_segments(&self.dir)? {
            if segment < state.head.segment {
                fs::remove_file(segment_path(&self.dir, segment))?;
            }
        }

        if state.pending == 0 && state.tail.offset > 0 {
            state.writer.set_len(0)?;
            state.tail.offset = 0;
            state.head = state.tail;
            state.reader = None;
            let head = state.head;
            write_cursor(&mut state.cursor, head)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.gc()?;
        let state = self.lock();
        state.writer.sync_all()?;
        state.cursor.sync_all()?;
        Ok(())
    }
}

/// Builder for [`DiskQueue`].
#[derive(Clone)]
pub struct DiskQueueBuilder {
    buffer_dir: Option<PathBuf>,
    fs_percent_threshold: Option<u8>,
    segment_size: u64,
    probe: Arc<dyn SpaceProbe>,
    reporter: Option<Arc<dyn StatusReporter>>,
}

impl Default for DiskQueueBuilder {
    fn default() -> Self {
        Self {
            buffer_dir: None,
            fs_percent_threshold: Some(DEFAULT_FS_PERCENT_THRESHOLD),
            segment_size: DEFAULT_SEGMENT_SIZE,
            probe: Arc::new(FsSpaceProbe),
            reporter: None,
        }
    }
}

impl DiskQueueBuilder {
    /// Sets the buffer directory. Required.
    #[must_use]
    pub fn buffer_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.buffer_dir = Some(dir.into());
        self
    }

    /// Sets the used-space percentage at which logs are dropped. `None`
    /// disables the check.
    #[must_use]
    pub fn fs_percent_threshold(mut self, threshold: Option<u8>) -> Self {
        self.fs_percent_threshold = threshold;
        self
    }

    /// Sets the size at which a new segment file is started.
    #[must_use]
    pub fn segment_size(mut self, bytes: u64) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Replaces the free-space source.
    #[must_use]
    pub fn space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.probe = probe;
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

    /// Opens (or creates) the queue in the buffer directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parameter`] if no buffer directory was given or its
    /// last path component is empty, and an IO error if the directory or its
    /// files cannot be opened.
    pub fn build(self) -> Result<DiskQueue> {
        let dir = self
            .buffer_dir
            .ok_or_else(|| Error::parameter("bufferDir", "value is null."))?;
        let dir = std::path::absolute(&dir)?;
        if dir.parent().is_none() || dir.file_name().is_none_or(|name| name.is_empty()) {
            return Err(Error::parameter(
                "bufferDir",
                format!("value is empty: {}", dir.display()),
            ));
        }

        DiskQueue::open(
            dir,
            self.fs_percent_threshold,
            self.segment_size.max(1),
            self.probe,
            self.reporter.unwrap_or_else(|| Arc::new(TracingReporter)),
        )
    }
}

fn segment_path(dir: &Path, segment: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{segment:010}{SEGMENT_SUFFIX}"))
}

fn open_segment_writer(dir: &Path, segment: u64) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(segment_path(dir, segment))
}

/// Sorted indices of the segment files in `dir`.
fn list_segments(dir: &Path) -> io::Result<Vec<u64>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(index) = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|rest| rest.strip_suffix(SEGMENT_SUFFIX))
            .and_then(|index| index.parse::<u64>().ok())
        {
            segments.push(index);
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

/// Counts complete records from `start` and returns the count with the end
/// offset of the last complete record. Anything after it is truncated.
fn scan_segment(path: &Path, start: u64) -> io::Result<(usize, u64)> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_len = file.metadata()?.len();
    if start >= file_len {
        return Ok((0, file_len));
    }

    let mut count = 0;
    let mut offset = start;
    let mut len_bytes = [0_u8; 4];
    while offset + LENGTH_PREFIX_SIZE <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut len_bytes)?;
        let end = offset + LENGTH_PREFIX_SIZE + u64::from(u32::from_be_bytes(len_bytes));
        if end > file_len {
            break;
        }
        offset = end;
        count += 1;
    }

    if offset < file_len {
        tracing::warn!(
            path = %path.display(),
            truncated_bytes = file_len - offset,
            "Truncating incomplete record at the end of a buffer segment"
        );
        file.set_len(offset)?;
    }
    Ok((count, offset))
}

fn read_cursor(path: &Path) -> io::Result<Option<Position>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let Ok(raw) = <[u8; 16]>::try_from(bytes.as_slice()) else {
        tracing::warn!(path = %path.display(), "Ignoring malformed buffer cursor");
        return Ok(None);
    };
    let (segment, offset) = raw.split_at(8);
    Ok(Some(Position {
        segment: u64::from_be_bytes(segment.try_into().unwrap_or_default()),
        offset: u64::from_be_bytes(offset.try_into().unwrap_or_default()),
    }))
}

fn write_cursor(file: &mut File, position: Position) -> io::Result<()> {
    let mut raw = [0_u8; 16];
    raw[..8].copy_from_slice(&position.segment.to_be_bytes());
    raw[8..].copy_from_slice(&position.offset.to_be_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&raw)
}
