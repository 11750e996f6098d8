//! Contains the logic for writing a decoded image stream to a device.
//!
//! Decoded chunks arrive in whatever sizes the codec produces. They are
//! gathered into fixed-size, memory-aligned blocks so the device can be opened
//! with `O_DIRECT`, and each block is written at the next offset:
//! 1.  Every full block is bounds-checked against the device capacity, written,
//!     and followed by a progress update and a cancellation check.
//! 2.  The final partial block is zero-padded to a sector boundary.
//! 3.  The device is flushed to stable storage before success is reported.
use crate::config::SECTOR_SIZE;
use crate::error::{FlashError, Result};
use crate::image::ChunkSource;
use crate::progress::{CancellationToken, Phase, ProgressReporter, ProgressUpdate, writing_status};
use std::fs::File;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::time::{Duration, Instant};

/// No estimate is published before this much time has passed.
const ESTIMATE_WARMUP: Duration = Duration::from_millis(500);
/// Progress below which the ETA is too noisy to report.
const ETA_MIN_PROGRESS: f64 = 0.01;
/// Weight of the previous ETA in the moving average.
const ETA_SMOOTHING: f64 = 0.9;

/// The device side of a transfer.
pub trait BlockDevice {
    /// Writes from `buf` at `offset`, returning how many bytes were accepted.
    /// May accept fewer bytes than offered.
    fn positioned_write(&mut self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Flushes everything written so far to stable storage.
    fn durable_flush(&mut self) -> io::Result<()>;
}

#[cfg(unix)]
impl BlockDevice for File {
    fn positioned_write(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.write_at(buf, offset)
    }

    fn durable_flush(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// How a transfer that did not fail ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The whole image was written and flushed. The count includes the zero
    /// padding of the final block.
    Completed { bytes_written: u64 },
    /// The transfer stopped at a block boundary on request. The count covers
    /// full blocks only.
    Cancelled { bytes_written: u64 },
}

impl Outcome {
    pub fn bytes_written(&self) -> u64 {
        match *self {
            Outcome::Completed { bytes_written } | Outcome::Cancelled { bytes_written } => {
                bytes_written
            }
        }
    }
}

/// A progress estimate derived from compressed-input consumption.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Estimate {
    pub fraction: f64,
    pub eta: Option<Duration>,
}

/// Tracks how much of the device has been written and estimates the time left.
#[derive(Debug)]
pub struct WriteCursor {
    written: u64,
    capacity: u64,
    started: Instant,
    smoothed_eta: f64,
}

impl WriteCursor {
    pub fn new(capacity: u64) -> Self {
        Self::starting_at(capacity, Instant::now())
    }

    /// A cursor whose elapsed time is measured from `started`.
    pub fn starting_at(capacity: u64, started: Instant) -> Self {
        Self {
            written: 0,
            capacity,
            started,
            smoothed_eta: 0.0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn remaining(&self) -> u64 {
        self.capacity - self.written
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fails unless `len` more bytes fit on the device.
    fn check_fits(&self, len: u64) -> Result<()> {
        if len > self.remaining() {
            return Err(FlashError::CapacityExceeded {
                offset: self.written,
                needed: len,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Writes `block` at the cursor and advances past it.
    fn write<D: BlockDevice + ?Sized>(&mut self, device: &mut D, block: &[u8]) -> Result<()> {
        self.check_fits(block.len() as u64)?;
        write_all_at(device, block, self.written)?;
        self.written += block.len() as u64;
        Ok(())
    }

    /// Computes progress as `read / total` of the compressed input, and an
    /// exponentially smoothed ETA once progress passes 1%.
    ///
    /// Returns `None` during the first half second of the transfer.
    pub fn estimate(&mut self, read: u64, total: u64, elapsed: Duration) -> Option<Estimate> {
        if elapsed < ESTIMATE_WARMUP {
            return None;
        }

        let fraction = if total > 0 {
            (read as f64 / total as f64).min(1.0)
        } else {
            0.0
        };

        let mut eta = None;
        if fraction > ETA_MIN_PROGRESS {
            let raw = (1.0 - fraction) / fraction * elapsed.as_secs_f64();
            if raw.is_finite() && raw > 0.0 {
                self.smoothed_eta = if self.smoothed_eta > 0.0 {
                    self.smoothed_eta * ETA_SMOOTHING + raw * (1.0 - ETA_SMOOTHING)
                } else {
                    raw
                };
                eta = Some(Duration::from_secs_f64(self.smoothed_eta));
            }
        }

        Some(Estimate { fraction, eta })
    }
}

/// Writes all of `buf` at `offset`, reissuing short writes at the advanced
/// offset. A zero-length write is treated as a failure.
pub fn write_all_at<D: BlockDevice + ?Sized>(
    device: &mut D,
    mut buf: &[u8],
    mut offset: u64,
) -> Result<()> {
    while !buf.is_empty() {
        match device.positioned_write(buf, offset) {
            Ok(0) => {
                return Err(FlashError::WriteFailed {
                    offset,
                    source: io::Error::new(io::ErrorKind::WriteZero, "device accepted no bytes"),
                });
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(FlashError::WriteFailed { offset, source }),
        }
    }
    Ok(())
}

/// A zeroed heap buffer whose usable region starts on a sector boundary.
pub(crate) struct AlignedBuffer {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl AlignedBuffer {
    pub(crate) fn new(len: usize) -> Self {
        // O_DIRECT requires buffers to be memory-aligned.
        let storage = vec![0u8; len + SECTOR_SIZE];
        let offset = storage.as_ptr().align_offset(SECTOR_SIZE);
        Self {
            storage,
            offset,
            len,
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }
}

/// Streams every chunk of `source` onto `device` in `block_size` writes.
///
/// # Arguments
///
/// * `source` - The decoded image.
/// * `device` - The open device, positioned writes start at offset 0.
/// * `capacity` - The device size in bytes. No write ever crosses it.
/// * `block_size` - Bytes per write, a multiple of [`SECTOR_SIZE`].
/// * `cancel` - Checked after every full block.
/// * `reporter` - Receives the writing phase and progress updates.
///
/// # Errors
///
/// - [`FlashError::Decode`] if the source fails.
/// - [`FlashError::CapacityExceeded`] if the image does not fit.
/// - [`FlashError::WriteFailed`] if a write fails.
/// - [`FlashError::Io`] if `block_size` is not a non-zero multiple of
///   [`SECTOR_SIZE`], or if the final flush fails.
pub fn write_image<S, D, F>(
    source: &mut S,
    device: &mut D,
    capacity: u64,
    block_size: usize,
    cancel: &CancellationToken,
    reporter: &mut ProgressReporter<F>,
) -> Result<Outcome>
where
    S: ChunkSource + ?Sized,
    D: BlockDevice + ?Sized,
    F: FnMut(&ProgressUpdate),
{
    let cursor = WriteCursor::new(capacity);
    write_image_with(source, device, cursor, block_size, cancel, reporter)
}

/// Fails unless `block_size` is a non-zero multiple of [`SECTOR_SIZE`].
fn check_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size % SECTOR_SIZE != 0 {
        return Err(FlashError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("block size {block_size} is not a non-zero multiple of {SECTOR_SIZE}"),
        )));
    }
    Ok(())
}

/// [`write_image`] driven by a caller-supplied cursor.
pub(crate) fn write_image_with<S, D, F>(
    source: &mut S,
    device: &mut D,
    mut cursor: WriteCursor,
    block_size: usize,
    cancel: &CancellationToken,
    reporter: &mut ProgressReporter<F>,
) -> Result<Outcome>
where
    S: ChunkSource + ?Sized,
    D: BlockDevice + ?Sized,
    F: FnMut(&ProgressUpdate),
{
    check_block_size(block_size)?;

    let consumption = source.consumption();
    let mut block = AlignedBuffer::new(block_size);
    let mut filled = 0usize;

    reporter.enter(Phase::Writing, "Writing…");

    while let Some(mut chunk) = source.next_chunk()? {
        while !chunk.is_empty() {
            let take = (block_size - filled).min(chunk.len());
            block.as_mut_slice()[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
            chunk = &chunk[take..];

            if filled < block_size {
                continue;
            }

            cursor.write(device, block.as_slice())?;
            filled = 0;
            tracing::trace!(offset = cursor.written(), "block written");

            let elapsed = cursor.elapsed();
            if let Some(estimate) =
                cursor.estimate(consumption.read(), consumption.total(), elapsed)
            {
                reporter.advance(
                    estimate.fraction,
                    cursor.written(),
                    estimate.eta,
                    writing_status(cursor.written(), elapsed, estimate.eta),
                );
            }

            if cancel.is_cancelled() {
                device.durable_flush()?;
                tracing::info!(bytes_written = cursor.written(), "write cancelled");
                return Ok(Outcome::Cancelled {
                    bytes_written: cursor.written(),
                });
            }
        }
    }

    if filled > 0 {
        // The data itself must fit; only the padding may be clamped.
        cursor.check_fits(filled as u64)?;
        let padded = filled.div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        let len = (padded as u64).min(cursor.remaining()) as usize;
        block.as_mut_slice()[filled..len].fill(0);
        cursor.write(device, &block.as_slice()[..len])?;
        tracing::debug!(data = filled, padded = len, "final block written");
    }

    device.durable_flush()?;
    tracing::info!(
        bytes_written = cursor.written(),
        elapsed = ?cursor.elapsed(),
        "write complete"
    );

    Ok(Outcome::Completed {
        bytes_written: cursor.written(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::image::Consumption;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A device backed by memory that accepts at most `max_write` bytes per
    /// call and records every call.
    pub(crate) struct MemDevice {
        pub data: Vec<u8>,
        pub writes: Vec<(u64, usize)>,
        pub max_write: usize,
        pub flushes: usize,
        pub fail_at: Option<u64>,
    }

    impl MemDevice {
        pub(crate) fn new(max_write: usize) -> Self {
            Self {
                data: Vec::new(),
                writes: Vec::new(),
                max_write,
                flushes: 0,
                fail_at: None,
            }
        }
    }

    impl BlockDevice for MemDevice {
        fn positioned_write(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
            if self.fail_at.is_some_and(|at| offset >= at) {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            let n = buf.len().min(self.max_write);
            let start = offset as usize;
            if self.data.len() < start + n {
                self.data.resize(start + n, 0xAA);
            }
            self.data[start..start + n].copy_from_slice(&buf[..n]);
            self.writes.push((offset, n));
            Ok(n)
        }

        fn durable_flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    /// Replays fixed chunks, optionally cancelling after a number of pulls.
    pub(crate) struct ScriptedSource {
        chunks: VecDeque<Vec<u8>>,
        current: Vec<u8>,
        cancel_after: Option<(usize, CancellationToken)>,
        pulls: usize,
        consumed: Arc<AtomicU64>,
        total: u64,
    }

    impl ScriptedSource {
        pub(crate) fn new(data: &[u8], chunk_sizes: &[usize]) -> Self {
            let mut chunks = VecDeque::new();
            let mut rest = data;
            let mut sizes = chunk_sizes.iter().cycle();
            while !rest.is_empty() {
                let n = (*sizes.next().unwrap()).min(rest.len());
                chunks.push_back(rest[..n].to_vec());
                rest = &rest[n..];
            }
            Self {
                chunks,
                current: Vec::new(),
                cancel_after: None,
                pulls: 0,
                consumed: Arc::default(),
                total: 0,
            }
        }

        /// Reports the replayed bytes as compressed input of `data.len()`
        /// bytes, advancing with every chunk pulled.
        pub(crate) fn counting_input(mut self) -> Self {
            self.total = self.chunks.iter().map(|c| c.len() as u64).sum();
            self
        }

        pub(crate) fn cancel_after(mut self, pulls: usize, token: CancellationToken) -> Self {
            self.cancel_after = Some((pulls, token));
            self
        }
    }

    impl ChunkSource for ScriptedSource {
        fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
            if let Some((after, token)) = &self.cancel_after {
                if self.pulls == *after {
                    token.cancel();
                }
            }
            self.pulls += 1;
            match self.chunks.pop_front() {
                Some(chunk) => {
                    self.consumed.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    self.current = chunk;
                    Ok(Some(self.current.as_slice()))
                }
                None => Ok(None),
            }
        }

        fn consumption(&self) -> Consumption {
            Consumption::new(self.consumed.clone(), self.total)
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 + 1).collect()
    }

    fn run(
        source: &mut ScriptedSource,
        device: &mut MemDevice,
        capacity: u64,
        block_size: usize,
        cancel: &CancellationToken,
    ) -> (Result<Outcome>, Vec<ProgressUpdate>) {
        let mut updates = Vec::new();
        let result = {
            let mut reporter = ProgressReporter::new(|u: &ProgressUpdate| updates.push(u.clone()));
            write_image(source, device, capacity, block_size, cancel, &mut reporter)
        };
        (result, updates)
    }

    fn assert_contiguous(device: &MemDevice) {
        let mut expected = 0;
        for &(offset, len) in &device.writes {
            assert_eq!(offset, expected);
            expected += len as u64;
        }
    }

    #[test]
    fn test_any_chunking_reproduces_the_stream() {
        let block = 4096;
        let data = pattern(block * 5 + 1000);
        let cases: [&[usize]; 5] = [&[1], &[7, 4096, 13], &[4096], &[10_000], &[3000, 5000, 1]];
        for sizes in cases {
            let mut source = ScriptedSource::new(&data, sizes);
            let mut device = MemDevice::new(usize::MAX);
            let (result, _) = run(&mut source, &mut device, 1 << 20, block, &CancellationToken::new());

            let written = result.unwrap().bytes_written();
            assert_eq!(written, (block * 5 + 1024) as u64, "{sizes:?}");
            assert_contiguous(&device);
            assert_eq!(&device.data[..data.len()], &data[..], "{sizes:?}");
            assert!(device.data[data.len()..].iter().all(|&b| b == 0));
            assert_eq!(device.flushes, 1);
        }
    }

    #[test]
    fn test_short_writes_are_resumed() {
        let block = 2048;
        let data = pattern(block * 3);
        let mut source = ScriptedSource::new(&data, &[1500]);
        let mut device = MemDevice::new(300);
        let (result, _) = run(&mut source, &mut device, 1 << 20, block, &CancellationToken::new());

        assert_eq!(
            result.unwrap(),
            Outcome::Completed {
                bytes_written: data.len() as u64
            }
        );
        assert!(device.writes.iter().all(|&(_, n)| n <= 300));
        assert_contiguous(&device);
        assert_eq!(device.data, data);
    }

    #[test]
    fn test_exact_block_multiple_has_no_tail() {
        let block = 4096;
        let data = pattern(block * 2);
        let mut source = ScriptedSource::new(&data, &[1000]);
        let mut device = MemDevice::new(usize::MAX);
        let (result, _) = run(&mut source, &mut device, 1 << 20, block, &CancellationToken::new());

        assert_eq!(result.unwrap().bytes_written(), data.len() as u64);
        assert_eq!(device.writes, vec![(0, block), (block as u64, block)]);
    }

    #[test]
    fn test_final_block_padding_is_clamped_to_capacity() {
        let block = 4096;
        // 100 data bytes would pad to 512, but only 300 bytes remain.
        let capacity = (block + 300) as u64;
        let data = pattern(block + 100);
        let mut source = ScriptedSource::new(&data, &[block + 100]);
        let mut device = MemDevice::new(usize::MAX);
        let (result, _) = run(&mut source, &mut device, capacity, block, &CancellationToken::new());

        assert_eq!(result.unwrap().bytes_written(), capacity);
        assert_eq!(device.writes.last(), Some(&(block as u64, 300)));
        assert_eq!(device.data.len() as u64, capacity);
    }

    #[test]
    fn test_capacity_exceeded_on_full_block() {
        let block = 4096;
        let data = pattern(block * 4);
        let mut source = ScriptedSource::new(&data, &[block]);
        let mut device = MemDevice::new(usize::MAX);
        let capacity = (block * 2 + 512) as u64;
        let (result, updates) = run(&mut source, &mut device, capacity, block, &CancellationToken::new());

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(device.writes.len(), 2);
        assert!(device.data.len() as u64 <= capacity);
        assert_eq!(device.flushes, 0);
        assert_eq!(updates.last().unwrap().phase, Phase::Writing);
    }

    #[test]
    fn test_capacity_exceeded_by_final_data() {
        let block = 4096;
        let data = pattern(block + 600);
        let mut source = ScriptedSource::new(&data, &[block]);
        let mut device = MemDevice::new(usize::MAX);
        let (result, _) = run(&mut source, &mut device, (block + 512) as u64, block, &CancellationToken::new());

        match result.unwrap_err() {
            FlashError::CapacityExceeded { offset, needed, .. } => {
                assert_eq!(offset, block as u64);
                assert_eq!(needed, 600);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(device.writes, vec![(0, block)]);
    }

    #[test]
    fn test_cancel_stops_at_block_boundary() {
        let block = 4096;
        let data = pattern(block * 10);
        let cancel = CancellationToken::new();
        // Cancel while the third chunk is pulled; chunks are 1.5 blocks each.
        let mut source =
            ScriptedSource::new(&data, &[block + block / 2]).cancel_after(2, cancel.clone());
        let mut device = MemDevice::new(usize::MAX);
        let (result, _) = run(&mut source, &mut device, 1 << 20, block, &cancel);

        // Chunks 1 and 2 filled 3 blocks; the 4th completes inside chunk 3.
        assert_eq!(
            result.unwrap(),
            Outcome::Cancelled {
                bytes_written: (block * 4) as u64
            }
        );
        assert_eq!(device.writes.len(), 4);
        assert_eq!(device.flushes, 1);
    }

    #[test]
    fn test_write_error_carries_offset() {
        let block = 4096;
        let data = pattern(block * 3);
        let mut source = ScriptedSource::new(&data, &[block]);
        let mut device = MemDevice::new(usize::MAX);
        device.fail_at = Some(block as u64);
        let (result, _) = run(&mut source, &mut device, 1 << 20, block, &CancellationToken::new());

        match result.unwrap_err() {
            FlashError::WriteFailed { offset, source } => {
                assert_eq!(offset, block as u64);
                assert_eq!(source.raw_os_error(), Some(libc::EIO));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_length_write_is_fatal() {
        let mut device = MemDevice::new(0);
        let err = write_all_at(&mut device, b"abc", 512).unwrap_err();
        match err {
            FlashError::WriteFailed { offset, source } => {
                assert_eq!(offset, 512);
                assert_eq!(source.kind(), io::ErrorKind::WriteZero);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_source_writes_nothing() {
        let mut source = ScriptedSource::new(&[], &[1]);
        let mut device = MemDevice::new(usize::MAX);
        let (result, updates) = run(&mut source, &mut device, 1 << 20, 4096, &CancellationToken::new());

        assert_eq!(result.unwrap(), Outcome::Completed { bytes_written: 0 });
        assert!(device.writes.is_empty());
        assert_eq!(device.flushes, 1);
        assert_eq!(updates[0].phase, Phase::Writing);
        assert_eq!(updates[0].fraction, 0.0);
    }

    #[test]
    fn test_invalid_block_size_is_rejected() {
        for block in [0, 100, 4000] {
            let data = pattern(8192);
            let mut source = ScriptedSource::new(&data, &[4096]);
            let mut device = MemDevice::new(usize::MAX);
            let (result, updates) = run(&mut source, &mut device, 1 << 20, block, &CancellationToken::new());

            match result.unwrap_err() {
                FlashError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput, "{block}"),
                other => panic!("unexpected error: {other}"),
            }
            assert!(device.writes.is_empty());
            assert!(updates.is_empty());
        }
    }

    #[test]
    fn test_progress_is_monotone_with_eta() {
        let block = 4096;
        let data = pattern(block * 16);
        let mut source = ScriptedSource::new(&data, &[block / 2 * 3]).counting_input();
        let mut device = MemDevice::new(usize::MAX);
        // Past the warm-up from the first block on.
        let started = Instant::now()
            .checked_sub(Duration::from_secs(10))
            .unwrap_or_else(Instant::now);
        let cursor = WriteCursor::starting_at(1 << 20, started);

        let mut updates = Vec::new();
        let result = {
            let mut reporter = ProgressReporter::new(|u: &ProgressUpdate| updates.push(u.clone()));
            write_image_with(&mut source, &mut device, cursor, block, &CancellationToken::new(), &mut reporter)
        };
        assert_eq!(result.unwrap().bytes_written(), data.len() as u64);

        let writing: Vec<&ProgressUpdate> = updates
            .iter()
            .filter(|u| u.phase == Phase::Writing)
            .skip(1)
            .collect();
        assert_eq!(writing.len(), 16);
        for pair in writing.windows(2) {
            assert!(pair[1].fraction >= pair[0].fraction);
            assert!(pair[1].bytes_written > pair[0].bytes_written);
        }
        assert!(writing.iter().all(|u| (0.0..=1.0).contains(&u.fraction)));
        assert!(writing[0].fraction > 0.0);
        assert_eq!(writing.last().unwrap().fraction, 1.0);
        // Every block but the last leaves work to do, so it carries an ETA.
        assert!(writing[..15].iter().all(|u| u.eta.is_some()));
        assert!(writing[0].status.contains("ETA"), "{}", writing[0].status);
    }

    #[test]
    fn test_estimate_waits_for_warmup() {
        let mut cursor = WriteCursor::new(1 << 30);
        assert_eq!(cursor.estimate(50, 100, Duration::from_millis(499)), None);
        let estimate = cursor.estimate(50, 100, Duration::from_secs(10)).unwrap();
        assert_eq!(estimate.fraction, 0.5);
        assert_eq!(estimate.eta, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_estimate_smooths_eta() {
        let mut cursor = WriteCursor::new(1 << 30);
        // Raw ETA 10s seeds the average.
        cursor.estimate(50, 100, Duration::from_secs(10)).unwrap();
        // Raw ETA 30s: 10 * 0.9 + 30 * 0.1 = 12s.
        let estimate = cursor.estimate(25, 100, Duration::from_secs(10)).unwrap();
        let eta = estimate.eta.unwrap().as_secs_f64();
        assert!((eta - 12.0).abs() < 1e-9, "{eta}");
    }

    #[test]
    fn test_estimate_without_total_or_early_progress() {
        let mut cursor = WriteCursor::new(1 << 30);
        let estimate = cursor.estimate(1000, 0, Duration::from_secs(5)).unwrap();
        assert_eq!(estimate, Estimate { fraction: 0.0, eta: None });

        let estimate = cursor.estimate(1, 1000, Duration::from_secs(5)).unwrap();
        assert_eq!(estimate.eta, None);

        let estimate = cursor.estimate(2000, 1000, Duration::from_secs(5)).unwrap();
        assert_eq!(estimate.fraction, 1.0);
        assert_eq!(estimate.eta, None);
    }
}
