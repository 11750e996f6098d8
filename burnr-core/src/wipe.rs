//! Clears stale filesystem and partition-table signatures from a device.
//!
//! Signatures sit near the start of a device (MBR, primary GPT, most
//! superblocks) or at its very end (backup GPT, md and LVM metadata). An image
//! shorter than the device only overwrites the start, so the end keeps
//! whatever the previous owner left there. Zeroing both regions before the
//! write keeps the kernel and automounters from finding stale volumes.
use crate::config::SECTOR_SIZE;
use crate::error::{FlashError, Result};
use crate::write::{AlignedBuffer, BlockDevice, write_all_at};

/// Bytes zeroed at each end of the device.
pub const WIPE_SPAN: u64 = 1024 * 1024;

/// The `(offset, len)` regions zeroed on a device of `capacity` bytes.
///
/// The tail region starts on a sector boundary. When the two regions would
/// meet, the whole device is a single region.
pub fn wipe_regions(capacity: u64) -> Vec<(u64, u64)> {
    let sector = SECTOR_SIZE as u64;
    let head = WIPE_SPAN.min(capacity);
    let tail_start = capacity.saturating_sub(WIPE_SPAN) / sector * sector;
    if capacity == 0 {
        Vec::new()
    } else if tail_start <= head {
        vec![(0, capacity)]
    } else {
        vec![(0, head), (tail_start, capacity - tail_start)]
    }
}

/// Zeroes the signature regions of `device` and flushes them.
///
/// Returns the number of bytes zeroed.
///
/// # Errors
///
/// - [`FlashError::WipeFailed`] if a write fails.
/// - [`FlashError::Io`] if the flush fails.
pub fn wipe_signatures<D: BlockDevice + ?Sized>(device: &mut D, capacity: u64) -> Result<u64> {
    let zeros = AlignedBuffer::new(WIPE_SPAN as usize);
    let mut wiped = 0;

    for (start, len) in wipe_regions(capacity) {
        let mut offset = start;
        let end = start + len;
        while offset < end {
            let n = (end - offset).min(WIPE_SPAN) as usize;
            write_all_at(device, &zeros.as_slice()[..n], offset).map_err(|e| match e {
                FlashError::WriteFailed { offset, source } => {
                    FlashError::WipeFailed { offset, source }
                }
                other => other,
            })?;
            offset += n as u64;
        }
        wiped += len;
        tracing::debug!(offset = start, len, "signature region zeroed");
    }

    device.durable_flush()?;
    Ok(wiped)
}
