//! Runtime configuration for a flashing run.

use std::time::Duration;

/// Size of one device write.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
/// Granularity the final block is padded to.
pub const SECTOR_SIZE: usize = 512;
/// Capacity of the compressed-input buffer.
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 256 * 1024;
/// Capacity of the decoded-output buffer, and the largest chunk a decoder yields.
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 1024 * 1024;
/// How long an unmount or eject may take before it counts as failed.
pub const DEFAULT_VOLUME_DEADLINE: Duration = Duration::from_secs(10);
/// How often the volume wait services events and re-checks its slot.
pub const DEFAULT_VOLUME_TICK: Duration = Duration::from_millis(100);

/// Tunables for decoding, writing and device preparation.
///
/// ```
/// use burnr_core::config::FlashConfig;
/// use std::time::Duration;
///
/// let config = FlashConfig::default()
///     .eject(true)
///     .volume_deadline(Duration::from_secs(5));
/// assert!(config.eject_after_write);
/// ```
#[derive(Clone, Debug)]
pub struct FlashConfig {
    /// Bytes per device write. Must be a multiple of [`SECTOR_SIZE`].
    pub block_size: usize,
    pub input_buffer_size: usize,
    pub output_buffer_size: usize,
    pub volume_deadline: Duration,
    pub volume_tick: Duration,
    /// Open the device with `O_DIRECT`.
    pub direct_io: bool,
    /// Zero the signature regions of the device before writing.
    pub wipe_signatures: bool,
    pub eject_after_write: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            volume_deadline: DEFAULT_VOLUME_DEADLINE,
            volume_tick: DEFAULT_VOLUME_TICK,
            direct_io: true,
            wipe_signatures: true,
            eject_after_write: false,
        }
    }
}

impl FlashConfig {
    pub fn block_size(mut self, size: usize) -> Self {
        // Round up so every block write stays sector aligned.
        self.block_size = size.max(SECTOR_SIZE).div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        self
    }

    pub fn volume_deadline(mut self, deadline: Duration) -> Self {
        self.volume_deadline = deadline;
        self
    }

    pub fn volume_tick(mut self, tick: Duration) -> Self {
        self.volume_tick = tick;
        self
    }

    pub fn direct_io(mut self, enabled: bool) -> Self {
        self.direct_io = enabled;
        self
    }

    pub fn wipe_signatures(mut self, enabled: bool) -> Self {
        self.wipe_signatures = enabled;
        self
    }

    pub fn eject(mut self, enabled: bool) -> Self {
        self.eject_after_write = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlashConfig::default();
        assert_eq!(config.block_size, 1024 * 1024);
        assert_eq!(config.input_buffer_size, 256 * 1024);
        assert_eq!(config.output_buffer_size, 1024 * 1024);
        assert_eq!(config.volume_deadline, Duration::from_secs(10));
        assert!(config.direct_io);
        assert!(config.wipe_signatures);
        assert!(!config.eject_after_write);
    }

    #[test]
    fn test_block_size_is_sector_aligned() {
        assert_eq!(FlashConfig::default().block_size(1000).block_size, 1024);
        assert_eq!(FlashConfig::default().block_size(1).block_size, 512);
        assert_eq!(FlashConfig::default().block_size(4096).block_size, 4096);
    }
}
