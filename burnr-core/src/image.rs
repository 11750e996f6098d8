//! Opens image files and turns them into a lazy sequence of decoded chunks.
use crate::codec::{Codec, CompressionKind, CountingReader};
use crate::config::FlashConfig;
use crate::error::{FlashError, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// How much of the compressed input has been consumed.
///
/// Cheap to clone, and readable from any thread while the decoder keeps
/// running.
#[derive(Clone, Debug, Default)]
pub struct Consumption {
    read: Arc<AtomicU64>,
    total: u64,
}

impl Consumption {
    pub fn new(read: Arc<AtomicU64>, total: u64) -> Self {
        Self { read, total }
    }

    /// Compressed bytes pulled from the image so far.
    pub fn read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    /// Size of the image file when it was opened, or 0 if unknown.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// `read / total`, or 0 when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.read() as f64 / self.total as f64
        }
    }
}

/// A finite, non-restartable producer of decoded bytes.
pub trait ChunkSource {
    /// Returns the next chunk of decoded bytes, or `None` once the stream has
    /// ended. After `None` or an error every further call returns `None`.
    fn next_chunk(&mut self) -> Result<Option<&[u8]>>;

    /// A handle on the compressed-input counters, used for progress.
    fn consumption(&self) -> Consumption;
}

/// A decoding session over one image file.
///
/// The codec is chosen from the file extension when the session is opened
/// and never changes. All resources are released when the session is closed
/// or dropped.
pub struct ImageDecoder {
    kind: CompressionKind,
    codec: Codec<File>,
    output: Vec<u8>,
    consumption: Consumption,
    finished: bool,
}

impl ImageDecoder {
    /// Opens `path` with the default buffer sizes.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_config(path, &FlashConfig::default())
    }

    pub fn open_with_config(path: &Path, config: &FlashConfig) -> Result<Self> {
        let open_failed = |source: io::Error| FlashError::OpenFailed {
            path: path.to_path_buf(),
            source,
        };

        let kind = CompressionKind::from_path(path);
        let file = File::open(path).map_err(open_failed)?;
        let total = file.metadata().map(|m| m.len()).unwrap_or(0);

        let read = Arc::new(AtomicU64::new(0));
        let mut source = BufReader::with_capacity(
            config.input_buffer_size,
            CountingReader::new(file, read.clone()),
        );

        // An empty file is a valid, empty image for every codec.
        let empty = source.fill_buf().map_err(open_failed)?.is_empty();
        let codec = Codec::new(kind, source)?;

        tracing::debug!(
            image = %path.display(),
            codec = %kind,
            compressed_size = total,
            "opened image"
        );

        Ok(Self {
            kind,
            codec,
            output: vec![0u8; config.output_buffer_size.max(1)],
            consumption: Consumption::new(read, total),
            finished: empty,
        })
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    pub fn compressed_bytes_read(&self) -> u64 {
        self.consumption.read()
    }

    pub fn compressed_total_size(&self) -> u64 {
        self.consumption.total()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Releases the codec state, the file handle and the buffers.
    pub fn close(self) {
        tracing::debug!(
            codec = %self.kind,
            compressed_read = self.compressed_bytes_read(),
            "closed image"
        );
    }
}

impl ChunkSource for ImageDecoder {
    fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        if self.finished {
            return Ok(None);
        }

        let produced = loop {
            match self.codec.pull(&mut self.output) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Err(FlashError::decode(format!("{} stream: {e}", self.kind)));
                }
            }
        };

        if produced == 0 {
            self.finished = true;
            return Ok(None);
        }
        Ok(Some(&self.output[..produced]))
    }

    fn consumption(&self) -> Consumption {
        self.consumption.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;
    use tempfile::TempDir;

    fn collect(decoder: &mut ImageDecoder) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = decoder.next_chunk()? {
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= FlashConfig::default().output_buffer_size);
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect()
    }

    #[test]
    fn test_open_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = ImageDecoder::open(&temp_dir.path().join("missing.img"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::OpenFailed);
    }

    #[test]
    fn test_raw_image_in_output_sized_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("disk.img");
        let data = sample(2 * 1024 * 1024 + 100);
        std::fs::write(&path, &data).unwrap();

        let mut decoder = ImageDecoder::open(&path).unwrap();
        assert_eq!(decoder.kind(), CompressionKind::None);
        assert_eq!(decoder.compressed_total_size(), data.len() as u64);
        assert_eq!(collect(&mut decoder).unwrap(), data);
        assert_eq!(decoder.compressed_bytes_read(), data.len() as u64);
        assert!(decoder.is_finished());
        assert!(decoder.next_chunk().unwrap().is_none());
        decoder.close();
    }

    #[test]
    fn test_empty_files_are_clean_for_every_codec() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["e.img", "e.gz", "e.xz", "e.bz2", "e.lz"] {
            let path = temp_dir.path().join(name);
            std::fs::File::create(&path).unwrap();

            let mut decoder = ImageDecoder::open(&path).unwrap();
            assert!(decoder.next_chunk().unwrap().is_none(), "{name}");
            assert!(decoder.next_chunk().unwrap().is_none(), "{name}");
        }
    }

    #[test]
    fn test_corrupt_stream_is_decode_error_then_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.img.xz");
        std::fs::write(&path, b"this is not xz data at all").unwrap();

        let mut decoder = ImageDecoder::open(&path).unwrap();
        let err = decoder.next_chunk().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
        assert!(decoder.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_gzip_progress_tracks_compressed_input() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("disk.img.gz");
        let data = sample(3 * 1024 * 1024);
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            flate2::Compression::fast(),
        );
        encoder.write_all(&data).unwrap();
        encoder.finish().unwrap();

        let mut decoder = ImageDecoder::open(&path).unwrap();
        let consumption = decoder.consumption();
        let mut last = 0;
        let mut out = Vec::new();
        while let Some(chunk) = decoder.next_chunk().unwrap() {
            out.extend_from_slice(chunk);
            assert!(consumption.read() >= last);
            last = consumption.read();
        }
        assert_eq!(out, data);
        assert_eq!(consumption.read(), consumption.total());
        assert!((consumption.fraction() - 1.0).abs() < f64::EPSILON);
    }
}
