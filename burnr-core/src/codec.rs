//! Codec adapters: one streaming decompressor per supported image format,
//! all driven through the same pull interface.
use crate::error::{FlashError, Result};
use crate::lzip::LzipDecoder;
use bzip2::bufread::BzDecoder;
use flate2::bufread::GzDecoder;
use std::fmt;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use xz2::bufread::XzDecoder;
use xz2::stream::{CONCATENATED, Stream};

/// The compression format of an image, chosen from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
    Gzip,
    Xz,
    Bzip2,
    Lzip,
}

impl CompressionKind {
    /// Extensions of uncompressed images. These carry no meaning beyond
    /// "not compressed" and are only used for display.
    pub const RAW_EXTENSIONS: [&'static str; 6] = ["img", "iso", "raw", "dd", "dsk", "cdr"];

    /// Selects a codec from the final extension of `path`.
    ///
    /// Only the last extension counts, so `disk.img.gz` is gzip and
    /// `disk.gz.img` is raw. Unknown or missing extensions are raw.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "gz" => CompressionKind::Gzip,
            "xz" => CompressionKind::Xz,
            "bz2" => CompressionKind::Bzip2,
            "lz" => CompressionKind::Lzip,
            _ => CompressionKind::None,
        }
    }

    pub fn is_compressed(self) -> bool {
        self != CompressionKind::None
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionKind::None => write!(f, "raw"),
            CompressionKind::Gzip => write!(f, "gzip"),
            CompressionKind::Xz => write!(f, "xz"),
            CompressionKind::Bzip2 => write!(f, "bzip2"),
            CompressionKind::Lzip => write!(f, "lzip"),
        }
    }
}

/// Counts every byte pulled from the wrapped reader.
///
/// The counter is shared so progress can be read while the decoder owns the
/// reader, including from another thread.
pub(crate) struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R, count: Arc<AtomicU64>) -> Self {
        Self { inner, count }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// The buffered, counted byte source every codec reads from.
pub(crate) type Source<R> = BufReader<CountingReader<R>>;

/// Per-codec decompression state. Selected once and never changed.
pub(crate) enum Codec<R: Read> {
    Raw(Source<R>),
    Gzip(GzDecoder<Source<R>>),
    Xz(XzDecoder<Source<R>>),
    Bzip2(BzDecoder<Source<R>>),
    Lzip(LzipDecoder<Source<R>>),
}

impl<R: Read> Codec<R> {
    pub(crate) fn new(kind: CompressionKind, source: Source<R>) -> Result<Self> {
        Ok(match kind {
            CompressionKind::None => Codec::Raw(source),
            CompressionKind::Gzip => Codec::Gzip(GzDecoder::new(source)),
            CompressionKind::Xz => {
                let stream =
                    Stream::new_stream_decoder(u64::MAX, CONCATENATED).map_err(FlashError::decode)?;
                Codec::Xz(XzDecoder::new_stream(source, stream))
            }
            CompressionKind::Bzip2 => Codec::Bzip2(BzDecoder::new(source)),
            CompressionKind::Lzip => Codec::Lzip(LzipDecoder::new(source)),
        })
    }

    /// Decodes into `out`, returning the number of bytes produced. Zero means
    /// the stream ended cleanly.
    pub(crate) fn pull(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            Codec::Raw(r) => r.read(out),
            Codec::Gzip(r) => r.read(out),
            Codec::Xz(r) => r.read(out),
            Codec::Bzip2(r) => r.read(out),
            Codec::Lzip(r) => r.read(out),
        }
    }
}
