//! Error types for the `burnr-core` library.
//!
//! Every fallible operation returns [`Result<T>`], an alias for
//! `Result<T, FlashError>`. Each error is terminal for the run that produced
//! it; nothing in this crate retries on its own.
//!
//! A cancelled run is not an error. See [`crate::flash::Outcome`].

use std::io;
use std::path::PathBuf;

/// Result type alias for operations that may return a [`FlashError`].
pub type Result<T> = std::result::Result<T, FlashError>;

/// Errors produced while preparing a device or streaming an image onto it.
#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    /// The image file could not be opened or inspected.
    #[error("cannot open image {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The compressed stream is corrupt or truncated, or the codec could not
    /// be initialized.
    #[error("decode error: {0}")]
    Decode(String),

    /// The decoded image does not fit on the target device.
    #[error("image too large for device: {needed} bytes needed at offset {offset}, capacity is {capacity} bytes")]
    CapacityExceeded {
        offset: u64,
        needed: u64,
        capacity: u64,
    },

    /// A positioned write failed or transferred zero bytes.
    #[error("write error at offset {offset}: {source}")]
    WriteFailed {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Zeroing the signature regions of the device failed.
    #[error("failed to wipe filesystem signatures at offset {offset}: {source}")]
    WipeFailed {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// The volumes of the target device could not be unmounted in time.
    #[error("failed to unmount {0}")]
    UnmountFailed(String),

    /// Raw access to the device was denied, or the helper did not hand back a
    /// descriptor.
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    /// The device could not be ejected in time.
    #[error("failed to eject {0}")]
    EjectFailed(String),

    /// A transfer is already running for this session.
    #[error("a transfer is already in progress")]
    Busy,

    /// Any other I/O failure (device flush, device discovery, bad arguments).
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A coarse classification of [`FlashError`] for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OpenFailed,
    DecodeError,
    CapacityExceeded,
    WriteFailed,
    WipeFailed,
    UnmountFailed,
    AuthorizationFailed,
    EjectFailed,
    Busy,
    Io,
}

impl FlashError {
    /// Returns the structured kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlashError::OpenFailed { .. } => ErrorKind::OpenFailed,
            FlashError::Decode(_) => ErrorKind::DecodeError,
            FlashError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            FlashError::WriteFailed { .. } => ErrorKind::WriteFailed,
            FlashError::WipeFailed { .. } => ErrorKind::WipeFailed,
            FlashError::UnmountFailed(_) => ErrorKind::UnmountFailed,
            FlashError::AuthorizationFailed(_) => ErrorKind::AuthorizationFailed,
            FlashError::EjectFailed(_) => ErrorKind::EjectFailed,
            FlashError::Busy => ErrorKind::Busy,
            FlashError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        FlashError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = FlashError::WriteFailed {
            offset: 4096,
            source: io::Error::from_raw_os_error(libc::EIO),
        };
        assert_eq!(err.kind(), ErrorKind::WriteFailed);
        assert!(err.to_string().starts_with("write error at offset 4096"));

        let err = FlashError::decode("corrupt deflate stream");
        assert_eq!(err.kind(), ErrorKind::DecodeError);
        assert_eq!(err.to_string(), "decode error: corrupt deflate stream");
    }

    #[test]
    fn test_io_conversion() {
        let err: FlashError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
