//! The core, UI-agnostic library for the `burnr` disk image writer.
//!
//! `burnr-core` streams a disk image, optionally compressed with gzip, xz,
//! bzip2 or lzip, onto a raw block device. It is meant to be driven by any
//! front-end: the `burnr` command-line tool or a graphical one.
//!
//! The library is structured into several key modules:
//! - [`image`]: Opens an image and turns it into a lazy sequence of decoded
//!   chunks, picking the codec from the file extension.
//! - [`mod@write`]: Re-chunks decoded data into aligned, fixed-size device
//!   writes with progress, ETA and cooperative cancellation.
//! - [`wipe`]: Clears stale filesystem signatures before a write.
//! - [`volume`] and [`privilege`]: The ports used to quiesce a device and to
//!   obtain a writable handle to it.
//! - [`flash`]: Ties everything together into a single run.
//! - [`platform`]: Linux device discovery and volume control.
//!
//! ## Example: Flashing an Image on a Worker Thread
//!
//! ```rust,no_run
//! use burnr_core::config::FlashConfig;
//! use burnr_core::flash::Flasher;
//! use burnr_core::platform::{self, LinuxVolumes};
//! use burnr_core::privilege::HelperAccess;
//! use burnr_core::progress::CancellationToken;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! fn main() -> burnr_core::Result<()> {
//!     let config = FlashConfig::default();
//!     let devices = platform::removable_devices()?;
//!     let Some(device) = devices.into_iter().next() else {
//!         return Ok(());
//!     };
//!
//!     let flasher = Flasher::new(
//!         Arc::new(LinuxVolumes),
//!         Arc::new(HelperAccess::pkexec(config.direct_io)?),
//!         config,
//!     );
//!     let job = flasher.spawn(
//!         PathBuf::from("path/to/image.img.xz"),
//!         device,
//!         CancellationToken::new(),
//!     )?;
//!
//!     for update in job.updates() {
//!         println!("{:>5.1}% {}", update.fraction * 100.0, update.status);
//!     }
//!     let outcome = job.join()?;
//!     println!("{} bytes written", outcome.bytes_written());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod flash;
pub mod image;
mod lzip;
pub mod platform;
pub mod privilege;
pub mod progress;
pub mod volume;
pub mod wipe;
pub mod write;

pub use codec::CompressionKind;
pub use device::DeviceDescriptor;
pub use error::{ErrorKind, FlashError, Result};
pub use flash::{FlashJob, Flasher, Outcome};
pub use progress::{CancellationToken, Phase, ProgressUpdate};
