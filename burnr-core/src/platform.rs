//! Provides platform-specific functionality.
//!
//! This module holds everything that talks to the operating system directly:
//! discovering removable block devices, sizing a device node, and the volume
//! control used to unmount and eject.
//!
//! Raw block device access is only implemented for Linux.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;
