//! Runs a complete flashing session: unmount, raw access, wipe, write, eject.
//!
//! A [`Flasher`] owns the two ports that need the outside world (volume
//! control and raw access) together with the run configuration. Each run moves
//! through [`Phase::Unmounting`], [`Phase::Authorizing`], optionally
//! [`Phase::Wiping`], [`Phase::Writing`] and optionally [`Phase::Ejecting`]
//! before ending in exactly one terminal phase. Nothing is written unless the unmount and the authorization both
//! succeeded.
use crate::config::FlashConfig;
use crate::device::DeviceDescriptor;
use crate::error::{FlashError, Result};
use crate::image::ImageDecoder;
use crate::privilege::RawAccess;
use crate::progress::{CancellationToken, Phase, ProgressReporter, ProgressUpdate, format_bytes};
use crate::volume::{self, UnmountOptions, VolumeControl};
use crate::wipe::wipe_signatures;
use crate::write::write_image;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

pub use crate::write::Outcome;

/// Marks a [`Flasher`] as busy for as long as it lives.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| FlashError::Busy)?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives flashing runs against one set of ports. Clones share the busy
/// state, so at most one run is in flight across all of them.
#[derive(Clone)]
pub struct Flasher {
    volumes: Arc<dyn VolumeControl>,
    access: Arc<dyn RawAccess>,
    config: FlashConfig,
    busy: Arc<AtomicBool>,
}

impl Flasher {
    pub fn new(
        volumes: Arc<dyn VolumeControl>,
        access: Arc<dyn RawAccess>,
        config: FlashConfig,
    ) -> Self {
        Self {
            volumes,
            access,
            config,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Whether a run is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Flashes `image` onto `device` on the calling thread.
    ///
    /// `on_progress` sees every phase change and every progress update,
    /// ending with exactly one terminal phase.
    ///
    /// # Errors
    ///
    /// Returns [`FlashError::Busy`] if another run is in flight, otherwise the
    /// error that ended the run. A cancelled run is `Ok(Outcome::Cancelled)`.
    pub fn run<F>(
        &self,
        image: &Path,
        device: &DeviceDescriptor,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<Outcome>
    where
        F: FnMut(&ProgressUpdate),
    {
        let guard = BusyGuard::acquire(&self.busy)?;
        let outcome = self.run_guarded(image, device, cancel, on_progress);
        drop(guard);
        outcome
    }

    /// Starts a run on a dedicated worker thread.
    ///
    /// Fails immediately with [`FlashError::Busy`] if a run is in flight.
    pub fn spawn(
        &self,
        image: PathBuf,
        device: DeviceDescriptor,
        cancel: CancellationToken,
    ) -> Result<FlashJob> {
        let guard = BusyGuard::acquire(&self.busy)?;
        let (tx, updates) = mpsc::channel();
        let flasher = self.clone();
        let worker_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("burnr-worker".into())
            .spawn(move || {
                let _guard = guard;
                flasher.run_guarded(&image, &device, &worker_cancel, |update| {
                    // The front-end may stop listening at any time.
                    let _ = tx.send(update.clone());
                })
            })?;

        Ok(FlashJob {
            cancel,
            updates,
            handle,
        })
    }

    /// Ejects `device` outside of a run.
    pub fn eject(&self, device: &DeviceDescriptor) -> Result<()> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        if volume::eject(
            self.volumes.as_ref(),
            &device.id,
            self.config.volume_deadline,
            self.config.volume_tick,
        ) {
            Ok(())
        } else {
            Err(FlashError::EjectFailed(device.path.display().to_string()))
        }
    }

    fn run_guarded<F>(
        &self,
        image: &Path,
        device: &DeviceDescriptor,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<Outcome>
    where
        F: FnMut(&ProgressUpdate),
    {
        let mut reporter = ProgressReporter::new(on_progress);
        let result = self.run_phases(image, device, cancel, &mut reporter);

        match &result {
            Ok((Outcome::Completed { bytes_written }, eject_failed)) => {
                let mut status = format!("Done. {} written", format_bytes(*bytes_written));
                if *eject_failed {
                    status.push_str(" (eject failed)");
                }
                reporter.enter(Phase::Completed, status);
            }
            Ok((Outcome::Cancelled { bytes_written }, _)) => {
                reporter.enter(
                    Phase::Cancelled,
                    format!("Cancelled at {}", format_bytes(*bytes_written)),
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "flash failed");
                reporter.enter(Phase::Failed, e.to_string());
            }
        }
        result.map(|(outcome, _)| outcome)
    }

    /// Returns the outcome and whether a requested eject failed.
    fn run_phases<F>(
        &self,
        image: &Path,
        device: &DeviceDescriptor,
        cancel: &CancellationToken,
        reporter: &mut ProgressReporter<F>,
    ) -> Result<(Outcome, bool)>
    where
        F: FnMut(&ProgressUpdate),
    {
        let config = &self.config;
        tracing::info!(
            image = %image.display(),
            device = %device.path.display(),
            capacity = device.size,
            "starting flash"
        );

        reporter.enter(Phase::Unmounting, "Unmounting…");
        if !volume::unmount(
            self.volumes.as_ref(),
            &device.id,
            UnmountOptions::WHOLE_FORCED,
            config.volume_deadline,
            config.volume_tick,
        ) {
            return Err(FlashError::UnmountFailed(device.path.display().to_string()));
        }

        reporter.enter(Phase::Authorizing, "Waiting for authorization…");
        let mut handle = self.access.acquire_raw_handle(&device.raw_path())?;

        if config.wipe_signatures {
            reporter.enter(Phase::Wiping, "Wiping filesystem signatures…");
            let wiped = wipe_signatures(&mut handle, device.size)?;
            tracing::info!(device = %device.path.display(), wiped, "signatures wiped");
        }

        let mut decoder = ImageDecoder::open_with_config(image, config)?;
        let outcome = write_image(
            &mut decoder,
            &mut handle,
            device.size,
            config.block_size,
            cancel,
            reporter,
        );
        decoder.close();
        let outcome = outcome?;
        // The device must be closed before it can be ejected.
        drop(handle);

        let mut eject_failed = false;
        if matches!(outcome, Outcome::Completed { .. }) && config.eject_after_write {
            reporter.enter(Phase::Ejecting, "Ejecting…");
            if !volume::eject(
                self.volumes.as_ref(),
                &device.id,
                config.volume_deadline,
                config.volume_tick,
            ) {
                tracing::warn!(device = %device.path.display(), "eject failed after write");
                eject_failed = true;
            }
        }

        Ok((outcome, eject_failed))
    }
}

/// A run in flight on a worker thread.
pub struct FlashJob {
    cancel: CancellationToken,
    updates: Receiver<ProgressUpdate>,
    handle: JoinHandle<Result<Outcome>>,
}

impl FlashJob {
    /// Asks the worker to stop at the next block boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Progress published by the worker. The channel closes when the run ends.
    pub fn updates(&self) -> &Receiver<ProgressUpdate> {
        &self.updates
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker and returns the result of the run.
    pub fn join(self) -> Result<Outcome> {
        self.handle
            .join()
            .map_err(|_| FlashError::Io(io::Error::other("worker thread panicked")))?
    }
}
