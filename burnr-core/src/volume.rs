//! Unmounting and ejecting through an asynchronous volume service.
//!
//! Volume services report completion through a callback at some later point,
//! possibly on another thread. [`wait_for_completion`] turns that into a
//! blocking call with a deadline: the callback owns the sending half of a
//! one-shot channel, so it can fire at most once and a late callback after the
//! deadline is simply discarded.
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

/// Called once by a volume service with `true` on success.
pub type Completion = Box<dyn FnOnce(bool) + Send + 'static>;

/// Options for an unmount request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnmountOptions {
    /// Unmount every volume on the disk, not only the one named.
    pub whole: bool,
    /// Unmount even if files are open.
    pub force: bool,
}

impl UnmountOptions {
    /// Whole-disk, forced unmount, as required before raw writes.
    pub const WHOLE_FORCED: UnmountOptions = UnmountOptions {
        whole: true,
        force: true,
    };
}

/// A callback-based service that can unmount and eject volumes.
pub trait VolumeControl: Send + Sync {
    /// Starts unmounting the volumes of `device_id` and calls `done` when
    /// finished. `done` may be called from any thread, or dropped uncalled on
    /// failure.
    fn unmount(&self, device_id: &str, options: UnmountOptions, done: Completion);

    /// Starts ejecting `device_id` and calls `done` when finished.
    fn eject(&self, device_id: &str, done: Completion);

    /// Runs one step of the service's event loop, blocking for at most
    /// `tick`. Services that deliver callbacks on their own threads need no
    /// event loop.
    fn process_events(&self, _tick: Duration) {}
}

/// Starts an operation with `start` and blocks until its completion fires or
/// `deadline` elapses.
///
/// Returns the reported result, or `false` on timeout or if the completion
/// was dropped without being called.
pub fn wait_for_completion<V, F>(service: &V, deadline: Duration, tick: Duration, start: F) -> bool
where
    V: VolumeControl + ?Sized,
    F: FnOnce(Completion),
{
    let (tx, rx) = mpsc::sync_channel::<bool>(1);
    start(Box::new(move |ok| {
        // The receiver is gone once the deadline has passed.
        let _ = tx.try_send(ok);
    }));

    let deadline_at = Instant::now() + deadline;
    loop {
        match rx.try_recv() {
            Ok(ok) => return ok,
            Err(TryRecvError::Disconnected) => return false,
            Err(TryRecvError::Empty) => {}
        }

        service.process_events(tick);

        let now = Instant::now();
        if now >= deadline_at {
            return rx.try_recv().unwrap_or(false);
        }
        match rx.recv_timeout(tick.min(deadline_at - now)) {
            Ok(ok) => return ok,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

/// Unmounts every volume of `device_id`, bounded by `deadline`.
pub fn unmount<V: VolumeControl + ?Sized>(
    service: &V,
    device_id: &str,
    options: UnmountOptions,
    deadline: Duration,
    tick: Duration,
) -> bool {
    let ok = wait_for_completion(service, deadline, tick, |done| {
        service.unmount(device_id, options, done)
    });
    if !ok {
        tracing::warn!(device = device_id, "unmount did not complete");
    }
    ok
}

/// Ejects `device_id`, bounded by `deadline`.
pub fn eject<V: VolumeControl + ?Sized>(
    service: &V,
    device_id: &str,
    deadline: Duration,
    tick: Duration,
) -> bool {
    let ok = wait_for_completion(service, deadline, tick, |done| {
        service.eject(device_id, done)
    });
    if !ok {
        tracing::warn!(device = device_id, "eject did not complete");
    }
    ok
}
