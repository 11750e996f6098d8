//! Progress reporting and cancellation shared between the worker running a
//! transfer and the front-end observing it.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A cooperative cancellation flag.
///
/// The front-end calls [`cancel`](Self::cancel); the writer polls
/// [`is_cancelled`](Self::is_cancelled) between block writes, so a
/// cancellation is only observed at block boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The stage a run is in. Runs only ever move forward through these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Unmounting,
    Authorizing,
    Wiping,
    Writing,
    Ejecting,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }
}

/// A snapshot published by the worker.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Phase,
    /// Fraction of the compressed image consumed, in `[0, 1]`.
    pub fraction: f64,
    pub bytes_written: u64,
    pub eta: Option<Duration>,
    pub status: String,
}

/// Publishes [`ProgressUpdate`]s to a sink while keeping the fraction within
/// `[0, 1]` and non-decreasing inside the writing phase.
pub struct ProgressReporter<F>
where
    F: FnMut(&ProgressUpdate),
{
    sink: F,
    current: ProgressUpdate,
}

impl<F> ProgressReporter<F>
where
    F: FnMut(&ProgressUpdate),
{
    pub fn new(sink: F) -> Self {
        Self {
            sink,
            current: ProgressUpdate {
                phase: Phase::Idle,
                fraction: 0.0,
                bytes_written: 0,
                eta: None,
                status: String::new(),
            },
        }
    }

    pub fn current(&self) -> &ProgressUpdate {
        &self.current
    }

    /// Moves to `phase`. Entering [`Phase::Writing`] resets the fraction to 0.
    pub fn enter(&mut self, phase: Phase, status: impl Into<String>) {
        if phase == Phase::Writing {
            self.current.fraction = 0.0;
            self.current.bytes_written = 0;
            self.current.eta = None;
        }
        if phase == Phase::Completed {
            self.current.fraction = 1.0;
            self.current.eta = None;
        }
        self.current.phase = phase;
        self.current.status = status.into();
        (self.sink)(&self.current);
    }

    /// Reports write progress. Fractions below the last reported one are
    /// ignored so observers never see the bar move backwards.
    pub fn advance(
        &mut self,
        fraction: f64,
        bytes_written: u64,
        eta: Option<Duration>,
        status: impl Into<String>,
    ) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.current.fraction = self.current.fraction.max(fraction);
        self.current.bytes_written = bytes_written;
        self.current.eta = eta;
        self.current.status = status.into();
        (self.sink)(&self.current);
    }
}

/// Formats a byte count in decimal units (e.g., "1.5 GB", "300 MB").
pub fn format_bytes(bytes: u64) -> String {
    let gb = bytes as f64 / 1_000_000_000.0;
    if gb >= 1.0 {
        format!("{gb:.1} GB")
    } else {
        format!("{:.0} MB", bytes as f64 / 1_000_000.0)
    }
}

/// Formats a duration as "42s", "3m 5s" or "1h 12m".
pub fn format_duration(duration: Duration) -> String {
    let s = duration.as_secs();
    if s < 60 {
        format!("{s}s")
    } else if s < 3600 {
        format!("{}m {}s", s / 60, s % 60)
    } else {
        format!("{}h {}m", s / 3600, (s % 3600) / 60)
    }
}

/// The status line shown while writing.
pub fn writing_status(written: u64, elapsed: Duration, eta: Option<Duration>) -> String {
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { written as f64 / secs } else { 0.0 };
    let mut status = format!(
        "Writing… {:.0} MB @ {:.1} MB/s",
        written as f64 / 1_000_000.0,
        speed / 1_000_000.0
    );
    if let Some(eta) = eta {
        status.push_str(&format!(" — ETA {}", format_duration(eta)));
    }
    status
}
