// SPDX-License-Identifier: MPL-2.0
//! Seek request state machine.
//!
//! Owners post requests from any thread; the read thread picks them up,
//! performs them against the source and reports completion:
//!
//! - `Idle`: no seek pending, new requests are accepted
//! - `Requested`: a request waits for the read thread
//! - `InProgress`: the read thread is seeking the source
//!
//! Only one seek is in flight at a time. Requests arriving in any state but
//! `Idle` are dropped so the pending target is never altered.
//!
//! The controller's condition variable doubles as the read thread's wakeup:
//! buffering stalls wait on it with a timeout and other components call
//! [`SeekController::wake`] to cut the wait short.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Slack around the target so the demuxer does not land just outside the
/// allowed window. Seconds for time seeks, bytes for byte seeks.
const TIME_SEEK_MARGIN: f64 = 2e-6;
const BYTE_SEEK_MARGIN: f64 = 2.0;

/// Unit of a seek position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekUnit {
    /// Seconds on the source timeline.
    Time,
    /// Byte offset into the source.
    Bytes,
}

/// A seek as posted by the owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    /// Absolute target position.
    pub target: f64,
    /// Offset from the position the request was computed from; `0` for
    /// absolute seeks.
    pub relative: f64,
    pub unit: SeekUnit,
}

impl SeekRequest {
    #[must_use]
    pub fn time(target: f64, relative: f64) -> Self {
        Self {
            target,
            relative,
            unit: SeekUnit::Time,
        }
    }

    #[must_use]
    pub fn bytes(target: f64, relative: f64) -> Self {
        Self {
            target,
            relative,
            unit: SeekUnit::Bytes,
        }
    }

    /// Window the source may land in.
    ///
    /// Forward seeks must not land before the starting position and
    /// backward seeks must not land after it.
    #[must_use]
    pub fn range(&self) -> SeekRange {
        let margin = match self.unit {
            SeekUnit::Time => TIME_SEEK_MARGIN,
            SeekUnit::Bytes => BYTE_SEEK_MARGIN,
        };
        let origin = self.target - self.relative;
        SeekRange {
            target: self.target,
            min: (self.relative > 0.0).then_some(origin + margin),
            max: (self.relative < 0.0).then_some(origin - margin),
            unit: self.unit,
        }
    }
}

/// Bounds handed to [`MediaSource::seek`](super::source::MediaSource::seek).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRange {
    pub target: f64,
    /// Lowest acceptable landing position; unbounded when `None`.
    pub min: Option<f64>,
    /// Highest acceptable landing position; unbounded when `None`.
    pub max: Option<f64>,
    pub unit: SeekUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SeekState {
    #[default]
    Idle,
    /// Posted, not yet seen by the read thread.
    Requested(SeekRequest),
    /// Being performed by the read thread.
    InProgress(SeekRequest),
}

impl SeekState {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The request being serviced or waiting, if any.
    #[must_use]
    pub fn request(&self) -> Option<&SeekRequest> {
        match self {
            Self::Idle => None,
            Self::Requested(request) | Self::InProgress(request) => Some(request),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: SeekState,
    /// Set by [`SeekController::wake`], consumed by the next wait.
    woken: bool,
    /// Target of the last accepted time seek.
    last_time_target: Option<f64>,
}

#[derive(Debug)]
pub struct SeekController {
    inner: Mutex<Inner>,
    wakeup: Condvar,
}

impl Default for SeekController {
    fn default() -> Self {
        Self::new()
    }
}

impl SeekController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SeekState::Idle,
                woken: false,
                last_time_target: None,
            }),
            wakeup: Condvar::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SeekState {
        self.inner.lock().state
    }

    /// Posts a request and wakes the read thread.
    ///
    /// Returns `false` if another seek is pending or in progress; the request
    /// is dropped in that case.
    pub fn request(&self, request: SeekRequest) -> bool {
        let mut inner = self.inner.lock();
        if let Some(busy) = inner.state.request() {
            tracing::debug!(
                requested = request.target,
                pending = busy.target,
                "seek dropped, another seek is in flight"
            );
            return false;
        }
        inner.state = SeekState::Requested(request);
        if request.unit == SeekUnit::Time {
            inner.last_time_target = Some(request.target);
        }
        inner.woken = true;
        self.wakeup.notify_all();
        true
    }

    /// Moves a posted request to `InProgress` and returns it.
    pub fn begin(&self) -> Option<SeekRequest> {
        let mut inner = self.inner.lock();
        match inner.state {
            SeekState::Requested(request) => {
                inner.state = SeekState::InProgress(request);
                Some(request)
            }
            _ => None,
        }
    }

    /// Returns to `Idle` after the read thread serviced a request.
    pub fn complete(&self) {
        self.inner.lock().state = SeekState::Idle;
    }

    /// Target of the last accepted time seek, used when no clock is valid.
    #[must_use]
    pub fn last_time_target(&self) -> Option<f64> {
        self.inner.lock().last_time_target
    }

    /// Whether a request waits for the read thread.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        matches!(self.inner.lock().state, SeekState::Requested(_))
    }

    /// Wakes the read thread if it is stalled in [`wait`](Self::wait).
    pub fn wake(&self) {
        let mut inner = self.inner.lock();
        inner.woken = true;
        self.wakeup.notify_all();
    }

    /// Blocks for at most `timeout` or until woken.
    ///
    /// Returns immediately when a wake arrived since the previous wait.
    pub fn wait(&self, timeout: Duration) {
        let mut inner = self.inner.lock();
        if !inner.woken {
            let _ = self.wakeup.wait_for(&mut inner, timeout);
        }
        inner.woken = false;
    }
}
