// SPDX-License-Identifier: MPL-2.0
//! Wall-clock anchored playback position.
//!
//! A [`Clock`] remembers the last presentation timestamp it was set to and the
//! wall time of that update. While running it extrapolates from that anchor;
//! while paused it reports the anchored pts unchanged.
//!
//! Every method taking a `time` argument is pure so the arithmetic can be
//! driven deterministically; the argument-less variants read
//! [`now_secs`](super::time_units::now_secs).

use super::time_units::now_secs;

#[derive(Debug, Clone, PartialEq)]
pub struct Clock {
    /// Last anchored presentation timestamp, in seconds.
    pts: Option<f64>,
    /// `pts - time` at the anchor instant.
    pts_drift: f64,
    /// Wall time of the last anchor, in seconds.
    last_updated: f64,
    speed: f64,
    paused: bool,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Creates a clock with no valid reading.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pts: None,
            pts_drift: 0.0,
            last_updated: 0.0,
            speed: 1.0,
            paused: false,
        }
    }

    /// Anchors the clock so that it reads `pts` at wall time `time`.
    pub fn set_clock_at(&mut self, pts: Option<f64>, time: f64) {
        self.pts = pts;
        self.last_updated = time;
        self.pts_drift = pts.map_or(0.0, |pts| pts - time);
    }

    /// Anchors the clock to `pts` at the current wall time.
    pub fn set_clock(&mut self, pts: Option<f64>) {
        self.set_clock_at(pts, now_secs());
    }

    /// Returns the clock reading at wall time `time`.
    #[must_use]
    pub fn get_clock_at(&self, time: f64) -> Option<f64> {
        let pts = self.pts?;
        if self.paused {
            return Some(pts);
        }
        Some(self.pts_drift + time - (time - self.last_updated) * (1.0 - self.speed))
    }

    /// Returns the clock reading now.
    #[must_use]
    pub fn get_clock(&self) -> Option<f64> {
        self.get_clock_at(now_secs())
    }

    /// Freezes or resumes the clock.
    ///
    /// Freezing keeps the anchored pts as the reading, so owners re-anchor
    /// with [`sync_to_self`](Self::sync_to_self) before pausing when the
    /// frozen value should reflect the elapsed time.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Re-anchors the clock to its own reading at `time`.
    ///
    /// Used after a pause so the wall time spent paused is not read as drift.
    pub fn sync_to_self_at(&mut self, time: f64) {
        let current = self.get_clock_at(time);
        self.set_clock_at(current, time);
    }

    /// Re-anchors the clock to its own current reading.
    pub fn sync_to_self(&mut self) {
        self.sync_to_self_at(now_secs());
    }

    /// Changes the rate at which the clock advances.
    ///
    /// The clock is re-anchored first so the change applies from now on.
    pub fn set_speed_at(&mut self, speed: f64, time: f64) {
        self.sync_to_self_at(time);
        self.speed = speed;
    }

    #[must_use]
    pub fn speed(&self) -> f64 {
        self.speed
    }

    #[must_use]
    pub fn pts(&self) -> Option<f64> {
        self.pts
    }

    #[must_use]
    pub fn last_updated(&self) -> f64 {
        self.last_updated
    }
}
