// SPDX-License-Identifier: MPL-2.0
//! Audio/Video synchronization math.
//!
//! The engine keeps one clock per stream and corrects the slave stream toward
//! the master (audio by default):
//!
//! ```text
//!                  ┌─────────────────┐
//!  audio frames ──▶│ AudioDiffFilter │──▶ stretch/shrink sample count
//!                  └─────────────────┘
//!                           ▲ master clock
//!                  ┌─────────────────┐
//!  video frames ──▶│  target delay   │──▶ repeat, show or drop
//!                  └─────────────────┘
//! ```
//!
//! Everything here is pure: callers read the clocks and feed the differences
//! in, so each rule can be exercised without threads.

use crate::config::{
    FrameDrop, SyncMaster, AUDIO_DIFF_AVG_NB, AV_NOSYNC_THRESHOLD, AV_SYNC_FRAMEDUP_THRESHOLD,
    AV_SYNC_THRESHOLD_MAX, AV_SYNC_THRESHOLD_MIN, SAMPLE_CORRECTION_PERCENT_MAX,
};

use super::frame::VideoFrame;

/// Adjusts the nominal delay before the next video frame.
///
/// `diff` is `video_clock - master_clock`; pass `None` when video is the
/// master or either clock is invalid, which leaves `delay` untouched.
///
/// - late by at least the threshold: shrink the delay, never below zero
/// - early with a long frame: stretch by the whole difference
/// - early with a short frame: show the frame twice as long
#[must_use]
pub fn compute_target_delay(delay: f64, diff: Option<f64>, max_frame_duration: f64) -> f64 {
    let Some(diff) = diff else {
        return delay;
    };
    let sync_threshold = delay.clamp(AV_SYNC_THRESHOLD_MIN, AV_SYNC_THRESHOLD_MAX);
    if diff.abs() >= max_frame_duration {
        return delay;
    }

    if diff <= -sync_threshold {
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && delay > AV_SYNC_FRAMEDUP_THRESHOLD {
        delay + diff
    } else if diff >= sync_threshold {
        2.0 * delay
    } else {
        delay
    }
}

/// Display time of `frame` given the frame that follows it.
///
/// Uses the pts difference when it is positive and below
/// `max_frame_duration`; otherwise falls back to the frame's nominal duration
/// clamped to `[0, max_frame_duration]`.
#[must_use]
pub fn frame_duration_between(frame: &VideoFrame, next: &VideoFrame, max_frame_duration: f64) -> f64 {
    if let (Some(pts), Some(next_pts)) = (frame.pts, next.pts) {
        let duration = next_pts - pts;
        if duration > 0.0 && duration <= max_frame_duration {
            return duration;
        }
    }
    frame.duration.clamp(0.0, max_frame_duration)
}

/// Whether late video frames may be dropped.
///
/// Dropping only ever happens when video is slaved to another clock; `Auto`
/// and `On` both enable it in that case.
#[must_use]
pub fn frame_drop_enabled(policy: FrameDrop, master: SyncMaster) -> bool {
    master != SyncMaster::Video && policy != FrameDrop::Off
}

/// Whether a freshly decoded video frame is already too late to queue.
///
/// `diff` is `frame_pts - master_clock`; `filter_delay` is the time the
/// frame spent in the filter stage.
#[must_use]
pub fn should_drop_early(diff: Option<f64>, filter_delay: f64, packets_pending: bool) -> bool {
    match diff {
        Some(diff) => {
            diff.abs() < AV_NOSYNC_THRESHOLD && diff - filter_delay < 0.0 && packets_pending
        }
        None => false,
    }
}

/// Smoothed audio/master clock difference driving sample-count correction.
#[derive(Debug, Clone)]
pub struct AudioDiffFilter {
    cum: f64,
    coef: f64,
    avg_count: u32,
    /// Average difference, in seconds, below which no correction is made.
    threshold: f64,
}

impl AudioDiffFilter {
    /// Creates a filter that ignores differences smaller than `threshold`.
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            cum: 0.0,
            coef: (0.01f64.ln() / f64::from(AUDIO_DIFF_AVG_NB)).exp(),
            avg_count: 0,
            threshold,
        }
    }

    /// Forgets the accumulated history.
    pub fn reset(&mut self) {
        self.cum = 0.0;
        self.avg_count = 0;
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Number of samples to request so audio drifts back toward the master.
    ///
    /// `diff` is `audio_clock - master_clock`, `None` when audio is the master
    /// or a clock is invalid. The result stays within
    /// ±[`SAMPLE_CORRECTION_PERCENT_MAX`] of `nb_samples`.
    #[must_use]
    pub fn wanted_samples(&mut self, nb_samples: usize, diff: Option<f64>, sample_rate: u32) -> usize {
        let Some(diff) = diff.filter(|d| d.abs() < AV_NOSYNC_THRESHOLD) else {
            // Too far off: probably an initial pts error.
            self.reset();
            return nb_samples;
        };

        self.cum = diff + self.coef * self.cum;
        if self.avg_count < AUDIO_DIFF_AVG_NB {
            self.avg_count += 1;
            return nb_samples;
        }

        let avg_diff = self.cum * (1.0 - self.coef);
        if avg_diff.abs() < self.threshold {
            return nb_samples;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let nb = nb_samples as i64;
        #[allow(clippy::cast_possible_truncation)]
        let wanted = nb + (diff * f64::from(sample_rate)) as i64;
        let percent = i64::from(SAMPLE_CORRECTION_PERCENT_MAX);
        let min = nb * (100 - percent) / 100;
        let max = nb * (100 + percent) / 100;
        #[allow(clippy::cast_sign_loss)]
        let clamped = wanted.clamp(min, max) as usize;
        tracing::trace!(diff, avg_diff, nb_samples, wanted = clamped, "audio drift correction");
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_abs_diff_eq, assert_relative_eq, F64_EPSILON};

    const NO_LIMIT: f64 = 3600.0;

    #[test]
    fn master_video_leaves_delay_unchanged() {
        assert_abs_diff_eq!(compute_target_delay(0.04, None, NO_LIMIT), 0.04);
    }

    #[test]
    fn early_short_frame_doubles_delay() {
        let delay = compute_target_delay(0.033, Some(0.05), NO_LIMIT);
        assert_abs_diff_eq!(delay, 0.066, epsilon = F64_EPSILON);
    }

    #[test]
    fn early_long_frame_adds_difference() {
        let delay = compute_target_delay(0.2, Some(0.15), NO_LIMIT);
        assert_abs_diff_eq!(delay, 0.35, epsilon = F64_EPSILON);
    }

    #[test]
    fn late_frame_shrinks_delay_but_not_below_zero() {
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(-0.05), NO_LIMIT), 0.0);
        assert_abs_diff_eq!(
            compute_target_delay(0.2, Some(-0.12), NO_LIMIT),
            0.08,
            epsilon = F64_EPSILON
        );
    }

    #[test]
    fn difference_within_threshold_is_ignored() {
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(0.039), NO_LIMIT), 0.04);
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(-0.039), NO_LIMIT), 0.04);
    }

    #[test]
    fn threshold_is_clamped_to_window() {
        // 0.5 s frames use the 100 ms upper threshold.
        assert_abs_diff_eq!(
            compute_target_delay(0.5, Some(0.09), NO_LIMIT),
            0.5,
            epsilon = F64_EPSILON
        );
        assert_abs_diff_eq!(
            compute_target_delay(0.5, Some(0.1), NO_LIMIT),
            0.6,
            epsilon = F64_EPSILON
        );
    }

    #[test]
    fn discontinuity_beyond_max_frame_duration_is_ignored() {
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(12.0), 10.0), 0.04);
        assert_abs_diff_eq!(compute_target_delay(0.04, Some(-12.0), 10.0), 0.04);
    }

    fn frame_at(pts: Option<f64>, duration: f64) -> VideoFrame {
        let mut frame = VideoFrame::empty(16, 16, Default::default());
        frame.pts = pts;
        frame.duration = duration;
        frame
    }

    #[test]
    fn duration_uses_pts_difference() {
        let a = frame_at(Some(1.0), 0.04);
        let b = frame_at(Some(1.05), 0.04);
        assert_abs_diff_eq!(frame_duration_between(&a, &b, NO_LIMIT), 0.05, epsilon = F64_EPSILON);
    }

    #[test]
    fn duration_falls_back_to_nominal_on_bad_timestamps() {
        let a = frame_at(Some(5.0), 0.04);
        let same = frame_at(Some(5.0), 0.04);
        let backwards = frame_at(Some(4.0), 0.04);
        let missing = frame_at(None, 0.04);
        let far = frame_at(Some(50.0), 0.04);

        for next in [&same, &backwards, &missing, &far] {
            assert_abs_diff_eq!(frame_duration_between(&a, next, 10.0), 0.04);
        }
    }

    #[test]
    fn nominal_duration_is_clamped() {
        let a = frame_at(None, 20.0);
        let b = frame_at(None, 0.0);
        assert_abs_diff_eq!(frame_duration_between(&a, &b, 10.0), 10.0);
    }

    #[test]
    fn frame_drop_requires_non_video_master() {
        assert!(frame_drop_enabled(FrameDrop::Auto, SyncMaster::Audio));
        assert!(frame_drop_enabled(FrameDrop::On, SyncMaster::Audio));
        assert!(!frame_drop_enabled(FrameDrop::Off, SyncMaster::Audio));
        // Forcing drops never applies to the master stream itself.
        assert!(!frame_drop_enabled(FrameDrop::On, SyncMaster::Video));
        assert!(!frame_drop_enabled(FrameDrop::Auto, SyncMaster::Video));
    }

    #[test]
    fn early_drop_needs_late_frame_and_pending_packets() {
        assert!(should_drop_early(Some(-0.1), 0.0, true));
        assert!(!should_drop_early(Some(-0.1), 0.0, false));
        assert!(!should_drop_early(Some(0.1), 0.0, true));
        assert!(!should_drop_early(Some(-0.1), -0.2, true));
        assert!(!should_drop_early(Some(-20.0), 0.0, true));
        assert!(!should_drop_early(None, 0.0, true));
    }

    #[test]
    fn audio_filter_waits_for_full_window() {
        let mut filter = AudioDiffFilter::new(0.01);
        for _ in 0..AUDIO_DIFF_AVG_NB {
            assert_eq!(filter.wanted_samples(1000, Some(0.05), 48_000), 1000);
        }
        assert_ne!(filter.wanted_samples(1000, Some(0.05), 48_000), 1000);
    }

    #[test]
    fn audio_correction_is_bounded_to_ten_percent() {
        let mut filter = AudioDiffFilter::new(0.001);
        let mut wanted = 0;
        for _ in 0..=AUDIO_DIFF_AVG_NB {
            wanted = filter.wanted_samples(1000, Some(1.0), 48_000);
        }
        assert_eq!(wanted, 1100);

        let mut filter = AudioDiffFilter::new(0.001);
        for _ in 0..=AUDIO_DIFF_AVG_NB {
            wanted = filter.wanted_samples(1000, Some(-1.0), 48_000);
        }
        assert_eq!(wanted, 900);
    }

    #[test]
    fn small_correction_is_proportional() {
        let mut filter = AudioDiffFilter::new(0.001);
        let mut wanted = 0;
        for _ in 0..=AUDIO_DIFF_AVG_NB {
            wanted = filter.wanted_samples(1000, Some(0.05), 1_000);
        }
        assert_eq!(wanted, 1050);
    }

    #[test]
    fn huge_difference_resets_history() {
        let mut filter = AudioDiffFilter::new(0.001);
        for _ in 0..=AUDIO_DIFF_AVG_NB {
            let _ = filter.wanted_samples(1000, Some(0.05), 48_000);
        }
        assert_eq!(filter.wanted_samples(1000, Some(30.0), 48_000), 1000);
        // The window has to refill before correcting again.
        assert_eq!(filter.wanted_samples(1000, Some(0.05), 48_000), 1000);
    }

    #[test]
    fn coefficient_decays_to_one_percent_over_window() {
        let filter = AudioDiffFilter::new(0.0);
        assert_relative_eq!(
            filter.coef.powi(AUDIO_DIFF_AVG_NB as i32),
            0.01,
            max_relative = 1e-9
        );
    }
}
