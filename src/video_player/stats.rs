// SPDX-License-Identifier: MPL-2.0
//! Playback statistics snapshot.

use std::time::Instant;

/// Which elementary streams are currently decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveStreams {
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    /// Frames discarded by the decode thread before queuing.
    pub frame_drops_early: u64,
    /// Frames discarded at presentation time.
    pub frame_drops_late: u64,
    /// Frames handed to the presentation sink.
    pub frame_processed: u64,
    pub master_pts: Option<f64>,
    pub master_clock: Option<f64>,
    pub audio_clock: Option<f64>,
    pub video_clock: Option<f64>,
    pub active_streams: ActiveStreams,
    /// Queued compressed bytes.
    pub audio_queue_size: usize,
    pub video_queue_size: usize,
    /// Measured throughput in bytes per second.
    pub audio_bandwidth: u64,
    pub video_bandwidth: u64,
    /// Start of the current measurement period.
    pub start: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            frame_drops_early: 0,
            frame_drops_late: 0,
            frame_processed: 0,
            master_pts: None,
            master_clock: None,
            audio_clock: None,
            video_clock: None,
            active_streams: ActiveStreams::default(),
            audio_queue_size: 0,
            video_queue_size: 0,
            audio_bandwidth: 0,
            video_bandwidth: 0,
            start: Instant::now(),
        }
    }
}

impl Stats {
    /// Clears counters and restarts the measurement period.
    ///
    /// Clock readings and stream flags are kept.
    pub fn reset(&mut self) {
        self.frame_drops_early = 0;
        self.frame_drops_late = 0;
        self.frame_processed = 0;
        self.start = Instant::now();
    }

    /// Drift between the streams being played, in seconds.
    ///
    /// Audio minus video when both are active; otherwise the single stream
    /// is compared with the master clock.
    #[must_use]
    pub fn diff_streams(&self) -> Option<f64> {
        match (self.active_streams.audio, self.active_streams.video) {
            (true, true) => Some(self.audio_clock? - self.video_clock?),
            (false, true) => Some(self.master_clock? - self.video_clock?),
            (true, false) => Some(self.master_clock? - self.audio_clock?),
            (false, false) => None,
        }
    }

    #[must_use]
    pub fn total_frame_drops(&self) -> u64 {
        self.frame_drops_early + self.frame_drops_late
    }

    /// Presented frames per second since the last reset.
    #[must_use]
    pub fn fps(&self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let processed = self.frame_processed as f64;
        processed / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;

    fn both_active() -> Stats {
        Stats {
            active_streams: ActiveStreams {
                audio: true,
                video: true,
            },
            audio_clock: Some(10.25),
            video_clock: Some(10.2),
            master_clock: Some(10.25),
            ..Stats::default()
        }
    }

    #[test]
    fn diff_is_audio_minus_video_when_both_play() {
        assert_abs_diff_eq!(both_active().diff_streams().unwrap(), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn diff_is_none_without_clock_reading() {
        let stats = Stats {
            video_clock: None,
            ..both_active()
        };
        assert_eq!(stats.diff_streams(), None);
    }

    #[test]
    fn video_only_compares_with_master() {
        let stats = Stats {
            active_streams: ActiveStreams {
                audio: false,
                video: true,
            },
            master_clock: Some(4.0),
            video_clock: Some(3.5),
            ..Stats::default()
        };
        assert_abs_diff_eq!(stats.diff_streams().unwrap(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn no_streams_no_diff() {
        assert_eq!(Stats::default().diff_streams(), None);
    }

    #[test]
    fn reset_clears_counters_only() {
        let mut stats = Stats {
            frame_drops_early: 2,
            frame_drops_late: 3,
            frame_processed: 40,
            ..both_active()
        };
        assert_eq!(stats.total_frame_drops(), 5);

        stats.reset();
        assert_eq!(stats.total_frame_drops(), 0);
        assert_eq!(stats.frame_processed, 0);
        assert!(stats.diff_streams().is_some());
    }
}
