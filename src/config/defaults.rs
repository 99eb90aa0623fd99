// SPDX-License-Identifier: MPL-2.0
//! Centralized default values for all engine constants.
//!
//! This module serves as the single source of truth for the tuning values
//! used across the playback pipeline. Constants are organized by category.
//!
//! # Categories
//!
//! - **Sync**: video pacing thresholds and audio drift correction
//! - **Queues**: frame and packet queue sizing
//! - **Seeking**: byte-seek heuristics and chunk increments
//! - **Audio**: callback buffer sizing
//! - **Volume**: audio playback volume settings
//! - **Bandwidth**: codec-specific throughput heuristics

// ==========================================================================
// Sync Defaults
// ==========================================================================

/// Lower bound of the video sync threshold, in seconds.
pub const AV_SYNC_THRESHOLD_MIN: f64 = 0.04;

/// Upper bound of the video sync threshold, in seconds.
pub const AV_SYNC_THRESHOLD_MAX: f64 = 0.1;

/// Frames longer than this are never duplicated to catch up, in seconds.
pub const AV_SYNC_FRAMEDUP_THRESHOLD: f64 = 0.1;

/// Clock differences above this are treated as discontinuities, in seconds.
pub const AV_NOSYNC_THRESHOLD: f64 = 10.0;

/// Maximum audio speed change to correct drift, in percent.
pub const SAMPLE_CORRECTION_PERCENT_MAX: u32 = 10;

/// Number of clock-diff measurements averaged before correcting audio.
pub const AUDIO_DIFF_AVG_NB: u32 = 20;

/// Maximum frame duration for sources with timestamp discontinuities, in seconds.
pub const MAX_FRAME_DURATION_DISCONTINUOUS: f64 = 10.0;

/// Maximum frame duration for well-behaved sources, in seconds.
pub const MAX_FRAME_DURATION_CONTINUOUS: f64 = 3600.0;

/// Frame rate assumed when a video stream does not declare one.
pub const DEFAULT_FRAME_PER_SEC: u32 = 25;

// ==========================================================================
// Queue Defaults
// ==========================================================================

/// Decoded video frames buffered ahead of presentation.
pub const VIDEO_PICTURE_QUEUE_SIZE: usize = 3;

/// Decoded audio frames buffered ahead of the device callback.
pub const SAMPLE_QUEUE_SIZE: usize = 9;

/// Smallest accepted frame queue capacity (one shown slot plus one unread).
pub const MIN_FRAME_QUEUE_SIZE: usize = 2;

/// Total bytes of compressed data the read thread buffers before stalling.
pub const MAX_QUEUE_SIZE: usize = 15 * 1024 * 1024;

/// Packets a stream must hold before it counts as "enough".
pub const MIN_FRAMES: usize = 25;

/// Bounded wait used while the read thread is stalled, in milliseconds.
pub const READ_STALL_WAIT_MS: u64 = 10;

// ==========================================================================
// Seeking Defaults
// ==========================================================================

/// Byte rate assumed for byte seeking when the source has no bit rate.
pub const BYTE_SEEK_FALLBACK_RATE: f64 = 180_000.0;

/// Jump used by chunk seeking when the source has no chapters, in seconds.
pub const CHUNK_SEEK_INCREMENT_SECS: f64 = 60.0;

// ==========================================================================
// Audio Defaults
// ==========================================================================

/// Silence emitted when no decoded audio is available, in bytes.
pub const AUDIO_MIN_BUFFER_SIZE: usize = 512;

/// Extra output samples granted to the resampler per conversion.
pub const RESAMPLER_HEADROOM_SAMPLES: usize = 256;

// ==========================================================================
// Volume Defaults
// ==========================================================================

/// Default playback volume (0.0 to 1.0).
pub const DEFAULT_VOLUME: f32 = 1.0;

/// Minimum volume level.
pub const MIN_VOLUME: f32 = 0.0;

/// Maximum volume level.
pub const MAX_VOLUME: f32 = 1.0;

/// Volume step for increase/decrease operations.
pub const VOLUME_STEP: f32 = 0.05;

// ==========================================================================
// Bandwidth Defaults
// ==========================================================================

/// H.264 bits-per-pixel range used to estimate bandwidth.
pub const H264_BITS_PER_PIXEL: (f64, f64) = (0.05, 0.15);

/// HEVC bits-per-pixel range used to estimate bandwidth.
pub const HEVC_BITS_PER_PIXEL: (f64, f64) = (0.03, 0.10);

/// MPEG-2 video bits-per-pixel range used to estimate bandwidth.
pub const MPEG2_BITS_PER_PIXEL: (f64, f64) = (0.10, 0.25);

/// AAC bit rate range per channel, in bits per second.
pub const AAC_BITRATE_PER_CHANNEL: (u64, u64) = (64_000, 128_000);

/// MP2 bit rate range per channel, in bits per second.
pub const MP2_BITRATE_PER_CHANNEL: (u64, u64) = (96_000, 192_000);

// ==========================================================================
// Compile-time Validation
// ==========================================================================

const _: () = {
    // Sync validation
    assert!(AV_SYNC_THRESHOLD_MIN > 0.0);
    assert!(AV_SYNC_THRESHOLD_MAX > AV_SYNC_THRESHOLD_MIN);
    assert!(AV_NOSYNC_THRESHOLD > AV_SYNC_THRESHOLD_MAX);
    assert!(SAMPLE_CORRECTION_PERCENT_MAX < 100);
    assert!(AUDIO_DIFF_AVG_NB > 0);
    assert!(MAX_FRAME_DURATION_CONTINUOUS > MAX_FRAME_DURATION_DISCONTINUOUS);
    assert!(DEFAULT_FRAME_PER_SEC > 0);

    // Queue validation
    assert!(VIDEO_PICTURE_QUEUE_SIZE >= MIN_FRAME_QUEUE_SIZE);
    assert!(SAMPLE_QUEUE_SIZE >= MIN_FRAME_QUEUE_SIZE);
    assert!(MAX_QUEUE_SIZE > 0);

    // Volume validation
    assert!(MIN_VOLUME >= 0.0);
    assert!(MAX_VOLUME > MIN_VOLUME);
    assert!(DEFAULT_VOLUME >= MIN_VOLUME);
    assert!(DEFAULT_VOLUME <= MAX_VOLUME);
    assert!(VOLUME_STEP > 0.0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_threshold_window_contains_typical_frame_duration() {
        let frame_duration = 1.0 / f64::from(DEFAULT_FRAME_PER_SEC);
        assert!(frame_duration >= AV_SYNC_THRESHOLD_MIN);
        assert!(frame_duration <= AV_SYNC_THRESHOLD_MAX);
    }

    #[test]
    fn bandwidth_ranges_are_ordered() {
        for (min, max) in [H264_BITS_PER_PIXEL, HEVC_BITS_PER_PIXEL, MPEG2_BITS_PER_PIXEL] {
            assert!(min < max);
        }
        for (min, max) in [AAC_BITRATE_PER_CHANNEL, MP2_BITRATE_PER_CHANNEL] {
            assert!(min < max);
        }
    }
}
