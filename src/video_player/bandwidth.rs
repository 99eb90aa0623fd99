// SPDX-License-Identifier: MPL-2.0
//! Expected and measured stream throughput.
//!
//! [`DesiredBandwidth`] is what a stream should need given its codec
//! parameters; [`BandwidthMeter`] is what the source actually delivers.
//! Owners compare the two to warn about starving network sources.

use crate::config::{
    AAC_BITRATE_PER_CHANNEL, DEFAULT_FRAME_PER_SEC, H264_BITS_PER_PIXEL, HEVC_BITS_PER_PIXEL,
    MP2_BITRATE_PER_CHANNEL, MPEG2_BITS_PER_PIXEL,
};

use super::packet::{CodecId, CodecParameters, MediaType, StreamInfo};

/// Expected throughput range in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DesiredBandwidth {
    pub min: u64,
    pub max: u64,
}

impl DesiredBandwidth {
    #[must_use]
    pub fn exact(bytes_per_sec: u64) -> Self {
        Self {
            min: bytes_per_sec,
            max: bytes_per_sec,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.max > 0 && self.min <= self.max
    }

    /// Whether a measured rate satisfies the lower bound.
    #[must_use]
    pub fn is_satisfied_by(&self, bytes_per_sec: u64) -> bool {
        bytes_per_sec >= self.min
    }

    /// Estimates the bandwidth of a probed stream.
    ///
    /// A declared bit rate wins; otherwise a codec heuristic is used.
    /// Returns `None` when neither is available.
    #[must_use]
    pub fn for_stream(info: &StreamInfo) -> Option<Self> {
        if let Some(bit_rate) = info.codec.bit_rate.filter(|&rate| rate > 0) {
            return Some(Self::exact(bit_rate / 8));
        }
        match info.media_type {
            MediaType::Video => {
                let fps = info
                    .frame_rate
                    .and_then(|rate| rate.to_f64())
                    .unwrap_or(f64::from(DEFAULT_FRAME_PER_SEC));
                Self::video_heuristic(&info.codec, fps)
            }
            MediaType::Audio => Self::audio_heuristic(&info.codec),
            MediaType::Other => None,
        }
    }

    fn video_heuristic(codec: &CodecParameters, fps: f64) -> Option<Self> {
        let (min_bpp, max_bpp) = match codec.codec {
            CodecId::H264 => H264_BITS_PER_PIXEL,
            CodecId::Hevc => HEVC_BITS_PER_PIXEL,
            CodecId::Mpeg2Video => MPEG2_BITS_PER_PIXEL,
            _ => return None,
        };
        let pixels_per_sec = f64::from(codec.width) * f64::from(codec.height) * fps;
        if pixels_per_sec <= 0.0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let to_bytes = |bpp: f64| (pixels_per_sec * bpp / 8.0) as u64;
        Some(Self {
            min: to_bytes(min_bpp),
            max: to_bytes(max_bpp),
        })
    }

    fn audio_heuristic(codec: &CodecParameters) -> Option<Self> {
        let (min_bps, max_bps) = match codec.codec {
            CodecId::Aac => AAC_BITRATE_PER_CHANNEL,
            CodecId::Mp2 => MP2_BITRATE_PER_CHANNEL,
            _ => return None,
        };
        let channels = u64::from(codec.channels);
        if channels == 0 {
            return None;
        }
        Some(Self {
            min: min_bps * channels / 8,
            max: max_bps * channels / 8,
        })
    }
}

/// Bytes received over a window starting at the first registered unit.
#[derive(Debug, Clone, Default)]
pub struct BandwidthMeter {
    window_bytes: u64,
    window_start: Option<f64>,
    total_bytes: u64,
}

impl BandwidthMeter {
    /// Records `bytes` arriving at wall time `now` (seconds).
    pub fn register(&mut self, bytes: usize, now: f64) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        let bytes = bytes as u64;
        self.window_bytes += bytes;
        self.total_bytes += bytes;
    }

    /// Starts a new measurement window.
    pub fn reset(&mut self) {
        self.window_bytes = 0;
        self.window_start = None;
    }

    /// Average bytes per second over the current window, `0` if it is empty.
    #[must_use]
    pub fn bytes_per_sec(&self, now: f64) -> u64 {
        let Some(start) = self.window_start else {
            return 0;
        };
        let elapsed = now - start;
        if elapsed <= 0.0 {
            return 0;
        }
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let rate = (self.window_bytes as f64 / elapsed) as u64;
        rate
    }

    /// Bytes registered since the meter was created.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_player::frame::{PixelFormat, SampleFormat};
    use crate::video_player::time_units::Rational;

    fn video_info(codec: CodecId, width: u32, height: u32) -> StreamInfo {
        StreamInfo::new(
            0,
            MediaType::Video,
            CodecParameters::video(codec, width, height, PixelFormat::Yuv420p),
        )
        .with_frame_rate(Rational::new(25, 1))
    }

    #[test]
    fn declared_bit_rate_wins() {
        let mut info = video_info(CodecId::H264, 1920, 1080);
        info.codec.bit_rate = Some(8_000_000);
        assert_eq!(
            DesiredBandwidth::for_stream(&info),
            Some(DesiredBandwidth::exact(1_000_000))
        );
    }

    #[test]
    fn h264_estimate_scales_with_resolution() {
        let hd = DesiredBandwidth::for_stream(&video_info(CodecId::H264, 1280, 720)).unwrap();
        let fhd = DesiredBandwidth::for_stream(&video_info(CodecId::H264, 1920, 1080)).unwrap();
        assert!(hd.is_valid());
        assert!(fhd.min > hd.min);
        assert!(fhd.max > hd.max);
    }

    #[test]
    fn hevc_needs_less_than_h264() {
        let h264 = DesiredBandwidth::for_stream(&video_info(CodecId::H264, 1920, 1080)).unwrap();
        let hevc = DesiredBandwidth::for_stream(&video_info(CodecId::Hevc, 1920, 1080)).unwrap();
        assert!(hevc.max < h264.max);
    }

    #[test]
    fn aac_estimate_scales_with_channels() {
        let stereo = StreamInfo::new(
            1,
            MediaType::Audio,
            CodecParameters::audio(CodecId::Aac, 48_000, 2, SampleFormat::F32Planar),
        );
        let bandwidth = DesiredBandwidth::for_stream(&stereo).unwrap();
        assert_eq!(bandwidth.min, 16_000);
        assert_eq!(bandwidth.max, 32_000);
    }

    #[test]
    fn unknown_codec_has_no_estimate() {
        let info = video_info(CodecId::Other("vp9".into()), 1920, 1080);
        assert_eq!(DesiredBandwidth::for_stream(&info), None);
    }

    #[test]
    fn meter_averages_over_window() {
        let mut meter = BandwidthMeter::default();
        meter.register(1000, 10.0);
        meter.register(1000, 10.5);
        assert_eq!(meter.bytes_per_sec(12.0), 1000);
        assert_eq!(meter.total_bytes(), 2000);
    }

    #[test]
    fn meter_reset_starts_new_window_but_keeps_total() {
        let mut meter = BandwidthMeter::default();
        meter.register(5000, 0.0);
        meter.reset();
        assert_eq!(meter.bytes_per_sec(1.0), 0);

        meter.register(100, 2.0);
        assert_eq!(meter.bytes_per_sec(3.0), 100);
        assert_eq!(meter.total_bytes(), 5100);
    }

    #[test]
    fn desired_bandwidth_check() {
        let desired = DesiredBandwidth { min: 100, max: 200 };
        assert!(desired.is_satisfied_by(150));
        assert!(!desired.is_satisfied_by(50));
    }
}
