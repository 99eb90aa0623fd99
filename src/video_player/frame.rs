// SPDX-License-Identifier: MPL-2.0
//! Decoded frames and the format descriptors that travel with them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::time_units::Rational;

/// Pixel layout of a decoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Yuv420p,
    Nv12,
    Rgb24,
    Rgba,
    Bgra,
    /// Backend-specific format code.
    Other(i32),
}

/// Sample encoding of decoded audio.
///
/// Packed formats interleave channels in a single plane; planar formats keep
/// one plane per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
    F64Planar,
}

impl SampleFormat {
    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 | Self::U8Planar => 1,
            Self::S16 | Self::S16Planar => 2,
            Self::S32 | Self::S32Planar | Self::F32 | Self::F32Planar => 4,
            Self::F64 | Self::F64Planar => 8,
        }
    }

    #[must_use]
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            Self::U8Planar | Self::S16Planar | Self::S32Planar | Self::F32Planar | Self::F64Planar
        )
    }

    /// The interleaved counterpart of this format.
    #[must_use]
    pub fn packed(self) -> Self {
        match self {
            Self::U8Planar => Self::U8,
            Self::S16Planar => Self::S16,
            Self::S32Planar => Self::S32,
            Self::F32Planar => Self::F32,
            Self::F64Planar => Self::F64,
            packed => packed,
        }
    }
}

/// Speaker mask, one bit per channel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelLayout(pub u64);

impl ChannelLayout {
    pub const MONO: Self = Self(0x4);
    pub const STEREO: Self = Self(0x3);

    /// Conventional layout for a channel count.
    #[must_use]
    pub fn default_for(channels: u16) -> Self {
        match channels {
            0 => Self(0),
            1 => Self::MONO,
            2 => Self::STEREO,
            n if n >= 64 => Self(u64::MAX),
            n => Self((1u64 << n) - 1),
        }
    }

    #[must_use]
    pub fn channels(self) -> u16 {
        // At most 64 bits are set.
        #[allow(clippy::cast_possible_truncation)]
        let count = self.0.count_ones() as u16;
        count
    }
}

/// Complete description of an audio sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: ChannelLayout,
    pub format: SampleFormat,
}

impl AudioParams {
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            channel_layout: ChannelLayout::default_for(channels),
            format,
        }
    }

    /// Bytes for one sample across all channels.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        usize::from(self.channels) * self.format.bytes_per_sample()
    }

    /// Bytes consumed per second of playback.
    #[must_use]
    pub fn bytes_per_sec(&self) -> usize {
        self.sample_rate as usize * self.frame_size()
    }

    /// Converts a byte count of this format to seconds.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn bytes_to_secs(&self, bytes: usize) -> f64 {
        let rate = self.bytes_per_sec();
        if rate == 0 {
            0.0
        } else {
            bytes as f64 / rate as f64
        }
    }
}

/// One plane of a video picture.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes per row, including padding.
    pub stride: usize,
}

/// A decoded video picture.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Presentation timestamp in seconds.
    pub pts: Option<f64>,
    /// Backend's best guess when `pts` is missing or unreliable.
    pub best_effort_pts: Option<f64>,
    /// Nominal display duration in seconds.
    pub duration: f64,
    /// Byte offset of the originating unit.
    pub pos: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sample_aspect_ratio: Rational,
    pub planes: Vec<Plane>,
    /// Flush generation of the stream when the frame was decoded.
    pub serial: u64,
}

impl VideoFrame {
    /// Creates a frame with no pixel data, for tests and placeholders.
    #[must_use]
    pub fn empty(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            pts: None,
            best_effort_pts: None,
            duration: 0.0,
            pos: None,
            width,
            height,
            format,
            sample_aspect_ratio: Rational::new(1, 1),
            planes: Vec::new(),
            serial: 0,
        }
    }

    #[must_use]
    pub fn with_pts(mut self, pts: f64) -> Self {
        self.pts = Some(pts);
        self.best_effort_pts = Some(pts);
        self
    }
}

/// A block of decoded audio samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Presentation timestamp in seconds.
    pub pts: Option<f64>,
    pub pos: Option<u64>,
    pub params: AudioParams,
    /// Samples per channel.
    pub nb_samples: usize,
    /// One plane for packed formats, one per channel for planar formats.
    pub planes: Vec<Bytes>,
    /// Flush generation of the stream when the frame was decoded.
    pub serial: u64,
}

impl AudioFrame {
    /// Creates a packed frame from interleaved bytes.
    #[must_use]
    pub fn packed(params: AudioParams, data: Bytes) -> Self {
        let frame_size = params.frame_size().max(1);
        Self {
            pts: None,
            pos: None,
            params,
            nb_samples: data.len() / frame_size,
            planes: vec![data],
            serial: 0,
        }
    }

    #[must_use]
    pub fn with_pts(mut self, pts: f64) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Playback duration in seconds.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn duration(&self) -> f64 {
        if self.params.sample_rate == 0 {
            0.0
        } else {
            self.nb_samples as f64 / f64::from(self.params.sample_rate)
        }
    }

    /// Interleaved bytes when the frame is already packed.
    #[must_use]
    pub fn packed_data(&self) -> Option<&Bytes> {
        if self.params.format.is_planar() {
            None
        } else {
            self.planes.first()
        }
    }
}
