// SPDX-License-Identifier: MPL-2.0
//! Compressed units and elementary stream descriptors.
//!
//! A [`Packet`] is one undecoded chunk of an elementary stream as yielded by
//! a [`MediaSource`](super::source::MediaSource). Packets without payload are
//! queue markers: a flush marker announces a timeline discontinuity, an
//! end-of-stream marker tells the decoder to drain.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::frame::{ChannelLayout, PixelFormat, SampleFormat};
use super::time_units::Rational;

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
    /// Subtitles, data tracks and anything else the engine ignores.
    Other,
}

/// Codec identity as far as the engine cares about it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodecId {
    H264,
    Hevc,
    Mpeg2Video,
    Aac,
    Mp2,
    Other(String),
}

/// Codec parameters probed from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParameters {
    pub codec: CodecId,
    /// Declared bit rate in bits per second.
    pub bit_rate: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
}

impl CodecParameters {
    /// Parameters for a video stream.
    #[must_use]
    pub fn video(codec: CodecId, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            codec,
            bit_rate: None,
            width,
            height,
            pixel_format,
            sample_rate: 0,
            channels: 0,
            channel_layout: ChannelLayout::default(),
            sample_format: SampleFormat::S16,
        }
    }

    /// Parameters for an audio stream.
    #[must_use]
    pub fn audio(codec: CodecId, sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            codec,
            bit_rate: None,
            width: 0,
            height: 0,
            pixel_format: PixelFormat::default(),
            sample_rate,
            channels,
            channel_layout: ChannelLayout::default_for(channels),
            sample_format,
        }
    }

    #[must_use]
    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }
}

/// One elementary stream of a probed source.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub media_type: MediaType,
    pub codec: CodecParameters,
    pub time_base: Rational,
    /// Stream start time in seconds.
    pub start_time: Option<f64>,
    /// Guessed frame rate for video streams.
    pub frame_rate: Option<Rational>,
    pub sample_aspect_ratio: Rational,
    /// Cover art and similar single-picture "video" streams.
    pub attached_picture: bool,
}

impl StreamInfo {
    #[must_use]
    pub fn new(index: usize, media_type: MediaType, codec: CodecParameters) -> Self {
        Self {
            index,
            media_type,
            codec,
            time_base: Rational::new(1, 1_000_000),
            start_time: None,
            frame_rate: None,
            sample_aspect_ratio: Rational::new(1, 1),
            attached_picture: false,
        }
    }

    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: Rational) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    #[must_use]
    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Data(Bytes),
    Flush,
    EndOfStream,
}

/// A compressed unit or a queue marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in seconds.
    pub pts: Option<f64>,
    /// Decode timestamp in seconds.
    pub dts: Option<f64>,
    /// Duration in seconds, `0.0` when unknown.
    pub duration: f64,
    /// Byte offset of the unit in the source.
    pub pos: Option<u64>,
    pub is_key: bool,
    payload: Payload,
}

impl Packet {
    /// Creates a data packet.
    #[must_use]
    pub fn new(stream_index: usize, data: Bytes) -> Self {
        Self::with_payload(stream_index, Payload::Data(data))
    }

    /// Creates a marker announcing a timeline discontinuity.
    #[must_use]
    pub fn flush_marker(stream_index: usize) -> Self {
        Self::with_payload(stream_index, Payload::Flush)
    }

    /// Creates a marker telling the decoder that no more data follows.
    #[must_use]
    pub fn end_of_stream(stream_index: usize) -> Self {
        Self::with_payload(stream_index, Payload::EndOfStream)
    }

    fn with_payload(stream_index: usize, payload: Payload) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: 0.0,
            pos: None,
            is_key: false,
            payload,
        }
    }

    #[must_use]
    pub fn with_pts(mut self, pts: f64) -> Self {
        self.pts = Some(pts);
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_pos(mut self, pos: u64) -> Self {
        self.pos = Some(pos);
        self
    }

    /// Payload bytes; `None` for markers.
    #[must_use]
    pub fn data(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Data(data) => Some(data),
            Payload::Flush | Payload::EndOfStream => None,
        }
    }

    /// Payload size in bytes; markers have size 0.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data().map_or(0, Bytes::len)
    }

    #[must_use]
    pub fn is_flush_marker(&self) -> bool {
        matches!(self.payload, Payload::Flush)
    }

    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.payload, Payload::EndOfStream)
    }

    /// True for any payload-less queue marker.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        self.data().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_packet_reports_payload_size() {
        let packet = Packet::new(1, Bytes::from_static(b"abcd")).with_pts(0.5);
        assert_eq!(packet.size(), 4);
        assert!(!packet.is_marker());
        assert_eq!(packet.pts, Some(0.5));
    }

    #[test]
    fn markers_have_no_payload() {
        let flush = Packet::flush_marker(0);
        assert!(flush.is_flush_marker());
        assert!(flush.is_marker());
        assert_eq!(flush.size(), 0);

        let eos = Packet::end_of_stream(0);
        assert!(eos.is_end_of_stream());
        assert!(!eos.is_flush_marker());
        assert!(eos.data().is_none());
    }

    #[test]
    fn audio_parameters_get_default_layout() {
        let params = CodecParameters::audio(CodecId::Aac, 48_000, 2, SampleFormat::F32);
        assert_eq!(params.channel_layout, ChannelLayout::STEREO);
    }
}
