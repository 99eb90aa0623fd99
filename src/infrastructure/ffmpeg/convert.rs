// SPDX-License-Identifier: MPL-2.0
//! Mapping between `FFmpeg` types and the engine's own descriptors.

use ffmpeg_next::codec::Id;
use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::media::Type as Medium;

use crate::video_player::time_units::{secs_to_ts, ts_to_secs};
use crate::video_player::{CodecId, MediaType, PixelFormat, Rational, SampleFormat};

pub(super) fn rational(value: ffmpeg_next::Rational) -> Rational {
    Rational::new(value.numerator(), value.denominator())
}

pub(super) fn media_type(medium: Medium) -> MediaType {
    match medium {
        Medium::Video => MediaType::Video,
        Medium::Audio => MediaType::Audio,
        _ => MediaType::Other,
    }
}

pub(super) fn codec_id(id: Id) -> CodecId {
    match id {
        Id::H264 => CodecId::H264,
        Id::HEVC => CodecId::Hevc,
        Id::MPEG2VIDEO => CodecId::Mpeg2Video,
        Id::AAC => CodecId::Aac,
        Id::MP2 => CodecId::Mp2,
        other => CodecId::Other(other.name().to_string()),
    }
}

pub(super) fn pixel_format(format: Pixel) -> PixelFormat {
    match format {
        Pixel::YUV420P => PixelFormat::Yuv420p,
        Pixel::NV12 => PixelFormat::Nv12,
        Pixel::RGB24 => PixelFormat::Rgb24,
        Pixel::RGBA => PixelFormat::Rgba,
        Pixel::BGRA => PixelFormat::Bgra,
        other => PixelFormat::Other(ffmpeg_next::ffi::AVPixelFormat::from(other) as i32),
    }
}

/// Maps a decoder sample format; `None` for formats the engine cannot carry.
pub(super) fn sample_format(format: Sample) -> Option<SampleFormat> {
    let format = match format {
        Sample::U8(kind) => layout(kind, SampleFormat::U8, SampleFormat::U8Planar),
        Sample::I16(kind) => layout(kind, SampleFormat::S16, SampleFormat::S16Planar),
        Sample::I32(kind) => layout(kind, SampleFormat::S32, SampleFormat::S32Planar),
        Sample::F32(kind) => layout(kind, SampleFormat::F32, SampleFormat::F32Planar),
        Sample::F64(kind) => layout(kind, SampleFormat::F64, SampleFormat::F64Planar),
        _ => return None,
    };
    Some(format)
}

fn layout(kind: SampleType, packed: SampleFormat, planar: SampleFormat) -> SampleFormat {
    match kind {
        SampleType::Packed => packed,
        SampleType::Planar => planar,
    }
}

/// Inverse of [`sample_format`].
pub(super) fn av_sample_format(format: SampleFormat) -> Sample {
    let kind = if format.is_planar() {
        SampleType::Planar
    } else {
        SampleType::Packed
    };
    match format.packed() {
        SampleFormat::U8 | SampleFormat::U8Planar => Sample::U8(kind),
        SampleFormat::S16 | SampleFormat::S16Planar => Sample::I16(kind),
        SampleFormat::S32 | SampleFormat::S32Planar => Sample::I32(kind),
        SampleFormat::F32 | SampleFormat::F32Planar => Sample::F32(kind),
        SampleFormat::F64 | SampleFormat::F64Planar => Sample::F64(kind),
    }
}

/// Conventional `FFmpeg` layout for a channel count.
pub(super) fn av_channel_layout(channels: u16) -> ffmpeg_next::ChannelLayout {
    match channels {
        1 => ffmpeg_next::ChannelLayout::MONO,
        2 => ffmpeg_next::ChannelLayout::STEREO,
        n => ffmpeg_next::ChannelLayout::default(i32::from(n)),
    }
}

/// Timestamp in stream ticks to seconds; `None` stays invalid.
pub(super) fn ticks_to_secs(ts: Option<i64>, time_base: Rational) -> Option<f64> {
    ts.and_then(|ts| ts_to_secs(ts, time_base))
}

pub(super) fn secs_to_ticks(secs: Option<f64>, time_base: Rational) -> Option<i64> {
    secs.and_then(|secs| secs_to_ts(secs, time_base))
}

/// Container-level timestamps in `AV_TIME_BASE` units to seconds.
#[allow(clippy::cast_precision_loss)]
pub(super) fn container_secs(ts: i64) -> Option<f64> {
    valid_ts(ts).map(|ts| ts as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE))
}

/// Seconds to `AV_TIME_BASE` units.
#[allow(clippy::cast_possible_truncation)]
pub(super) fn container_ticks(secs: f64) -> i64 {
    (secs * f64::from(ffmpeg_next::ffi::AV_TIME_BASE)).round() as i64
}

/// `AV_NOPTS_VALUE` marks a missing timestamp.
pub(super) fn valid_ts(ts: i64) -> Option<i64> {
    (ts != ffmpeg_next::ffi::AV_NOPTS_VALUE).then_some(ts)
}
