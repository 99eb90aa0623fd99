// SPDX-License-Identifier: MPL-2.0
//! `libavcodec` decoders behind [`DecodePrimitive`].

use bytes::Bytes;
use ffmpeg_next::codec::context::Context;

use crate::error::{Error, Result, VideoError};
use crate::video_player::time_units::secs_to_ts;
use crate::video_player::{
    AudioFrame, AudioParams, ChannelLayout, DecodePrimitive, Drain, Feed, Packet, Plane, Rational,
    StreamInfo, VideoFrame,
};

use super::convert::{pixel_format, rational, sample_format, secs_to_ticks, ticks_to_secs};

/// Opens a decoder context, forcing `codec_name` when given.
fn open_decoder(
    stream: &StreamInfo,
    params: ffmpeg_next::codec::Parameters,
    codec_name: Option<&str>,
) -> Result<ffmpeg_next::decoder::Opened> {
    let unsupported = |e: ffmpeg_next::Error| {
        Error::from(VideoError::UnsupportedCodec(format!("{:?}: {e}", stream.codec.codec)))
    };
    let context = Context::from_parameters(params).map_err(unsupported)?;
    match codec_name {
        Some(name) => {
            let codec = ffmpeg_next::decoder::find_by_name(name)
                .ok_or_else(|| VideoError::UnsupportedCodec(format!("no decoder named {name}")))?;
            context.decoder().open_as(codec).map_err(unsupported)
        }
        None => {
            let codec = ffmpeg_next::decoder::find(context.id())
                .ok_or_else(|| VideoError::UnsupportedCodec(format!("{:?}", stream.codec.codec)))?;
            context.decoder().open_as(codec).map_err(unsupported)
        }
    }
}

/// Rebuilds an `FFmpeg` packet from an engine unit.
fn to_av_packet(packet: &Packet, time_base: Rational) -> ffmpeg_next::Packet {
    let mut out = packet
        .data()
        .map_or_else(ffmpeg_next::Packet::empty, |data| ffmpeg_next::Packet::copy(data));
    out.set_pts(secs_to_ticks(packet.pts, time_base));
    out.set_dts(secs_to_ticks(packet.dts, time_base));
    if let Some(duration) = secs_to_ts(packet.duration, time_base) {
        out.set_duration(duration);
    }
    if let Some(pos) = packet.pos.and_then(|pos| isize::try_from(pos).ok()) {
        out.set_position(pos);
    }
    if packet.is_key {
        out.set_flags(ffmpeg_next::packet::Flags::KEY);
    }
    out
}

fn feed_outcome(result: std::result::Result<(), ffmpeg_next::Error>) -> Result<Feed> {
    match result {
        Ok(()) => Ok(Feed::Accepted),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => Ok(Feed::WouldBlock),
        Err(ffmpeg_next::Error::Eof) => Ok(Feed::EndOfStream),
        Err(e) => Err(VideoError::Decode(e.to_string()).into()),
    }
}

/// Maps `receive_frame` results; `Ok(true)` means a frame was written.
fn drain_outcome(result: std::result::Result<(), ffmpeg_next::Error>) -> Result<Option<bool>> {
    match result {
        Ok(()) => Ok(Some(true)),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => Ok(Some(false)),
        Err(ffmpeg_next::Error::Eof) => Ok(None),
        Err(e) => Err(VideoError::Decode(e.to_string()).into()),
    }
}

/// Video decoding through `libavcodec`.
pub struct FfmpegVideoPrimitive {
    decoder: ffmpeg_next::decoder::Video,
    time_base: Rational,
    frame_duration: f64,
    sample_aspect_ratio: Rational,
    last_pos: Option<u64>,
}

// SAFETY: the codec context is owned exclusively by this primitive, which
// lives on a single decode thread at a time.
unsafe impl Send for FfmpegVideoPrimitive {}

impl FfmpegVideoPrimitive {
    /// Opens a decoder for `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::UnsupportedCodec`] if no decoder can be opened.
    pub fn new(
        stream: &StreamInfo,
        params: ffmpeg_next::codec::Parameters,
        codec_name: Option<&str>,
    ) -> Result<Self> {
        let decoder = open_decoder(stream, params, codec_name)?
            .video()
            .map_err(|e| VideoError::UnsupportedCodec(format!("{:?}: {e}", stream.codec.codec)))?;
        let frame_duration = stream
            .frame_rate
            .and_then(|rate| rate.invert().to_f64())
            .unwrap_or(0.0);
        Ok(Self {
            decoder,
            time_base: stream.time_base,
            frame_duration,
            sample_aspect_ratio: stream.sample_aspect_ratio,
            last_pos: None,
        })
    }

    fn convert(&self, frame: &ffmpeg_next::frame::Video) -> VideoFrame {
        let planes = (0..frame.planes())
            .map(|index| Plane {
                data: Bytes::copy_from_slice(frame.data(index)),
                stride: frame.stride(index),
            })
            .collect();
        let aspect = rational(frame.aspect_ratio());
        VideoFrame {
            pts: ticks_to_secs(frame.pts(), self.time_base),
            best_effort_pts: ticks_to_secs(frame.timestamp(), self.time_base),
            duration: self.frame_duration,
            pos: self.last_pos,
            width: frame.width(),
            height: frame.height(),
            format: pixel_format(frame.format()),
            sample_aspect_ratio: if aspect.to_f64().is_some() {
                aspect
            } else {
                self.sample_aspect_ratio
            },
            planes,
            serial: 0,
        }
    }
}

impl DecodePrimitive for FfmpegVideoPrimitive {
    type Frame = VideoFrame;

    fn feed(&mut self, packet: Option<&Packet>) -> Result<Feed> {
        let result = match packet {
            Some(packet) => {
                if packet.pos.is_some() {
                    self.last_pos = packet.pos;
                }
                self.decoder.send_packet(&to_av_packet(packet, self.time_base))
            }
            None => self.decoder.send_eof(),
        };
        feed_outcome(result)
    }

    fn drain(&mut self) -> Result<Drain<VideoFrame>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        Ok(match drain_outcome(self.decoder.receive_frame(&mut frame))? {
            Some(true) => Drain::Frame(self.convert(&frame)),
            Some(false) => Drain::WouldBlock,
            None => Drain::EndOfStream,
        })
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.last_pos = None;
    }
}

/// Audio decoding through `libavcodec`.
pub struct FfmpegAudioPrimitive {
    decoder: ffmpeg_next::decoder::Audio,
    time_base: Rational,
    last_pos: Option<u64>,
}

// SAFETY: the codec context is owned exclusively by this primitive, which
// lives on a single decode thread at a time.
unsafe impl Send for FfmpegAudioPrimitive {}

impl FfmpegAudioPrimitive {
    /// Opens a decoder for `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::UnsupportedCodec`] if no decoder can be opened.
    pub fn new(
        stream: &StreamInfo,
        params: ffmpeg_next::codec::Parameters,
        codec_name: Option<&str>,
    ) -> Result<Self> {
        let decoder = open_decoder(stream, params, codec_name)?
            .audio()
            .map_err(|e| VideoError::UnsupportedCodec(format!("{:?}: {e}", stream.codec.codec)))?;
        Ok(Self {
            decoder,
            time_base: stream.time_base,
            last_pos: None,
        })
    }

    fn convert(&self, frame: &ffmpeg_next::frame::Audio) -> Result<AudioFrame> {
        let format = sample_format(frame.format())
            .ok_or_else(|| VideoError::Decode(format!("unsupported sample format {:?}", frame.format())))?;
        let channels = u16::try_from(frame.channels()).unwrap_or_default();
        let params = AudioParams {
            sample_rate: frame.rate(),
            channels,
            channel_layout: ChannelLayout::default_for(channels),
            format,
        };
        let nb_samples = frame.samples();

        // Planes are padded; keep only the samples.
        let (plane_count, plane_len) = if format.is_planar() {
            (usize::from(channels), nb_samples * format.bytes_per_sample())
        } else {
            (1, nb_samples * params.frame_size())
        };
        let planes = (0..plane_count)
            .map(|index| {
                let data = frame.data(index);
                Bytes::copy_from_slice(&data[..plane_len.min(data.len())])
            })
            .collect();

        Ok(AudioFrame {
            pts: ticks_to_secs(frame.timestamp().or_else(|| frame.pts()), self.time_base),
            pos: self.last_pos,
            params,
            nb_samples,
            planes,
            serial: 0,
        })
    }
}

impl DecodePrimitive for FfmpegAudioPrimitive {
    type Frame = AudioFrame;

    fn feed(&mut self, packet: Option<&Packet>) -> Result<Feed> {
        let result = match packet {
            Some(packet) => {
                if packet.pos.is_some() {
                    self.last_pos = packet.pos;
                }
                self.decoder.send_packet(&to_av_packet(packet, self.time_base))
            }
            None => self.decoder.send_eof(),
        };
        feed_outcome(result)
    }

    fn drain(&mut self) -> Result<Drain<AudioFrame>> {
        let mut frame = ffmpeg_next::frame::Audio::empty();
        Ok(match drain_outcome(self.decoder.receive_frame(&mut frame))? {
            Some(true) => Drain::Frame(self.convert(&frame)?),
            Some(false) => Drain::WouldBlock,
            None => Drain::EndOfStream,
        })
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.last_pos = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn again_maps_to_would_block() {
        let again = Err(ffmpeg_next::Error::Other {
            errno: ffmpeg_next::error::EAGAIN,
        });
        assert_eq!(feed_outcome(again.clone()).ok(), Some(Feed::WouldBlock));
        assert_eq!(drain_outcome(again).ok(), Some(Some(false)));
    }

    #[test]
    fn eof_maps_to_end_of_stream() {
        assert_eq!(feed_outcome(Err(ffmpeg_next::Error::Eof)).ok(), Some(Feed::EndOfStream));
        assert_eq!(drain_outcome(Err(ffmpeg_next::Error::Eof)).ok(), Some(None));
    }

    #[test]
    fn other_failures_are_decode_errors() {
        let result = feed_outcome(Err(ffmpeg_next::Error::InvalidData));
        assert!(matches!(result, Err(Error::Video(VideoError::Decode(_)))));
    }

    #[test]
    fn packets_keep_timing_in_stream_ticks() {
        let time_base = Rational::new(1, 90_000);
        let mut unit = Packet::new(0, Bytes::from_static(b"\x00\x00\x01")).with_pts(2.0);
        unit.is_key = true;
        unit.duration = 0.04;
        let packet = to_av_packet(&unit, time_base);
        assert_eq!(packet.pts(), Some(180_000));
        assert_eq!(packet.dts(), None);
        assert_eq!(packet.duration(), 3_600);
        assert!(packet.is_key());
        assert_eq!(packet.size(), 3);
    }
}
