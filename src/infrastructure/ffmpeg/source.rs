// SPDX-License-Identifier: MPL-2.0
//! Demuxing through `libavformat`.

use std::os::raw::c_int;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use ffmpeg_next::codec::context::Context;
use ffmpeg_next::format::stream::Disposition;

use crate::error::{Result, VideoError};
use crate::video_player::{
    Chapter, CodecParameters, InterruptFlag, MediaSource, MediaType, Packet, PixelFormat,
    Rational, ReadError, SampleFormat, SeekRange, SeekUnit, SourceInfo, StreamInfo,
};

use super::convert::{
    codec_id, container_secs, container_ticks, media_type, pixel_format, rational, sample_format,
    ticks_to_secs, valid_ts,
};

/// Containers whose input is consumed live.
const REALTIME_FORMATS: [&str; 3] = ["rtp", "rtsp", "sdp"];
const REALTIME_SCHEMES: [&str; 2] = ["rtp:", "udp:"];

/// Demuxers with a seek routine of their own. The public `AVInputFormat`
/// no longer carries `read_seek`, so presence is looked up by name.
const NATIVE_SEEK_FORMATS: [&str; 16] = [
    "ape",
    "asf",
    "avi",
    "dash",
    "flac",
    "flv",
    "hls",
    "matroska",
    "mov",
    "mp3",
    "mpc",
    "nut",
    "ogg",
    "rtsp",
    "smoothstreaming",
    "wtv",
];

/// Pause between retries when a network demuxer has nothing yet.
const READ_RETRY_WAIT: Duration = Duration::from_millis(10);

/// A demuxed `FFmpeg` input.
pub struct FfmpegSource {
    input: ffmpeg_next::format::context::Input,
    info: SourceInfo,
    interrupt: InterruptFlag,
    last_pos: Option<u64>,
}

// SAFETY: the format context is only ever used by the thread that owns the
// source; the engine moves it into its read thread once and never shares it.
unsafe impl Send for FfmpegSource {}

impl std::fmt::Debug for FfmpegSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegSource")
            .field("info", &self.info)
            .field("last_pos", &self.last_pos)
            .finish_non_exhaustive()
    }
}

impl FfmpegSource {
    /// Opens and probes `uri`; blocking calls give up once `interrupt` is
    /// raised.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::Open`] if the input cannot be opened.
    pub fn open(uri: &str, interrupt: InterruptFlag) -> Result<Self> {
        let path = PathBuf::from(uri);
        let flag = interrupt.clone();
        let input = ffmpeg_next::format::input_with_interrupt(&path, move || flag.is_raised())
            .map_err(|e| VideoError::Open(format!("{uri}: {e}")))?;

        let info = probe(&input, uri);
        tracing::debug!(
            uri,
            format = %info.format_name,
            streams = info.streams.len(),
            duration = ?info.duration,
            "source probed"
        );

        Ok(Self {
            input,
            info,
            interrupt,
            last_pos: None,
        })
    }

    /// Detached copies of every stream's codec parameters, keyed by index.
    pub(super) fn stream_parameters(&self) -> Vec<(usize, ffmpeg_next::codec::Parameters)> {
        self.input
            .streams()
            .map(|stream| (stream.index(), stream.parameters().clone()))
            .collect()
    }

    fn time_base(&self, stream_index: usize) -> Rational {
        self.info
            .stream(stream_index)
            .map_or_else(|| Rational::new(1, 1_000_000), |stream| stream.time_base)
    }

    fn convert_packet(&self, packet: &ffmpeg_next::Packet) -> Packet {
        let stream_index = packet.stream();
        let time_base = self.time_base(stream_index);
        let data = packet.data().map_or_else(Bytes::new, Bytes::copy_from_slice);

        let mut unit = Packet::new(stream_index, data);
        unit.pts = ticks_to_secs(packet.pts(), time_base);
        unit.dts = ticks_to_secs(packet.dts(), time_base);
        unit.duration = ticks_to_secs(Some(packet.duration()), time_base).unwrap_or(0.0);
        unit.pos = u64::try_from(packet.position()).ok();
        unit.is_key = packet.is_key();
        unit
    }
}

impl MediaSource for FfmpegSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read_packet(&mut self) -> std::result::Result<Packet, ReadError> {
        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    let unit = self.convert_packet(&packet);
                    if unit.pos.is_some() {
                        self.last_pos = unit.pos;
                    }
                    return Ok(unit);
                }
                Err(ffmpeg_next::Error::Eof) => return Err(ReadError::EndOfFile),
                Err(_) if self.interrupt.is_raised() => return Err(ReadError::Interrupted),
                Err(ffmpeg_next::Error::Exit) => return Err(ReadError::Interrupted),
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                    std::thread::sleep(READ_RETRY_WAIT);
                }
                Err(e) => return Err(ReadError::Failed(e.to_string())),
            }
        }
    }

    fn seek(&mut self, range: &SeekRange) -> Result<()> {
        let (target, min, max, flags) = match range.unit {
            SeekUnit::Time => (
                container_ticks(range.target),
                range.min.map_or(i64::MIN, container_ticks),
                range.max.map_or(i64::MAX, container_ticks),
                0,
            ),
            #[allow(clippy::cast_possible_truncation)]
            SeekUnit::Bytes => (
                range.target as i64,
                range.min.map_or(i64::MIN, |min| min as i64),
                range.max.map_or(i64::MAX, |max| max as i64),
                ffmpeg_next::ffi::AVSEEK_FLAG_BYTE as c_int,
            ),
        };

        // SAFETY: the pointer comes from a live, exclusively borrowed context
        let ret = unsafe {
            ffmpeg_next::ffi::avformat_seek_file(self.input.as_mut_ptr(), -1, min, target, max, flags)
        };
        if ret < 0 {
            return Err(VideoError::Seek(format!(
                "{}: {}",
                range.target,
                ffmpeg_next::Error::from(ret)
            ))
            .into());
        }
        if range.unit == SeekUnit::Bytes {
            self.last_pos = u64::try_from(target).ok();
        }
        Ok(())
    }

    fn byte_position(&self) -> Option<u64> {
        self.last_pos
    }

    fn pause(&mut self) -> Result<()> {
        // SAFETY: the pointer comes from a live, exclusively borrowed context
        let ret = unsafe { ffmpeg_next::ffi::av_read_pause(self.input.as_mut_ptr()) };
        if ret < 0 {
            return Err(VideoError::Unsupported.into());
        }
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        // SAFETY: the pointer comes from a live, exclusively borrowed context
        let ret = unsafe { ffmpeg_next::ffi::av_read_play(self.input.as_mut_ptr()) };
        if ret < 0 {
            return Err(VideoError::Other(format!(
                "failed to resume input: {}",
                ffmpeg_next::Error::from(ret)
            ))
            .into());
        }
        Ok(())
    }
}

fn probe(input: &ffmpeg_next::format::context::Input, uri: &str) -> SourceInfo {
    let format_name = input.format().name().to_string();
    let realtime = is_realtime(&format_name, uri);

    // SAFETY: iformat is set for every successfully opened input and
    // start_time is a plain field of the live context
    let (format_flags, start_time) = unsafe {
        let ctx = input.as_ptr();
        ((*(*ctx).iformat).flags, (*ctx).start_time)
    };
    let has_flag = |flag: i64| i64::from(format_flags) & flag != 0;

    SourceInfo {
        realtime,
        timestamp_discontinuities: has_flag(i64::from(ffmpeg_next::ffi::AVFMT_TS_DISCONT as c_int)),
        byte_seek_only: byte_seek_only(&format_name, format_flags),
        streams: input.streams().map(|stream| probe_stream(&stream)).collect(),
        chapters: input
            .chapters()
            .filter_map(|chapter| {
                let time_base = rational(chapter.time_base());
                Some(Chapter {
                    start: ticks_to_secs(Some(chapter.start()), time_base)?,
                    end: ticks_to_secs(Some(chapter.end()), time_base)?,
                })
            })
            .collect(),
        bit_rate: u64::try_from(input.bit_rate()).ok().filter(|&rate| rate > 0),
        start_time: container_secs(start_time),
        duration: container_secs(input.duration()).filter(|&duration| duration > 0.0),
        format_name,
    }
}

fn has_native_seek(format_name: &str) -> bool {
    format_name
        .split(',')
        .any(|name| NATIVE_SEEK_FORMATS.contains(&name))
}

/// Demuxers that can neither search by timestamp nor seek on their own;
/// audio then starts at the stream start time.
fn byte_seek_only(format_name: &str, format_flags: c_int) -> bool {
    let no_search = (ffmpeg_next::ffi::AVFMT_NO_BYTE_SEEK
        | ffmpeg_next::ffi::AVFMT_NOBINSEARCH
        | ffmpeg_next::ffi::AVFMT_NOGENSEARCH) as c_int;
    format_flags & no_search != 0 && !has_native_seek(format_name)
}

fn is_realtime(format_name: &str, uri: &str) -> bool {
    format_name
        .split(',')
        .any(|name| REALTIME_FORMATS.contains(&name))
        || REALTIME_SCHEMES.iter().any(|scheme| uri.starts_with(scheme))
}

fn probe_stream(stream: &ffmpeg_next::format::stream::Stream<'_>) -> StreamInfo {
    let params = stream.parameters();
    let medium = media_type(params.medium());
    let codec = codec_id(params.id());

    let mut sample_aspect_ratio = Rational::new(1, 1);
    let codec = match medium {
        MediaType::Video => {
            let probed = Context::from_parameters(params.clone())
                .and_then(|context| context.decoder().video());
            match probed {
                Ok(video) => {
                    let aspect = rational(video.aspect_ratio());
                    if aspect.to_f64().is_some() {
                        sample_aspect_ratio = aspect;
                    }
                    let mut codec =
                        CodecParameters::video(codec, video.width(), video.height(), pixel_format(video.format()));
                    codec.bit_rate = positive_rate(video.bit_rate());
                    codec
                }
                Err(e) => {
                    tracing::debug!(index = stream.index(), %e, "video stream not probed");
                    CodecParameters::video(codec, 0, 0, PixelFormat::default())
                }
            }
        }
        MediaType::Audio => {
            let probed = Context::from_parameters(params.clone())
                .and_then(|context| context.decoder().audio());
            match probed {
                Ok(audio) => {
                    let mut codec = CodecParameters::audio(
                        codec,
                        audio.rate(),
                        u16::try_from(audio.channels()).unwrap_or_default(),
                        sample_format(audio.format()).unwrap_or(SampleFormat::S16),
                    );
                    codec.bit_rate = positive_rate(audio.bit_rate());
                    codec
                }
                Err(e) => {
                    tracing::debug!(index = stream.index(), %e, "audio stream not probed");
                    CodecParameters::audio(codec, 0, 0, SampleFormat::S16)
                }
            }
        }
        MediaType::Other => CodecParameters::video(codec, 0, 0, PixelFormat::default()),
    };

    let time_base = rational(stream.time_base());
    let frame_rate = [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .map(rational)
        .find(|rate| rate.to_f64().is_some());

    StreamInfo {
        index: stream.index(),
        media_type: medium,
        codec,
        time_base,
        start_time: ticks_to_secs(valid_ts(stream.start_time()), time_base),
        frame_rate,
        sample_aspect_ratio,
        attached_picture: stream.disposition().contains(Disposition::ATTACHED_PIC),
    }
}

fn positive_rate(bit_rate: usize) -> Option<u64> {
    u64::try_from(bit_rate).ok().filter(|&rate| rate > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_inputs_are_realtime() {
        assert!(is_realtime("rtsp", "rtsp://camera/stream"));
        assert!(is_realtime("mpegts", "udp://239.0.0.1:1234"));
        assert!(is_realtime("sdp", "session.sdp"));
        assert!(!is_realtime("mov,mp4,m4a,3gp,3g2,mj2", "clip.mp4"));
        assert!(!is_realtime("mpegts", "/media/recording.ts"));
    }

    #[test]
    fn byte_seek_only_needs_missing_search_and_seek() {
        let no_bin_search = ffmpeg_next::ffi::AVFMT_NOBINSEARCH as c_int;
        let no_gen_search = ffmpeg_next::ffi::AVFMT_NOGENSEARCH as c_int;
        let ts_discont = ffmpeg_next::ffi::AVFMT_TS_DISCONT as c_int;

        assert!(byte_seek_only("s337m", no_bin_search));
        assert!(byte_seek_only("s337m", no_bin_search | ts_discont));
        assert!(!byte_seek_only("s337m", ts_discont));
        // Native seekers are never byte-seek-only, whatever their flags.
        assert!(!byte_seek_only("asf", no_bin_search | no_gen_search));
        assert!(!byte_seek_only("hls", no_gen_search));
        assert!(!byte_seek_only("matroska,webm", no_bin_search));
    }

    #[test]
    fn sample_clip_probes_when_available() {
        let path = "tests/data/sample.mp4";
        if !std::path::Path::new(path).exists() {
            eprintln!("Test video not found, skipping test");
            return;
        }
        super::super::init_ffmpeg().expect("ffmpeg init");

        let mut source = FfmpegSource::open(path, InterruptFlag::new()).expect("open sample");
        assert!(source.info().streams_of(MediaType::Video).next().is_some());
        assert!(source.info().duration.is_some());

        let packet = source.read_packet().expect("first packet");
        assert!(packet.size() > 0);
    }

    #[test]
    fn raised_interrupt_aborts_open() {
        let interrupt = InterruptFlag::new();
        interrupt.raise();
        super::super::init_ffmpeg().expect("ffmpeg init");
        assert!(FfmpegSource::open("/nonexistent/clip.ts", interrupt).is_err());
    }
}
