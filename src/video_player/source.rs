// SPDX-License-Identifier: MPL-2.0
//! Ports to the media backend: demuxing, decoding and conversion.
//!
//! The engine never talks to a codec library directly. A [`MediaBackend`]
//! opens [`MediaSource`]s and builds decode primitives, resamplers and
//! optional filters for the streams the engine selects. The `FFmpeg` adapter
//! in `infrastructure::ffmpeg` is one implementation; tests provide
//! synthetic ones.
//!
//! # Lifecycle
//!
//! 1. [`MediaBackend::open`] probes the source and returns a [`MediaSource`]
//! 2. The read thread inspects [`MediaSource::info`] and opens streams
//! 3. The backend builds one decode primitive per opened stream
//! 4. [`MediaSource::read_packet`] is called until end of file or abort
//! 5. [`MediaSource::seek`] repositions the source between reads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, VideoError};

use super::audio::{LinearResampler, Resampler};
use super::decoder::DecodePrimitive;
#[cfg(feature = "filter-graph")]
use super::filter::FrameFilter;
use super::frame::{AudioFrame, AudioParams, VideoFrame};
use super::packet::{MediaType, Packet, StreamInfo};
use super::seek::SeekRange;

/// Stop flag polled by blocking source operations.
///
/// Set by [`Engine::abort`](super::engine::Engine::abort); sources must
/// return [`ReadError::Interrupted`] promptly once it is raised.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A chapter of the source timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chapter {
    pub start: f64,
    pub end: f64,
}

/// What probing revealed about a source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceInfo {
    /// Short container name, e.g. `"mp4"` or `"ogg"`.
    pub format_name: String,
    pub streams: Vec<StreamInfo>,
    pub chapters: Vec<Chapter>,
    /// Container bit rate in bits per second.
    pub bit_rate: Option<u64>,
    /// Earliest timestamp in seconds.
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    /// Live input that cannot be paused or buffered ahead meaningfully.
    pub realtime: bool,
    /// Timestamps may jump, e.g. MPEG-TS splices.
    pub timestamp_discontinuities: bool,
    /// The source can only seek by byte offset.
    pub byte_seek_only: bool,
}

impl SourceInfo {
    /// Streams of `media_type`, in source order.
    pub fn streams_of(&self, media_type: MediaType) -> impl Iterator<Item = &StreamInfo> {
        self.streams
            .iter()
            .filter(move |stream| stream.media_type == media_type)
    }

    #[must_use]
    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.iter().find(|stream| stream.index == index)
    }

    /// Index of the chapter containing `position`, or of the last chapter
    /// starting before it.
    #[must_use]
    pub fn chapter_at(&self, position: f64) -> Option<usize> {
        self.chapters
            .iter()
            .rposition(|chapter| chapter.start <= position)
    }
}

/// Why [`MediaSource::read_packet`] produced no unit.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadError {
    EndOfFile,
    /// The [`InterruptFlag`] was raised.
    Interrupted,
    /// Any other failure; the read thread treats it like end of file.
    Failed(String),
}

/// A demuxed input.
pub trait MediaSource: Send {
    fn info(&self) -> &SourceInfo;

    /// Reads the next compressed unit. Timestamps are in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::EndOfFile`] at the end of input and
    /// [`ReadError::Interrupted`] once the interrupt flag is raised.
    fn read_packet(&mut self) -> std::result::Result<Packet, ReadError>;

    /// Repositions the source inside `range`.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::Seek`] when the source cannot reach the range.
    fn seek(&mut self, range: &SeekRange) -> Result<()>;

    /// Current byte offset, used to anchor byte seeks.
    fn byte_position(&self) -> Option<u64> {
        None
    }

    /// Pauses a network source.
    ///
    /// # Errors
    ///
    /// The default reports [`VideoError::Unsupported`].
    fn pause(&mut self) -> Result<()> {
        Err(VideoError::Unsupported.into())
    }

    /// Resumes a paused network source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot resume.
    fn play(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type VideoPrimitive = Box<dyn DecodePrimitive<Frame = VideoFrame>>;
pub type AudioPrimitive = Box<dyn DecodePrimitive<Frame = AudioFrame>>;

/// Factory for everything codec-specific.
///
/// Shared between the read thread and stream switches, hence `Sync`.
pub trait MediaBackend: Send + Sync {
    /// Opens and probes `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::Open`] if the input cannot be read or probed.
    fn open(&self, uri: &str, interrupt: InterruptFlag) -> Result<Box<dyn MediaSource>>;

    /// Builds a video decode primitive, honoring a forced decoder name.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::UnsupportedCodec`] if no decoder fits.
    fn video_decoder(&self, stream: &StreamInfo, codec_name: Option<&str>) -> Result<VideoPrimitive>;

    /// Builds an audio decode primitive, honoring a forced decoder name.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::UnsupportedCodec`] if no decoder fits.
    fn audio_decoder(&self, stream: &StreamInfo, codec_name: Option<&str>) -> Result<AudioPrimitive>;

    /// Builds a converter from `src` to the device format `tgt`.
    ///
    /// Defaults to [`LinearResampler`].
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::Resampler`] if the conversion is impossible.
    fn resampler(&self, src: AudioParams, tgt: AudioParams) -> Result<Box<dyn Resampler>> {
        Ok(Box::new(LinearResampler::new(src, tgt)?))
    }

    /// Optional stage between the video decoder and its frame queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter cannot be configured.
    #[cfg(feature = "filter-graph")]
    fn video_filter(&self, _stream: &StreamInfo) -> Result<Option<Box<dyn FrameFilter<VideoFrame>>>> {
        Ok(None)
    }

    /// Optional stage between the audio decoder and its frame queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter cannot be configured.
    #[cfg(feature = "filter-graph")]
    fn audio_filter(&self, _stream: &StreamInfo) -> Result<Option<Box<dyn FrameFilter<AudioFrame>>>> {
        Ok(None)
    }
}
