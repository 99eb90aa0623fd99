// SPDX-License-Identifier: MPL-2.0
//! `FFmpeg` adapter implementing [`MediaBackend`].
//!
//! - [`FfmpegSource`] demuxes a URI with interrupt support
//! - [`FfmpegVideoPrimitive`] and [`FfmpegAudioPrimitive`] map
//!   `send_packet`/`receive_frame` to feed/drain
//! - [`FfmpegResampler`] converts audio to the device format with
//!   `libswresample`, including drift compensation
//!
//! Decoders need the codec parameters of the source they belong to, so the
//! backend keeps a copy of the parameters of the last opened source.
//!
//! [`MediaBackend`]: crate::video_player::MediaBackend

mod convert;
mod decode;
mod resample;
mod source;

use std::collections::HashMap;
use std::sync::Once;

use parking_lot::Mutex;

use crate::error::{Error, Result, VideoError};
use crate::video_player::{
    AudioParams, AudioPrimitive, InterruptFlag, MediaBackend, MediaSource, Resampler, StreamInfo,
    VideoPrimitive,
};

pub use decode::{FfmpegAudioPrimitive, FfmpegVideoPrimitive};
pub use resample::FfmpegResampler;
pub use source::FfmpegSource;

static FFMPEG_INIT: Once = Once::new();

/// Initializes `FFmpeg` once per process and quiets its logging to errors.
///
/// # Errors
///
/// Returns [`Error::Io`] if `FFmpeg` fails to initialize.
pub fn init_ffmpeg() -> Result<()> {
    let mut init_result: Result<()> = Ok(());

    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            init_result = Err(Error::Io(format!("FFmpeg initialization failed: {e}")));
            return;
        }

        // SAFETY: av_log_set_level is thread-safe and only affects logging
        unsafe {
            ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_ERROR);
        }
    });

    init_result
}

/// Codec parameters detached from their source.
struct StreamParameters(ffmpeg_next::codec::Parameters);

// SAFETY: the parameters are an owned copy (cloning allocates a fresh
// AVCodecParameters with no back-reference to the format context) and are
// only accessed under the backend's mutex.
unsafe impl Send for StreamParameters {}

/// [`MediaBackend`] decoding with `FFmpeg`.
#[derive(Default)]
pub struct FfmpegBackend {
    parameters: Mutex<HashMap<usize, StreamParameters>>,
}

impl std::fmt::Debug for FfmpegBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegBackend")
            .field("streams", &self.parameters.lock().len())
            .finish()
    }
}

impl FfmpegBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn parameters_for(&self, stream: &StreamInfo) -> Result<ffmpeg_next::codec::Parameters> {
        self.parameters
            .lock()
            .get(&stream.index)
            .map(|params| params.0.clone())
            .ok_or_else(|| {
                VideoError::Other(format!("no codec parameters for stream {}", stream.index)).into()
            })
    }
}

impl MediaBackend for FfmpegBackend {
    fn open(&self, uri: &str, interrupt: InterruptFlag) -> Result<Box<dyn MediaSource>> {
        init_ffmpeg()?;
        let source = FfmpegSource::open(uri, interrupt)?;
        *self.parameters.lock() = source
            .stream_parameters()
            .into_iter()
            .map(|(index, params)| (index, StreamParameters(params)))
            .collect();
        Ok(Box::new(source))
    }

    fn video_decoder(&self, stream: &StreamInfo, codec_name: Option<&str>) -> Result<VideoPrimitive> {
        let params = self.parameters_for(stream)?;
        Ok(Box::new(FfmpegVideoPrimitive::new(stream, params, codec_name)?))
    }

    fn audio_decoder(&self, stream: &StreamInfo, codec_name: Option<&str>) -> Result<AudioPrimitive> {
        let params = self.parameters_for(stream)?;
        Ok(Box::new(FfmpegAudioPrimitive::new(stream, params, codec_name)?))
    }

    fn resampler(&self, src: AudioParams, tgt: AudioParams) -> Result<Box<dyn Resampler>> {
        init_ffmpeg()?;
        Ok(Box::new(FfmpegResampler::new(src, tgt)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_player::{
        AudioFrame, CodecId, CodecParameters, MediaType, PixelFormat, SampleFormat,
    };

    #[test]
    fn init_is_idempotent() {
        assert!(init_ffmpeg().is_ok());
        assert!(init_ffmpeg().is_ok());
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let backend = FfmpegBackend::new();
        let result = backend.open("/nonexistent/clip.mkv", InterruptFlag::new());
        assert!(matches!(result, Err(Error::Video(VideoError::Open(_)))));
    }

    #[test]
    fn decoder_needs_an_opened_source() {
        let backend = FfmpegBackend::new();
        let stream = StreamInfo::new(
            0,
            MediaType::Video,
            CodecParameters::video(CodecId::H264, 320, 240, PixelFormat::Yuv420p),
        );
        assert!(backend.video_decoder(&stream, None).is_err());
    }

    #[test]
    fn resampler_keeps_state_between_frames() {
        let backend = FfmpegBackend::new();
        let src = AudioParams::new(44_100, 1, SampleFormat::F32);
        let tgt = AudioParams::new(48_000, 2, SampleFormat::F32);
        let mut resampler = backend.resampler(src, tgt).expect("swresample converter");

        let frame = AudioFrame::packed(src, bytes::Bytes::from(0.5f32.to_ne_bytes().repeat(441)));
        let total: usize = (0..10)
            .map(|_| resampler.convert(&frame, 1024).expect("convert").len() / tgt.frame_size())
            .sum();
        // 10 × 441 input samples are 4800 output samples, minus the filter delay.
        assert!((4_700..=4_800).contains(&total), "converted {total} samples");
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn backend_is_shareable() {
        assert_send_sync::<FfmpegBackend>();
    }
}
