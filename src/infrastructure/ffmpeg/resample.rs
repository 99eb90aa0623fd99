// SPDX-License-Identifier: MPL-2.0
//! Sample conversion through `libswresample`.

use std::os::raw::c_int;

use bytes::Bytes;
use ffmpeg_next::software::resampling;

use crate::error::{Result, VideoError};
use crate::video_player::{AudioFrame, AudioParams, Resampler};

use super::convert::{av_channel_layout, av_sample_format};

/// [`Resampler`] backed by an `SwrContext`.
///
/// The context keeps its filter history between frames, so consecutive
/// frames resample as one continuous signal.
pub struct FfmpegResampler {
    context: resampling::Context,
    src: AudioParams,
    tgt: AudioParams,
}

// SAFETY: the SwrContext is owned exclusively by this resampler, which the
// engine only touches under its audio path lock.
unsafe impl Send for FfmpegResampler {}

impl FfmpegResampler {
    /// Builds a converter from `src` to packed `tgt` samples.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::Resampler`] if `libswresample` rejects the pair.
    pub fn new(src: AudioParams, tgt: AudioParams) -> Result<Self> {
        let tgt = AudioParams {
            format: tgt.format.packed(),
            ..tgt
        };
        let context = resampling::Context::get(
            av_sample_format(src.format),
            av_channel_layout(src.channels),
            src.sample_rate,
            av_sample_format(tgt.format),
            av_channel_layout(tgt.channels),
            tgt.sample_rate,
        )
        .map_err(|e| {
            VideoError::Resampler(format!(
                "cannot convert {} Hz/{} ch/{:?} to {} Hz/{} ch/{:?}: {e}",
                src.sample_rate, src.channels, src.format, tgt.sample_rate, tgt.channels, tgt.format
            ))
        })?;
        Ok(Self { context, src, tgt })
    }

    fn input_frame(&self, frame: &AudioFrame) -> ffmpeg_next::frame::Audio {
        let mut input = ffmpeg_next::frame::Audio::new(
            av_sample_format(self.src.format),
            frame.nb_samples,
            av_channel_layout(self.src.channels),
        );
        input.set_rate(self.src.sample_rate);
        let planes = input.planes();
        for (index, plane) in frame.planes.iter().enumerate().take(planes) {
            let data = input.data_mut(index);
            let len = plane.len().min(data.len());
            data[..len].copy_from_slice(&plane[..len]);
        }
        input
    }
}

impl Resampler for FfmpegResampler {
    fn set_compensation(&mut self, sample_delta: i64, distance: usize) -> Result<()> {
        if distance == 0 && sample_delta != 0 {
            return Err(VideoError::Resampler("compensation over zero samples".into()).into());
        }
        let delta = c_int::try_from(sample_delta)
            .map_err(|_| VideoError::Resampler(format!("compensation of {sample_delta} samples")))?;
        let distance = c_int::try_from(distance)
            .map_err(|_| VideoError::Resampler(format!("compensation over {distance} samples")))?;

        // SAFETY: the context pointer is live and exclusively borrowed
        let ret = unsafe {
            ffmpeg_next::ffi::swr_set_compensation(self.context.as_mut_ptr(), delta, distance)
        };
        if ret < 0 {
            return Err(VideoError::Resampler(format!(
                "swr_set_compensation failed: {}",
                ffmpeg_next::Error::from(ret)
            ))
            .into());
        }
        Ok(())
    }

    fn convert(&mut self, frame: &AudioFrame, out_capacity: usize) -> Result<Bytes> {
        if frame.params != self.src {
            return Err(VideoError::Resampler(format!(
                "frame format {:?} does not match configured source {:?}",
                frame.params, self.src
            ))
            .into());
        }
        let input = self.input_frame(frame);

        // A preallocated output bounds the conversion; the rest stays queued
        // inside the context for the next call.
        let mut output = ffmpeg_next::frame::Audio::new(
            av_sample_format(self.tgt.format),
            out_capacity.max(1),
            av_channel_layout(self.tgt.channels),
        );
        output.set_rate(self.tgt.sample_rate);
        self.context
            .run(&input, &mut output)
            .map_err(|e| VideoError::Resampler(format!("swr_convert failed: {e}")))?;

        let len = output.samples() * self.tgt.frame_size();
        let data = output.data(0);
        Ok(Bytes::copy_from_slice(&data[..len.min(data.len())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_player::SampleFormat;

    fn packed_frame(params: AudioParams, nb_samples: usize, sample: impl Fn(usize) -> Vec<u8>) -> AudioFrame {
        let data: Vec<u8> = (0..nb_samples * usize::from(params.channels))
            .flat_map(sample)
            .collect();
        AudioFrame::packed(params, Bytes::from(data))
    }

    fn f32_samples(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect()
    }

    #[test]
    fn rate_and_format_are_converted_across_frames() {
        super::super::init_ffmpeg().expect("ffmpeg init");
        let src = AudioParams::new(44_100, 2, SampleFormat::S16);
        let tgt = AudioParams::new(48_000, 2, SampleFormat::F32);
        let mut resampler = FfmpegResampler::new(src, tgt).expect("supported pair");

        let mut total = 0;
        for _ in 0..4 {
            let frame = packed_frame(src, 1024, |_| 8_192i16.to_ne_bytes().to_vec());
            let out = resampler.convert(&frame, 2048).expect("convert");
            assert_eq!(out.len() % tgt.frame_size(), 0);
            assert!(f32_samples(&out).iter().all(|s| s.is_finite() && s.abs() <= 1.0));
            total += out.len() / tgt.frame_size();
        }
        // 4 × 1024 × 48000 / 44100 ≈ 4458, minus the filter delay.
        assert!(total > 4_300, "converted {total} samples");
        assert!(total <= 4_459);
    }

    #[test]
    fn planar_input_is_interleaved() {
        super::super::init_ffmpeg().expect("ffmpeg init");
        let src = AudioParams::new(48_000, 2, SampleFormat::F32Planar);
        let tgt = AudioParams::new(48_000, 2, SampleFormat::F32);
        let mut resampler = FfmpegResampler::new(src, tgt).expect("supported pair");

        let plane = |value: f32| Bytes::from(value.to_ne_bytes().repeat(256));
        let frame = AudioFrame {
            pts: Some(0.0),
            pos: None,
            params: src,
            nb_samples: 256,
            planes: vec![plane(0.5), plane(-0.5)],
            serial: 0,
        };
        let out = f32_samples(&resampler.convert(&frame, 512).expect("convert"));
        assert_eq!(out.len(), 512);
        assert!(out.chunks_exact(2).all(|pair| pair == [0.5, -0.5]));
    }

    #[test]
    fn compensation_adds_samples() {
        super::super::init_ffmpeg().expect("ffmpeg init");
        let params = AudioParams::new(48_000, 2, SampleFormat::F32);
        let run = |compensate: bool| {
            let mut resampler = FfmpegResampler::new(params, params).expect("supported pair");
            if compensate {
                resampler.set_compensation(100, 1000).expect("compensation");
            }
            (0..4)
                .map(|_| {
                    let frame = packed_frame(params, 1000, |_| 0.25f32.to_ne_bytes().to_vec());
                    resampler.convert(&frame, 2048).expect("convert").len() / params.frame_size()
                })
                .sum::<usize>()
        };
        let plain = run(false);
        let stretched = run(true);
        assert_eq!(plain, 4000);
        assert!(stretched > plain + 50, "{stretched} vs {plain}");
    }

    #[test]
    fn zero_distance_compensation_is_rejected() {
        super::super::init_ffmpeg().expect("ffmpeg init");
        let params = AudioParams::new(48_000, 2, SampleFormat::F32);
        let mut resampler = FfmpegResampler::new(params, params).expect("supported pair");
        assert!(resampler.set_compensation(10, 0).is_err());
    }

    #[test]
    fn frames_in_another_format_are_rejected() {
        super::super::init_ffmpeg().expect("ffmpeg init");
        let src = AudioParams::new(44_100, 2, SampleFormat::S16);
        let tgt = AudioParams::new(48_000, 2, SampleFormat::F32);
        let mut resampler = FfmpegResampler::new(src, tgt).expect("supported pair");
        let frame = packed_frame(tgt, 16, |_| 0f32.to_ne_bytes().to_vec());
        assert!(resampler.convert(&frame, 64).is_err());
    }
}
