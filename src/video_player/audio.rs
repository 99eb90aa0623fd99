// SPDX-License-Identifier: MPL-2.0
//! Sample conversion and gain for the audio output path.
//!
//! The engine hands decoded [`AudioFrame`]s to a [`Resampler`] whenever their
//! format differs from what the device negotiated, or when drift correction
//! asks for more or fewer samples than the frame holds. Backends supply their
//! own converter through [`MediaBackend::resampler`]; [`LinearResampler`] is
//! the fallback for backends without one. It converts each frame on its own,
//! with no filter history carried across frame boundaries.
//!
//! [`MediaBackend::resampler`]: super::MediaBackend::resampler

use bytes::Bytes;

use crate::error::{Result, VideoError};

use super::frame::{AudioFrame, AudioParams, SampleFormat};
use super::volume::Volume;

/// Converts decoded frames to the device's sample format.
pub trait Resampler: Send {
    /// Stretches the next converted frame by `sample_delta` output samples,
    /// spread over `distance` samples.
    fn set_compensation(&mut self, sample_delta: i64, distance: usize) -> Result<()>;

    /// Converts `frame` to packed target samples.
    ///
    /// At most `out_capacity` samples per channel are produced.
    fn convert(&mut self, frame: &AudioFrame, out_capacity: usize) -> Result<Bytes>;
}

/// Linear-interpolating converter between any two [`AudioParams`].
///
/// Channels are mapped by duplicating mono, averaging down to mono, or
/// wrapping around for other counts.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    src: AudioParams,
    tgt: AudioParams,
    pending_delta: i64,
}

impl LinearResampler {
    /// Fails when either side has no channels or no sample rate.
    pub fn new(src: AudioParams, tgt: AudioParams) -> Result<Self> {
        for (side, params) in [("source", &src), ("target", &tgt)] {
            if params.channels == 0 || params.sample_rate == 0 {
                return Err(VideoError::Resampler(format!(
                    "{side} format has {} channels at {} Hz",
                    params.channels, params.sample_rate
                ))
                .into());
            }
        }
        Ok(Self {
            src,
            tgt,
            pending_delta: 0,
        })
    }

    #[must_use]
    pub fn source(&self) -> &AudioParams {
        &self.src
    }

    #[must_use]
    pub fn target(&self) -> &AudioParams {
        &self.tgt
    }

    /// Samples per channel for `nb_samples` input samples, before compensation.
    #[must_use]
    pub fn nominal_output(&self, nb_samples: usize) -> usize {
        rescale(nb_samples, self.tgt.sample_rate, self.src.sample_rate)
    }

    fn decode_interleaved(&self, frame: &AudioFrame) -> Result<Vec<f32>> {
        let channels = usize::from(self.src.channels);
        let format = self.src.format;
        let width = format.bytes_per_sample();
        let nb = frame.nb_samples;
        let mut samples = Vec::with_capacity(nb * channels);

        if format.is_planar() {
            if frame.planes.len() < channels
                || frame.planes.iter().any(|plane| plane.len() < nb * width)
            {
                return Err(VideoError::Resampler("truncated planar frame".into()).into());
            }
            for index in 0..nb {
                for plane in frame.planes.iter().take(channels) {
                    let offset = index * width;
                    samples.push(read_sample(format, &plane[offset..offset + width]));
                }
            }
        } else {
            let data = frame
                .planes
                .first()
                .filter(|plane| plane.len() >= nb * channels * width)
                .ok_or_else(|| VideoError::Resampler("truncated packed frame".into()))?;
            samples.extend(
                data[..nb * channels * width]
                    .chunks_exact(width)
                    .map(|bytes| read_sample(format, bytes)),
            );
        }
        Ok(samples)
    }

    fn map_channels(&self, input: &[f32]) -> Vec<f32> {
        let src_ch = usize::from(self.src.channels);
        let tgt_ch = usize::from(self.tgt.channels);
        if src_ch == tgt_ch {
            return input.to_vec();
        }
        let mut out = Vec::with_capacity(input.len() / src_ch * tgt_ch);
        for frame in input.chunks_exact(src_ch) {
            if tgt_ch == 1 {
                #[allow(clippy::cast_precision_loss)]
                let mean = frame.iter().sum::<f32>() / src_ch as f32;
                out.push(mean);
            } else {
                out.extend((0..tgt_ch).map(|channel| frame[channel % src_ch]));
            }
        }
        out
    }
}

impl Resampler for LinearResampler {
    fn set_compensation(&mut self, sample_delta: i64, distance: usize) -> Result<()> {
        if distance == 0 && sample_delta != 0 {
            return Err(VideoError::Resampler("compensation over zero samples".into()).into());
        }
        self.pending_delta = sample_delta;
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
        let delta = std::mem::take(&mut self.pending_delta);
        let nominal = i64::try_from(self.nominal_output(frame.nb_samples)).unwrap_or(i64::MAX);
        let wanted = usize::try_from(nominal.saturating_add(delta).max(0)).unwrap_or(0);
        let out_len = wanted.min(out_capacity);

        if self.src == self.tgt && out_len == frame.nb_samples {
            if let Some(data) = frame.packed_data() {
                return Ok(data.slice(..out_len * self.tgt.frame_size()));
            }
        }

        let input = self.map_channels(&self.decode_interleaved(frame)?);
        let channels = usize::from(self.tgt.channels);
        let in_len = frame.nb_samples;
        let format = self.tgt.format.packed();
        let mut out = Vec::with_capacity(out_len * channels * format.bytes_per_sample());

        if in_len == 0 {
            return Ok(Bytes::new());
        }
        #[allow(clippy::cast_precision_loss)]
        let step = if out_len > 1 {
            (in_len - 1) as f64 / (out_len - 1) as f64
        } else {
            0.0
        };
        for index in 0..out_len {
            #[allow(clippy::cast_precision_loss)]
            let position = index as f64 * step;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let left = (position.floor() as usize).min(in_len - 1);
            let right = (left + 1).min(in_len - 1);
            #[allow(clippy::cast_possible_truncation)]
            let frac = (position - left as f64) as f32;
            for channel in 0..channels {
                let a = input[left * channels + channel];
                let b = input[right * channels + channel];
                write_sample(format, a + (b - a) * frac, &mut out);
            }
        }
        Ok(Bytes::from(out))
    }
}

/// `value * num / den` in integer arithmetic.
fn rescale(value: usize, num: u32, den: u32) -> usize {
    if den == 0 {
        return 0;
    }
    let scaled = value as u128 * u128::from(num) / u128::from(den);
    usize::try_from(scaled).unwrap_or(usize::MAX)
}

/// Output samples to request from a resampler for `wanted` input samples.
#[must_use]
pub fn resampler_out_capacity(wanted: usize, src_rate: u32, tgt_rate: u32, headroom: usize) -> usize {
    rescale(wanted, tgt_rate, src_rate) + headroom
}

fn read_sample(format: SampleFormat, bytes: &[u8]) -> f32 {
    match format.packed() {
        SampleFormat::U8 => (f32::from(bytes[0]) - 128.0) / 128.0,
        SampleFormat::S16 => f32::from(i16::from_ne_bytes([bytes[0], bytes[1]])) / 32_768.0,
        SampleFormat::S32 => {
            #[allow(clippy::cast_precision_loss)]
            let value = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32;
            value / 2_147_483_648.0
        }
        SampleFormat::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        _ => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            #[allow(clippy::cast_possible_truncation)]
            let value = f64::from_ne_bytes(raw) as f32;
            value
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn write_sample(format: SampleFormat, value: f32, out: &mut Vec<u8>) {
    let value = value.clamp(-1.0, 1.0);
    match format.packed() {
        SampleFormat::U8 => out.push((value * 127.0 + 128.0).round() as u8),
        SampleFormat::S16 => out.extend_from_slice(&((value * 32_767.0).round() as i16).to_ne_bytes()),
        SampleFormat::S32 => {
            let scaled = f64::from(value) * 2_147_483_647.0;
            out.extend_from_slice(&(scaled.round() as i32).to_ne_bytes());
        }
        SampleFormat::F32 => out.extend_from_slice(&value.to_ne_bytes()),
        _ => out.extend_from_slice(&f64::from(value).to_ne_bytes()),
    }
}

/// Byte that encodes silence in `format`.
#[must_use]
pub fn silence_byte(format: SampleFormat) -> u8 {
    if format.packed() == SampleFormat::U8 {
        0x80
    } else {
        0
    }
}

/// Fills `dst` with silence.
pub fn fill_silence(dst: &mut [u8], format: SampleFormat) {
    dst.fill(silence_byte(format));
}

/// Writes `src` into `dst` at `volume`.
///
/// Full volume copies samples verbatim and a muted volume writes silence.
/// Both slices must have the same length and hold packed samples of `format`.
pub fn mix_samples(dst: &mut [u8], src: &[u8], format: SampleFormat, volume: Volume) {
    let len = dst.len().min(src.len());
    let (dst, src) = (&mut dst[..len], &src[..len]);
    if volume.is_full() {
        dst.copy_from_slice(src);
        return;
    }
    if volume.is_muted() {
        fill_silence(dst, format);
        return;
    }
    let gain = volume.value();
    let width = format.bytes_per_sample();
    let mut scaled = Vec::with_capacity(width);
    for (out, sample) in dst.chunks_exact_mut(width).zip(src.chunks_exact(width)) {
        scaled.clear();
        write_sample(format, read_sample(format, sample) * gain, &mut scaled);
        out.copy_from_slice(&scaled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;

    fn s16_stereo(rate: u32) -> AudioParams {
        AudioParams::new(rate, 2, SampleFormat::S16)
    }

    fn s16_bytes(samples: &[i16]) -> Bytes {
        Bytes::from(samples.iter().flat_map(|s| s.to_ne_bytes()).collect::<Vec<u8>>())
    }

    fn to_i16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn identical_formats_preserve_samples() {
        let params = s16_stereo(48_000);
        let mut resampler = LinearResampler::new(params, params).unwrap();
        let samples = [0i16, 100, -100, 2000, 16_000, -16_000];
        let frame = AudioFrame::packed(params, s16_bytes(&samples));

        let out = resampler.convert(&frame, 1024).unwrap();
        assert_eq!(to_i16(&out), samples);
    }

    #[test]
    fn rate_change_scales_sample_count() {
        let src = s16_stereo(24_000);
        let tgt = s16_stereo(48_000);
        let mut resampler = LinearResampler::new(src, tgt).unwrap();
        let frame = AudioFrame::packed(src, s16_bytes(&[0i16; 200]));

        let out = resampler.convert(&frame, 4096).unwrap();
        assert_eq!(out.len() / tgt.frame_size(), 200);
    }

    #[test]
    fn compensation_applies_to_next_frame_only() {
        let params = s16_stereo(1000);
        let mut resampler = LinearResampler::new(params, params).unwrap();
        let frame = AudioFrame::packed(params, s16_bytes(&[0i16; 200]));

        resampler.set_compensation(10, 100).unwrap();
        assert_eq!(resampler.convert(&frame, 4096).unwrap().len() / 4, 110);
        assert_eq!(resampler.convert(&frame, 4096).unwrap().len() / 4, 100);
    }

    #[test]
    fn output_is_limited_by_capacity() {
        let params = s16_stereo(1000);
        let mut resampler = LinearResampler::new(params, params).unwrap();
        let frame = AudioFrame::packed(params, s16_bytes(&[0i16; 200]));
        assert_eq!(resampler.convert(&frame, 40).unwrap().len() / 4, 40);
    }

    #[test]
    fn planar_float_mono_to_packed_s16_stereo() {
        let src = AudioParams::new(8000, 1, SampleFormat::F32Planar);
        let tgt = s16_stereo(8000);
        let mut resampler = LinearResampler::new(src, tgt).unwrap();
        let plane: Vec<u8> = [0.5f32, -0.5]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        let frame = AudioFrame {
            pts: None,
            pos: None,
            params: src,
            nb_samples: 2,
            planes: vec![Bytes::from(plane)],
            serial: 0,
        };

        let out = to_i16(&resampler.convert(&frame, 16).unwrap());
        assert_eq!(out, vec![16_384, 16_384, -16_384, -16_384]);
    }

    #[test]
    fn mismatched_frame_format_is_an_error() {
        let mut resampler = LinearResampler::new(s16_stereo(48_000), s16_stereo(48_000)).unwrap();
        let frame = AudioFrame::packed(s16_stereo(44_100), s16_bytes(&[0; 4]));
        assert!(resampler.convert(&frame, 16).is_err());
    }

    #[test]
    fn zero_channel_format_is_rejected() {
        let broken = AudioParams::new(48_000, 0, SampleFormat::S16);
        assert!(LinearResampler::new(broken, s16_stereo(48_000)).is_err());
    }

    #[test]
    fn out_capacity_includes_headroom() {
        assert_eq!(resampler_out_capacity(1024, 44_100, 48_000, 256), 1114 + 256);
    }

    #[test]
    fn mixing_at_full_volume_copies() {
        let src = s16_bytes(&[1000, -1000]);
        let mut dst = [0u8; 4];
        mix_samples(&mut dst, &src, SampleFormat::S16, Volume::default());
        assert_eq!(&dst[..], &src[..]);
    }

    #[test]
    fn mixing_scales_samples() {
        let src = s16_bytes(&[16_384, -16_384]);
        let mut dst = [0u8; 4];
        mix_samples(&mut dst, &src, SampleFormat::S16, Volume::new(0.5));
        let out = to_i16(&dst);
        assert!((i32::from(out[0]) - 8192).abs() <= 1);
        assert!((i32::from(out[1]) + 8192).abs() <= 1);
    }

    #[test]
    fn mixing_muted_writes_silence() {
        let src = [200u8, 10, 77];
        let mut dst = [1u8; 3];
        mix_samples(&mut dst, &src, SampleFormat::U8, Volume::muted());
        assert_eq!(dst, [0x80; 3]);
    }

    #[test]
    fn float_samples_round_trip_through_gain() {
        let src: Vec<u8> = 0.8f32.to_ne_bytes().to_vec();
        let mut dst = [0u8; 4];
        mix_samples(&mut dst, &src, SampleFormat::F32, Volume::new(0.25));
        assert_abs_diff_eq!(f32::from_ne_bytes(dst), 0.2, epsilon = 1e-6);
    }
}
