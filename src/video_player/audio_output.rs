// SPDX-License-Identifier: MPL-2.0
//! Audio device driver using cpal.
//!
//! [`CpalAudioOutput`] opens the default output device before the engine
//! starts, so owners can answer
//! [`EngineHandler::on_audio_format_negotiated`](super::handler::EngineHandler::on_audio_format_negotiated)
//! with [`CpalAudioOutput::negotiated`]. Once an engine is attached, every
//! device callback pulls packed `f32` samples through
//! [`Engine::update_audio_buffer`] and converts them to the device's sample
//! type.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Mutex, RwLock};

use crate::config::AUDIO_MIN_BUFFER_SIZE;
use crate::error::{Error, Result};

use super::engine::Engine;
use super::frame::{AudioParams, SampleFormat};
use super::volume::Volume;

/// Upper bound on device callbacks per second used to size the buffer.
const AUDIO_MAX_CALLBACKS_PER_SEC: u32 = 30;

/// State shared with the device callback.
struct SharedState {
    /// Volume stored as `f32` bits for lock-free access.
    volume_bits: AtomicU32,
    engine: RwLock<Option<Engine>>,
    /// Byte buffer reused across callbacks.
    scratch: Mutex<Vec<u8>>,
}

impl SharedState {
    fn new(volume: Volume) -> Self {
        Self {
            volume_bits: AtomicU32::new(volume.value().to_bits()),
            engine: RwLock::new(None),
            scratch: Mutex::new(Vec::new()),
        }
    }

    fn volume(&self) -> Volume {
        Volume::new(f32::from_bits(self.volume_bits.load(Ordering::Relaxed)))
    }

    fn set_volume(&self, volume: Volume) {
        self.volume_bits.store(volume.value().to_bits(), Ordering::Relaxed);
    }

    /// Fills `data` from the attached engine, or with silence.
    fn render<T: cpal::SizedSample + cpal::FromSample<f32>>(&self, data: &mut [T]) {
        let engine = self.engine.read();
        let Some(engine) = engine.as_ref() else {
            data.fill(T::from_sample(0.0f32));
            return;
        };
        let mut scratch = self.scratch.lock();
        scratch.resize(data.len() * std::mem::size_of::<f32>(), 0);
        engine.update_audio_buffer(&mut scratch, self.volume());
        write_samples(data, &scratch);
    }
}

/// Converts packed native-endian `f32` bytes to device samples.
fn write_samples<T: cpal::SizedSample + cpal::FromSample<f32>>(dst: &mut [T], src: &[u8]) {
    for (sample, bytes) in dst.iter_mut().zip(src.chunks_exact(4)) {
        let value = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        // i16 conversion overflows at exactly 1.0.
        *sample = T::from_sample(value.clamp(-1.0, 0.999_999_9));
    }
}

/// Samples per channel per callback for a device running at `sample_rate`.
fn callback_samples(sample_rate: u32) -> usize {
    let per_callback = (sample_rate / AUDIO_MAX_CALLBACKS_PER_SEC).max(1);
    let floor_pow2 = 1usize << (u32::BITS - 1 - per_callback.leading_zeros());
    (floor_pow2 * 2).max(AUDIO_MIN_BUFFER_SIZE)
}

/// Playback through the system's default output device.
pub struct CpalAudioOutput {
    shared: Arc<SharedState>,
    params: AudioParams,
    buffer_size: usize,
    /// Kept alive to keep the device running.
    stream: cpal::Stream,
}

impl std::fmt::Debug for CpalAudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalAudioOutput")
            .field("params", &self.params)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

impl CpalAudioOutput {
    /// Opens the default output device and starts it outputting silence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if no device is found, its configuration cannot
    /// be read, its sample type is unsupported or the stream fails to start.
    pub fn open(volume: Volume) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Io("No audio output device found".to_string()))?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::Io(format!("Failed to get audio config: {e}")))?;

        let sample_rate = supported_config.sample_rate();
        let channels = supported_config.channels();
        let params = AudioParams::new(sample_rate, channels, SampleFormat::F32);
        let buffer_size = callback_samples(sample_rate) * params.frame_size();

        let shared = Arc::new(SharedState::new(volume));
        let config: cpal::StreamConfig = supported_config.config();
        let stream = match supported_config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, Arc::clone(&shared))?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, Arc::clone(&shared))?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, Arc::clone(&shared))?,
            other => return Err(Error::Io(format!("Unsupported audio sample format: {other:?}"))),
        };

        stream
            .play()
            .map_err(|e| Error::Io(format!("Failed to start audio stream: {e}")))?;
        tracing::info!(sample_rate, channels, buffer_size, "audio device opened");

        Ok(Self {
            shared,
            params,
            buffer_size,
            stream,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        shared: Arc<SharedState>,
    ) -> Result<cpal::Stream> {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| shared.render(data),
                |err| tracing::error!(%err, "audio output error"),
                None,
            )
            .map_err(|e| Error::Io(format!("Failed to build audio stream: {e}")))
    }

    /// Device format and buffer size in bytes, as returned from
    /// `on_audio_format_negotiated`.
    #[must_use]
    pub fn negotiated(&self) -> (AudioParams, usize) {
        (self.params, self.buffer_size)
    }

    #[must_use]
    pub fn params(&self) -> AudioParams {
        self.params
    }

    /// Starts feeding the device from `engine`.
    pub fn attach(&self, engine: Engine) {
        *self.shared.engine.write() = Some(engine);
    }

    /// Stops pulling from the engine; the device outputs silence.
    pub fn detach(&self) {
        self.shared.engine.write().take();
    }

    pub fn set_volume(&self, volume: Volume) {
        self.shared.set_volume(volume);
    }

    #[must_use]
    pub fn volume(&self) -> Volume {
        self.shared.volume()
    }

    /// Suspends the device stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the device refuses.
    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| Error::Io(format!("Failed to pause audio stream: {e}")))
    }

    /// Resumes a suspended device stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the device refuses.
    pub fn resume(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| Error::Io(format!("Failed to resume audio stream: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn shared_state_volume_round_trips_through_bits() {
        let state = SharedState::new(Volume::new(0.8));
        assert!((state.volume().value() - 0.8).abs() < 0.001);
        state.set_volume(Volume::muted());
        assert!(state.volume().is_muted());
    }

    #[test]
    fn detached_state_renders_silence() {
        let state = SharedState::new(Volume::default());
        let mut data = [0.5f32; 8];
        state.render(&mut data);
        assert!(data.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn samples_convert_to_device_types() {
        let bytes = f32_bytes(&[0.0, 0.5, -1.0, 1.0]);

        let mut floats = [9.0f32; 4];
        write_samples(&mut floats, &bytes);
        assert_eq!(floats[0], 0.0);
        assert_eq!(floats[1], 0.5);
        assert_eq!(floats[2], -1.0);
        assert!(floats[3] < 1.0 && floats[3] > 0.999);

        let mut ints = [1i16; 4];
        write_samples(&mut ints, &bytes);
        assert_eq!(ints[0], 0);
        assert_eq!(ints[2], i16::MIN);
        assert!(ints[3] > 32_000);
    }

    #[test]
    fn callback_size_follows_sample_rate() {
        assert_eq!(callback_samples(48_000), 2048);
        assert_eq!(callback_samples(44_100), 2048);
        assert_eq!(callback_samples(8_000), AUDIO_MIN_BUFFER_SIZE);
    }

    #[tokio::test]
    #[ignore = "requires audio hardware"]
    async fn default_device_negotiates_packed_float() {
        if let Ok(output) = CpalAudioOutput::open(Volume::new(0.8)) {
            let (params, buffer_size) = output.negotiated();
            assert_eq!(params.format, SampleFormat::F32);
            assert!(params.sample_rate > 0);
            assert!(buffer_size > 0);
        }
    }
}
