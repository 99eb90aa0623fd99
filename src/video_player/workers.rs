// SPDX-License-Identifier: MPL-2.0
//! Opening and closing stream components, and the decode threads they run.

use std::sync::Arc;
use std::thread;

use crate::error::{Error, Result, VideoError};

use super::decoder::{AudioDecoder, AudioTimestamps, DecodeOutcome, Decoder, VideoDecoder, VideoTimestamps};
use super::engine::{AudioPath, Pipeline, Shared};
use super::filter::FilterStage;
use super::frame::{AudioFrame, AudioParams, PixelFormat, VideoFrame};
use super::frame_queue::FrameQueue;
use super::packet::{MediaType, StreamInfo};
use super::sync::{frame_drop_enabled, should_drop_early};

impl Shared {
    /// Binds `stream` to its slot and starts its decode thread.
    pub(crate) fn open_component(self: &Arc<Self>, stream: &StreamInfo) -> Result<()> {
        match stream.media_type {
            MediaType::Video => self.open_video(stream),
            MediaType::Audio => self.open_audio(stream),
            MediaType::Other => Err(VideoError::Other(format!(
                "stream {} is neither audio nor video",
                stream.index
            ))
            .into()),
        }
    }

    fn open_video(self: &Arc<Self>, stream: &StreamInfo) -> Result<()> {
        let primitive = self
            .backend
            .video_decoder(stream, self.options.video_codec_name.as_deref())?;
        #[cfg(feature = "filter-graph")]
        let filter = FilterStage::new(self.backend.video_filter(stream)?);
        #[cfg(not(feature = "filter-graph"))]
        let filter = FilterStage::passthrough();

        self.video.open(stream.clone());
        // A reopened clock starts running; follow the engine's pause state.
        self.video.set_paused(self.is_paused());
        let frames = Arc::new(FrameQueue::new(self.options.video_queue_capacity));
        let decoder = Decoder::new(primitive, Arc::clone(self.video.queue()), VideoTimestamps::default());
        decoder.start();
        let finished = decoder.finished_flag();

        let shared = Arc::clone(self);
        let worker_frames = Arc::clone(&frames);
        let spawned = thread::Builder::new()
            .name("avsync-video".to_string())
            .spawn(move || shared.video_worker(decoder, filter, &worker_frames));
        let worker = match spawned {
            Ok(worker) => worker,
            Err(err) => {
                self.video.close();
                return Err(Error::Io(format!("failed to spawn video decode thread: {err}")));
            }
        };

        *self.video_pipe.lock() = Some(Pipeline {
            frames,
            finished,
            worker: Some(worker),
        });
        tracing::info!(stream = stream.index, codec = ?stream.codec.codec, "video stream opened");
        Ok(())
    }

    fn open_audio(self: &Arc<Self>, stream: &StreamInfo) -> Result<()> {
        let primitive = self
            .backend
            .audio_decoder(stream, self.options.audio_codec_name.as_deref())?;
        #[cfg(feature = "filter-graph")]
        let filter = FilterStage::new(self.backend.audio_filter(stream)?);
        #[cfg(not(feature = "filter-graph"))]
        let filter = FilterStage::passthrough();

        let codec = &stream.codec;
        let desired = AudioParams {
            sample_rate: codec.sample_rate,
            channels: codec.channels,
            channel_layout: codec.channel_layout,
            format: codec.sample_format.packed(),
        };
        let (mut tgt, hw_buf_size) = self.handler.on_audio_format_negotiated(&desired)?;
        tgt.format = tgt.format.packed();
        if tgt.bytes_per_sec() == 0 {
            return Err(VideoError::AudioDevice(format!(
                "device accepted an empty format: {} Hz, {} channels",
                tgt.sample_rate, tgt.channels
            ))
            .into());
        }
        *self.audio_path.lock() = AudioPath::negotiated(tgt, hw_buf_size);

        self.audio.open(stream.clone());
        self.audio.set_paused(self.is_paused());
        let start_pts = self
            .source_info
            .read()
            .as_ref()
            .filter(|info| info.byte_seek_only)
            .and_then(|_| stream.start_time);
        let frames = Arc::new(FrameQueue::new(self.options.audio_queue_capacity));
        let decoder = Decoder::new(primitive, Arc::clone(self.audio.queue()), AudioTimestamps::new(start_pts));
        decoder.start();
        let finished = decoder.finished_flag();

        let shared = Arc::clone(self);
        let worker_frames = Arc::clone(&frames);
        let spawned = thread::Builder::new()
            .name("avsync-audio".to_string())
            .spawn(move || shared.audio_worker(decoder, filter, &worker_frames));
        let worker = match spawned {
            Ok(worker) => worker,
            Err(err) => {
                self.audio.close();
                *self.audio_path.lock() = AudioPath::default();
                return Err(Error::Io(format!("failed to spawn audio decode thread: {err}")));
            }
        };

        *self.audio_pipe.lock() = Some(Pipeline {
            frames,
            finished,
            worker: Some(worker),
        });
        tracing::info!(
            stream = stream.index,
            codec = ?stream.codec.codec,
            sample_rate = tgt.sample_rate,
            channels = tgt.channels,
            hw_buf_size,
            "audio stream opened"
        );
        Ok(())
    }

    /// Detaches the `media_type` slot and joins its decode thread.
    pub(crate) fn close_component(&self, media_type: MediaType) {
        match media_type {
            MediaType::Video => {
                self.video.close();
                let pipe = self.video_pipe.lock().take();
                stop_pipeline(pipe, "video");
            }
            MediaType::Audio => {
                self.audio.close();
                let pipe = self.audio_pipe.lock().take();
                stop_pipeline(pipe, "audio");
                *self.audio_path.lock() = AudioPath::default();
            }
            MediaType::Other => {}
        }
    }

    fn video_worker(
        &self,
        mut decoder: VideoDecoder,
        mut filter: FilterStage<VideoFrame>,
        frames: &FrameQueue<VideoFrame>,
    ) {
        let mut geometry: Option<(u32, u32, PixelFormat)> = None;
        loop {
            let frame = match decoder.decode_frame() {
                DecodeOutcome::Frame(frame) => frame,
                DecodeOutcome::NoFrame => continue,
                DecodeOutcome::Aborted => break,
            };

            if self.is_early(&frame, filter.last_delay()) {
                tracing::trace!(pts = ?frame.pts, "early frame dropped");
                self.stats.lock().frame_drops_early += 1;
                continue;
            }

            let filtered = match filter.process(frame) {
                Ok(filtered) => filtered,
                Err(err) => {
                    tracing::warn!(%err, "video filter failed");
                    continue;
                }
            };
            for frame in filtered {
                let current = (frame.width, frame.height, frame.format);
                if geometry != Some(current) {
                    geometry = Some(current);
                    self.handler.on_frame_geometry_changed(
                        frame.width,
                        frame.height,
                        frame.format,
                        frame.sample_aspect_ratio,
                    );
                }
                if !frames.push_frame(frame) {
                    tracing::debug!("video frame queue stopped");
                    return;
                }
            }
        }
        tracing::debug!("video decode thread exiting");
    }

    /// Whether a decoded frame is already behind the master clock.
    fn is_early(&self, frame: &VideoFrame, filter_delay: f64) -> bool {
        let Some(pts) = frame.pts else {
            return false;
        };
        if !frame_drop_enabled(self.options.frame_drop, self.resolved().master)
            || frame.serial != self.video.serial()
        {
            return false;
        }
        let diff = self.master_clock().map(|master| pts - master);
        should_drop_early(diff, filter_delay, self.video.queue().nb_packets() > 0)
    }

    fn audio_worker(
        &self,
        mut decoder: AudioDecoder,
        mut filter: FilterStage<AudioFrame>,
        frames: &FrameQueue<AudioFrame>,
    ) {
        loop {
            let frame = match decoder.decode_frame() {
                DecodeOutcome::Frame(frame) => frame,
                DecodeOutcome::NoFrame => continue,
                DecodeOutcome::Aborted => break,
            };
            let filtered = match filter.process(frame) {
                Ok(filtered) => filtered,
                Err(err) => {
                    tracing::warn!(%err, "audio filter failed");
                    continue;
                }
            };
            for frame in filtered {
                if !frames.push_frame(frame) {
                    tracing::debug!("audio frame queue stopped");
                    return;
                }
            }
        }
        tracing::debug!("audio decode thread exiting");
    }
}

fn stop_pipeline<F>(pipe: Option<Pipeline<F>>, media: &str) {
    let Some(mut pipe) = pipe else {
        return;
    };
    pipe.frames.stop();
    if let Some(worker) = pipe.worker.take() {
        if worker.join().is_err() {
            tracing::error!(media, "decode thread panicked");
        }
    }
}
