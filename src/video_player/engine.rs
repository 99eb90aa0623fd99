// SPDX-License-Identifier: MPL-2.0
//! The synchronization engine.
//!
//! An [`Engine`] owns one audio and one video [`Stream`] slot, a read thread
//! that demuxes the source into their packet queues, and one decode thread
//! per opened stream that fills the frame queues. Presentation happens on
//! the owner's threads:
//!
//! - the video refresh loop calls [`Engine::try_to_get_video_frame`] at a
//!   fixed interval and displays whatever it returns
//! - the audio device callback calls [`Engine::update_audio_buffer`] with the
//!   buffer it must fill
//!
//! Both call-ins are non-blocking. The slave stream is corrected toward the
//! master clock: video by repeating or dropping frames, audio by asking the
//! resampler for slightly more or fewer samples.
//!
//! # Lock order
//!
//! `playback` is taken before frame queues, stream clocks and `stats`.
//! `audio_path` is only taken by the audio callback and stream opening.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::{
    EngineOptions, InfiniteBuffer, SeekByBytes, SyncMaster, AUDIO_MIN_BUFFER_SIZE,
    AV_SYNC_THRESHOLD_MAX, BYTE_SEEK_FALLBACK_RATE, CHUNK_SEEK_INCREMENT_SECS,
    MAX_FRAME_DURATION_CONTINUOUS, MAX_FRAME_DURATION_DISCONTINUOUS, RESAMPLER_HEADROOM_SAMPLES,
};
use crate::error::{Error, Result, VideoError};

use super::audio::{fill_silence, mix_samples, resampler_out_capacity, Resampler};
use super::frame::{AudioFrame, AudioParams, VideoFrame};
use super::frame_queue::FrameQueue;
use super::handler::{EngineHandler, QuitReason};
use super::packet::MediaType;
use super::seek::{SeekController, SeekRequest};
use super::source::{InterruptFlag, MediaBackend, SourceInfo};
use super::stats::{ActiveStreams, Stats};
use super::stream::Stream;
use super::sync::{compute_target_delay, frame_drop_enabled, frame_duration_between, AudioDiffFilter};
use super::time_units::{now_secs, Rational};
use super::volume::Volume;

/// Settings derived from the options once the source is probed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Resolved {
    pub(crate) master: SyncMaster,
    pub(crate) seek_by_bytes: bool,
    pub(crate) infinite_buffer: bool,
    pub(crate) max_frame_duration: f64,
}

impl Resolved {
    /// Values used before the source is known.
    pub(crate) fn from_options(options: &EngineOptions) -> Self {
        Self {
            master: options.av_sync_type,
            seek_by_bytes: options.seek_by_bytes == SeekByBytes::On,
            infinite_buffer: options.infinite_buffer == InfiniteBuffer::On,
            max_frame_duration: MAX_FRAME_DURATION_CONTINUOUS,
        }
    }

    /// Applies the `Auto` policies to a probed source.
    pub(crate) fn for_source(options: &EngineOptions, info: &SourceInfo) -> Self {
        let seek_by_bytes = match options.seek_by_bytes {
            SeekByBytes::On => true,
            SeekByBytes::Off => false,
            SeekByBytes::Auto => info.timestamp_discontinuities && info.format_name != "ogg",
        };
        let infinite_buffer = match options.infinite_buffer {
            InfiniteBuffer::On => true,
            InfiniteBuffer::Off => false,
            InfiniteBuffer::Auto => info.realtime,
        };
        let max_frame_duration = if info.timestamp_discontinuities {
            MAX_FRAME_DURATION_DISCONTINUOUS
        } else {
            MAX_FRAME_DURATION_CONTINUOUS
        };
        Self {
            master: options.av_sync_type,
            seek_by_bytes,
            infinite_buffer,
            max_frame_duration,
        }
    }

    /// Falls back to whichever stream actually opened.
    pub(crate) fn with_opened(mut self, audio: bool, video: bool) -> Self {
        self.master = match (self.master, audio, video) {
            (SyncMaster::Video, true, false) => SyncMaster::Audio,
            (SyncMaster::Audio, false, true) => SyncMaster::Video,
            (master, _, _) => master,
        };
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct PlaybackState {
    pub(crate) paused: bool,
    /// Re-pause after the next displayed frame.
    pub(crate) step: bool,
    pub(crate) force_refresh: bool,
    /// Wall time at which the last shown frame became due.
    pub(crate) frame_timer: Option<f64>,
    /// Whether the source honored the last pause request.
    pub(crate) read_pause_supported: bool,
}

/// Decode thread output of one opened stream.
pub(crate) struct Pipeline<F> {
    pub(crate) frames: Arc<FrameQueue<F>>,
    pub(crate) finished: Arc<AtomicBool>,
    pub(crate) worker: Option<JoinHandle<()>>,
}

impl<F> Pipeline<F> {
    /// Whether the decoder hit end of stream and every frame was consumed.
    pub(crate) fn is_drained(&self) -> bool {
        self.finished.load(Ordering::Acquire) && self.frames.is_empty()
    }
}

/// State of the audio callback between invocations.
pub(crate) struct AudioPath {
    /// Device format; `None` until an audio stream is opened.
    pub(crate) tgt: Option<AudioParams>,
    /// Format the current resampler was built for.
    pub(crate) src: Option<AudioParams>,
    pub(crate) hw_buf_size: usize,
    /// Converted samples being played; `None` while outputting silence.
    buf: Option<Bytes>,
    buf_size: usize,
    buf_index: usize,
    /// Pts at the end of the last converted frame.
    clock: Option<f64>,
    clock_serial: u64,
    pub(crate) diff: AudioDiffFilter,
    resampler: Option<Box<dyn Resampler>>,
    /// A resampler could not be built; the path stays silent.
    failed: bool,
}

impl Default for AudioPath {
    fn default() -> Self {
        Self {
            tgt: None,
            src: None,
            hw_buf_size: 0,
            buf: None,
            buf_size: 0,
            buf_index: 0,
            clock: None,
            clock_serial: 0,
            diff: AudioDiffFilter::new(0.0),
            resampler: None,
            failed: false,
        }
    }
}

impl AudioPath {
    /// Fresh state for a device that accepted `tgt` with `hw_buf_size` bytes
    /// of buffering.
    pub(crate) fn negotiated(tgt: AudioParams, hw_buf_size: usize) -> Self {
        let threshold = tgt.bytes_to_secs(hw_buf_size);
        Self {
            tgt: Some(tgt),
            src: Some(tgt),
            hw_buf_size,
            diff: AudioDiffFilter::new(threshold),
            ..Self::default()
        }
    }

    fn silence_chunk(tgt: &AudioParams) -> usize {
        let frame_size = tgt.frame_size().max(1);
        (AUDIO_MIN_BUFFER_SIZE / frame_size).max(1) * frame_size
    }
}

pub(crate) struct Shared {
    pub(crate) uri: String,
    pub(crate) options: EngineOptions,
    pub(crate) resolved: RwLock<Resolved>,
    pub(crate) backend: Arc<dyn MediaBackend>,
    pub(crate) handler: Arc<dyn EngineHandler>,
    pub(crate) audio: Stream,
    pub(crate) video: Stream,
    pub(crate) seek: SeekController,
    pub(crate) interrupt: InterruptFlag,
    aborted: AtomicBool,
    quit_sent: AtomicBool,
    /// Set once the read thread finished opening streams.
    pub(crate) components_ready: AtomicBool,
    pub(crate) source_info: RwLock<Option<SourceInfo>>,
    pub(crate) last_read_pos: Mutex<Option<u64>>,
    pub(crate) playback: Mutex<PlaybackState>,
    pub(crate) video_pipe: Mutex<Option<Pipeline<VideoFrame>>>,
    pub(crate) audio_pipe: Mutex<Option<Pipeline<AudioFrame>>>,
    pub(crate) audio_path: Mutex<AudioPath>,
    pub(crate) stats: Mutex<Stats>,
    pub(crate) pending_cycles: Mutex<Vec<MediaType>>,
    read_thread: Mutex<Option<JoinHandle<QuitReason>>>,
}

impl Shared {
    pub(crate) fn stream(&self, media_type: MediaType) -> Option<&Stream> {
        match media_type {
            MediaType::Audio => Some(&self.audio),
            MediaType::Video => Some(&self.video),
            MediaType::Other => None,
        }
    }

    pub(crate) fn resolved(&self) -> Resolved {
        *self.resolved.read()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.playback.lock().paused
    }

    pub(crate) fn master_clock(&self) -> Option<f64> {
        match self.resolved().master {
            SyncMaster::Audio => self.audio.get_clock(),
            SyncMaster::Video => self.video.get_clock(),
        }
    }

    pub(crate) fn master_pts(&self) -> Option<f64> {
        match self.resolved().master {
            SyncMaster::Audio => self.audio.get_pts(),
            SyncMaster::Video => self.video.get_pts(),
        }
    }

    /// `video_clock - master_clock` when video is slaved.
    fn video_master_diff(&self) -> Option<f64> {
        if self.resolved().master == SyncMaster::Video {
            return None;
        }
        Some(self.video.get_clock()? - self.master_clock()?)
    }

    /// `audio_clock - master_clock` when audio is slaved.
    fn audio_master_diff(&self) -> Option<f64> {
        if self.resolved().master == SyncMaster::Audio {
            return None;
        }
        Some(self.audio.get_clock()? - self.master_clock()?)
    }

    /// Delivers the terminal notification unless one was already sent.
    pub(crate) fn notify_quit(&self, reason: QuitReason) {
        if self.quit_sent.swap(true, Ordering::AcqRel) {
            tracing::debug!(?reason, "quit already reported");
            return;
        }
        match &reason {
            QuitReason::Failed(err) => tracing::error!(%err, uri = %self.uri, "playback failed"),
            other => tracing::debug!(reason = ?other, "playback stopped"),
        }
        self.handler.on_quit(reason);
    }

    pub(crate) fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(uri = %self.uri, "abort requested");
        self.interrupt.raise();
        self.audio.queue().abort();
        self.video.queue().abort();
        if let Some(pipe) = self.video_pipe.lock().as_ref() {
            pipe.frames.stop();
        }
        if let Some(pipe) = self.audio_pipe.lock().as_ref() {
            pipe.frames.stop();
        }
        self.seek.wake();
    }

    /// Flips pause, keeping the video timer and clocks continuous.
    pub(crate) fn toggle_pause_locked(&self, playback: &mut PlaybackState) {
        if playback.paused {
            let elapsed = now_secs() - self.video.last_updated();
            if let Some(timer) = playback.frame_timer.as_mut() {
                *timer += elapsed;
            }
            if playback.read_pause_supported {
                self.video.set_paused(false);
            }
            self.video.sync_serial_clock();
        }
        playback.paused = !playback.paused;
        self.video.set_paused(playback.paused);
        self.audio.set_paused(playback.paused);
        tracing::debug!(paused = playback.paused, "pause toggled");
    }

    pub(crate) fn step_locked(&self, playback: &mut PlaybackState) {
        if playback.paused {
            self.toggle_pause_locked(playback);
        }
        playback.step = true;
    }

    fn refresh_stats(&self) {
        let master_pts = self.master_pts();
        let master_clock = self.master_clock();
        let audio_clock = self.audio.get_clock();
        let video_clock = self.video.get_clock();
        let active_streams = ActiveStreams {
            audio: self.audio.is_opened(),
            video: self.video.is_opened(),
        };
        let (audio_queue_size, audio_bandwidth) = if active_streams.audio {
            (self.audio.queue().size(), self.audio.bandwidth())
        } else {
            (0, 0)
        };
        let (video_queue_size, video_bandwidth) = if active_streams.video {
            (self.video.queue().size(), self.video.bandwidth())
        } else {
            (0, 0)
        };

        let mut stats = self.stats.lock();
        stats.master_pts = master_pts;
        stats.master_clock = master_clock;
        stats.audio_clock = audio_clock;
        stats.video_clock = video_clock;
        stats.active_streams = active_streams;
        stats.audio_queue_size = audio_queue_size;
        stats.video_queue_size = video_queue_size;
        stats.audio_bandwidth = audio_bandwidth;
        stats.video_bandwidth = video_bandwidth;
    }

    fn try_to_get_video_frame(&self) -> Option<Arc<VideoFrame>> {
        let mut playback = self.playback.lock();
        if playback.paused && !playback.force_refresh {
            return None;
        }
        self.refresh_stats();

        let frames = self
            .video_pipe
            .lock()
            .as_ref()
            .map(|pipe| Arc::clone(&pipe.frames));
        let shown = frames.and_then(|frames| self.next_video_frame(&mut playback, &frames));
        playback.force_refresh = false;
        shown
    }

    fn next_video_frame(
        &self,
        playback: &mut PlaybackState,
        frames: &FrameQueue<VideoFrame>,
    ) -> Option<Arc<VideoFrame>> {
        let max_frame_duration = self.resolved().max_frame_duration;
        let drop_enabled = frame_drop_enabled(self.options.frame_drop, self.resolved().master);
        let mut presented = false;

        loop {
            let Some(head) = frames.peek() else {
                break;
            };
            if head.serial != self.video.serial() {
                frames.pop();
                continue;
            }
            let now = now_secs();
            let last = frames.peek_last().unwrap_or_else(|| Arc::clone(&head));
            if last.serial != head.serial {
                playback.frame_timer = Some(now);
            }
            if playback.paused {
                break;
            }

            let last_duration = if last.serial == head.serial {
                frame_duration_between(&last, &head, max_frame_duration)
            } else {
                0.0
            };
            let delay = compute_target_delay(
                last_duration,
                self.video_master_diff(),
                max_frame_duration,
            );
            // The very first frame is due immediately.
            let due = playback.frame_timer.map_or(now, |timer| timer + delay);
            if now < due {
                break;
            }

            let timer = if delay > 0.0 && now - due > AV_SYNC_THRESHOLD_MAX {
                now
            } else {
                due
            };
            playback.frame_timer = Some(timer);
            if let Some(pts) = head.pts {
                self.video.set_clock_at(Some(pts), now);
            }

            if let Some(next) = frames.peek_next() {
                let duration = if next.serial == head.serial {
                    frame_duration_between(&head, &next, max_frame_duration)
                } else {
                    0.0
                };
                if !playback.step && drop_enabled && now > timer + duration {
                    tracing::trace!(pts = ?head.pts, late = now - timer - duration, "late frame dropped");
                    self.stats.lock().frame_drops_late += 1;
                    frames.pop();
                    continue;
                }
            }

            frames.pop();
            playback.force_refresh = true;
            presented = true;
            if playback.step && !playback.paused {
                self.toggle_pause_locked(playback);
            }
            break;
        }

        if playback.force_refresh && frames.rindex_shown() {
            let shown = frames.peek_last()?;
            // Redisplays of the last frame are not new output.
            if presented {
                self.stats.lock().frame_processed += 1;
            }
            return Some(shown);
        }
        None
    }

    fn update_audio_buffer(&self, dest: &mut [u8], volume: Volume) {
        let callback_time = now_secs();
        let mut failure = None;
        {
            let mut path = self.audio_path.lock();
            let Some(tgt) = path.tgt else {
                dest.fill(0);
                return;
            };
            if !self.is_stream_ready() {
                fill_silence(dest, tgt.format);
                return;
            }

            let mut offset = 0;
            while offset < dest.len() {
                if path.buf_index >= path.buf_size {
                    match self.decode_audio_frame(&mut path, &tgt) {
                        Ok(Some(data)) => {
                            path.buf_size = data.len();
                            path.buf = Some(data);
                        }
                        Ok(None) => {
                            path.buf = None;
                            path.buf_size = AudioPath::silence_chunk(&tgt);
                        }
                        Err(err) => {
                            failure = Some(err);
                            path.buf = None;
                            path.buf_size = AudioPath::silence_chunk(&tgt);
                        }
                    }
                    path.buf_index = 0;
                }
                let len = (path.buf_size - path.buf_index).min(dest.len() - offset);
                let out = &mut dest[offset..offset + len];
                match &path.buf {
                    Some(buf) => {
                        let start = path.buf_index;
                        mix_samples(out, &buf[start..start + len], tgt.format, volume);
                    }
                    None => fill_silence(out, tgt.format),
                }
                offset += len;
                path.buf_index += len;
            }

            let write_buf_size = path.buf_size - path.buf_index;
            if let Some(clock) = path.clock {
                if path.clock_serial == self.audio.serial() {
                    let latency = tgt.bytes_to_secs(2 * path.hw_buf_size + write_buf_size);
                    self.audio.set_clock_at(Some(clock - latency), callback_time);
                }
            }
        }

        if let Some(err) = failure {
            self.audio.queue().abort();
            self.notify_quit(QuitReason::Failed(err));
        }
    }

    /// Pulls and converts the next audio frame.
    ///
    /// `Ok(None)` means nothing is playable right now. `Err` is only returned
    /// for the first resampler construction failure.
    fn decode_audio_frame(&self, path: &mut AudioPath, tgt: &AudioParams) -> Result<Option<Bytes>> {
        if path.failed || self.is_paused() {
            return Ok(None);
        }
        let Some(frames) = self
            .audio_pipe
            .lock()
            .as_ref()
            .map(|pipe| Arc::clone(&pipe.frames))
        else {
            return Ok(None);
        };

        let frame = loop {
            let Some(frame) = frames.peek() else {
                return Ok(None);
            };
            frames.pop();
            if frame.serial == self.audio.serial() {
                break frame;
            }
        };

        let nb_samples = frame.nb_samples;
        let src_rate = frame.params.sample_rate;
        let wanted = path
            .diff
            .wanted_samples(nb_samples, self.audio_master_diff(), src_rate);

        if path.src != Some(frame.params) || (wanted != nb_samples && path.resampler.is_none()) {
            match self.backend.resampler(frame.params, *tgt) {
                Ok(resampler) => {
                    path.resampler = Some(resampler);
                    path.src = Some(frame.params);
                }
                Err(err) => {
                    path.failed = true;
                    path.resampler = None;
                    tracing::error!(
                        %err,
                        src = ?frame.params,
                        tgt = ?tgt,
                        "cannot create sample rate converter"
                    );
                    return Err(err);
                }
            }
        }

        let data = match path.resampler.as_mut() {
            Some(resampler) => {
                if wanted != nb_samples {
                    let delta = scale_samples(wanted, tgt.sample_rate, src_rate)
                        - scale_samples(nb_samples, tgt.sample_rate, src_rate);
                    let distance = scale_samples(wanted, tgt.sample_rate, src_rate);
                    if let Err(err) = resampler.set_compensation(delta, distance.unsigned_abs() as usize) {
                        tracing::warn!(%err, "sample compensation rejected");
                        return Ok(None);
                    }
                }
                let capacity =
                    resampler_out_capacity(wanted, src_rate, tgt.sample_rate, RESAMPLER_HEADROOM_SAMPLES);
                match resampler.convert(&frame, capacity) {
                    Ok(data) => {
                        if data.len() / tgt.frame_size().max(1) >= capacity {
                            tracing::warn!(capacity, "audio buffer is probably too small");
                        }
                        data
                    }
                    Err(err) => {
                        tracing::warn!(%err, "audio conversion failed");
                        return Ok(None);
                    }
                }
            }
            None => match frame.packed_data() {
                Some(data) => data.clone(),
                None => return Ok(None),
            },
        };

        path.clock = frame.pts.map(|pts| pts + frame.duration());
        path.clock_serial = frame.serial;
        Ok(Some(data))
    }

    pub(crate) fn is_stream_ready(&self) -> bool {
        self.components_ready.load(Ordering::Acquire)
            && !self.is_aborted()
            && (self.audio.is_opened() || self.video.is_opened())
    }

    /// Byte offset that relative byte seeks start from.
    fn byte_seek_origin(&self) -> u64 {
        let video = self
            .video_pipe
            .lock()
            .as_ref()
            .and_then(|pipe| pipe.frames.last_pos());
        let audio = || {
            self.audio_pipe
                .lock()
                .as_ref()
                .and_then(|pipe| pipe.frames.last_pos())
        };
        video
            .or_else(audio)
            .or(*self.last_read_pos.lock())
            .unwrap_or(0)
    }

    fn stream_seek(&self, request: SeekRequest) -> bool {
        if self.is_aborted() {
            return false;
        }
        let accepted = self.seek.request(request);
        if accepted {
            tracing::debug!(
                position = request.target,
                relative = request.relative,
                unit = ?request.unit,
                "seek requested"
            );
        }
        accepted
    }
}

/// `samples * num / den` as a signed count.
fn scale_samples(samples: usize, num: u32, den: u32) -> i64 {
    if den == 0 {
        return 0;
    }
    let scaled = samples as u128 * u128::from(num) / u128::from(den);
    i64::try_from(scaled).unwrap_or(i64::MAX)
}

/// Handle to a playback engine. Cloning is cheap; all clones drive the same
/// engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("uri", &self.shared.uri)
            .field("aborted", &self.shared.is_aborted())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine for `uri`. Nothing is opened until [`exec`](Self::exec)
    /// or [`spawn`](Self::spawn).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` fail validation.
    pub fn new(
        uri: impl Into<String>,
        options: EngineOptions,
        backend: Arc<dyn MediaBackend>,
        handler: Arc<dyn EngineHandler>,
    ) -> Result<Self> {
        options.validate()?;
        let resolved = Resolved::from_options(&options);
        Ok(Self {
            shared: Arc::new(Shared {
                uri: uri.into(),
                options,
                resolved: RwLock::new(resolved),
                backend,
                handler,
                audio: Stream::new(MediaType::Audio),
                video: Stream::new(MediaType::Video),
                seek: SeekController::new(),
                interrupt: InterruptFlag::new(),
                aborted: AtomicBool::new(false),
                quit_sent: AtomicBool::new(false),
                components_ready: AtomicBool::new(false),
                source_info: RwLock::new(None),
                last_read_pos: Mutex::new(None),
                playback: Mutex::new(PlaybackState::default()),
                video_pipe: Mutex::new(None),
                audio_pipe: Mutex::new(None),
                audio_path: Mutex::new(AudioPath::default()),
                stats: Mutex::new(Stats::default()),
                pending_cycles: Mutex::new(Vec::new()),
                read_thread: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.shared.uri
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.shared.options
    }

    /// Runs the read routine on the calling thread until playback ends.
    ///
    /// All streams are closed before returning and the owner has been sent
    /// [`EngineHandler::on_quit`].
    pub fn exec(&self) -> QuitReason {
        self.shared.run()
    }

    /// Runs the read routine on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread cannot be spawned or the engine
    /// is already running.
    pub fn spawn(&self) -> Result<()> {
        let mut slot = self.shared.read_thread.lock();
        if slot.is_some() {
            return Err(Error::Io("engine already running".to_string()));
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("avsync-read".to_string())
            .spawn(move || shared.run())
            .map_err(|e| Error::Io(format!("failed to spawn read thread: {e}")))?;
        *slot = Some(handle);
        Ok(())
    }

    /// Waits for a thread started by [`spawn`](Self::spawn).
    ///
    /// Returns `None` if the engine was never spawned or already joined.
    pub fn join(&self) -> Option<QuitReason> {
        let handle = self.shared.read_thread.lock().take()?;
        match handle.join() {
            Ok(reason) => Some(reason),
            Err(_) => {
                tracing::error!(uri = %self.shared.uri, "read thread panicked");
                Some(QuitReason::Failed(
                    VideoError::Other("read thread panicked".to_string()).into(),
                ))
            }
        }
    }

    /// Stops every engine thread. Blocked reads, decodes and queue waits
    /// return promptly.
    pub fn abort(&self) {
        self.shared.abort();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.shared.is_aborted()
    }

    /// Whether streams are open and the audio callback may pull samples.
    #[must_use]
    pub fn is_stream_ready(&self) -> bool {
        self.shared.is_stream_ready()
    }

    pub fn toggle_pause(&self) {
        let mut playback = self.shared.playback.lock();
        self.shared.toggle_pause_locked(&mut playback);
        playback.step = false;
        drop(playback);
        self.shared.seek.wake();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Shows exactly one more frame, then pauses.
    pub fn step_to_next_frame(&self) {
        let mut playback = self.shared.playback.lock();
        self.shared.step_locked(&mut playback);
        drop(playback);
        self.shared.seek.wake();
    }

    /// Makes the next [`try_to_get_video_frame`](Self::try_to_get_video_frame)
    /// return the current frame again, even while paused.
    pub fn refresh_request(&self) {
        self.shared.playback.lock().force_refresh = true;
    }

    /// Seeks `offset` seconds relative to the current position.
    ///
    /// Byte-seeking sources convert the offset to bytes with the container
    /// bit rate. Returns `false` if another seek is still in flight.
    pub fn seek(&self, offset: f64) -> bool {
        if !self.shared.resolved().seek_by_bytes {
            return self.seek_msec(offset);
        }
        let bit_rate = self
            .shared
            .source_info
            .read()
            .as_ref()
            .and_then(|info| info.bit_rate);
        #[allow(clippy::cast_precision_loss)]
        let rate = bit_rate.map_or(BYTE_SEEK_FALLBACK_RATE, |bits| bits as f64 / 8.0);
        let increment = offset * rate;
        #[allow(clippy::cast_precision_loss)]
        let origin = self.shared.byte_seek_origin() as f64;
        self.shared
            .stream_seek(SeekRequest::bytes((origin + increment).max(0.0), increment))
    }

    /// Seeks `offset` seconds relative to the master clock by timestamp,
    /// regardless of the byte seeking policy.
    pub fn seek_msec(&self, offset: f64) -> bool {
        let origin = self
            .shared
            .master_clock()
            .or_else(|| self.shared.seek.last_time_target())
            .unwrap_or(0.0);
        let target = self.clamp_to_start(origin + offset);
        self.shared.stream_seek(SeekRequest::time(target, offset))
    }

    /// Seeks to an absolute position in seconds.
    pub fn seek_to(&self, position: f64) -> bool {
        let target = self.clamp_to_start(position);
        self.shared.stream_seek(SeekRequest::time(target, 0.0))
    }

    fn clamp_to_start(&self, position: f64) -> f64 {
        match self
            .shared
            .source_info
            .read()
            .as_ref()
            .and_then(|info| info.start_time)
        {
            Some(start) if position < start => start,
            _ => position,
        }
    }

    /// Jumps `increment` chapters from the one being played.
    ///
    /// Does nothing for sources without chapters or when the target chapter
    /// does not exist.
    pub fn seek_chapter(&self, increment: i32) -> bool {
        let chapter_start = {
            let info = self.shared.source_info.read();
            let Some(info) = info.as_ref().filter(|info| !info.chapters.is_empty()) else {
                return false;
            };
            let position = self.shared.master_clock().unwrap_or(0.0);
            let current = info
                .chapter_at(position)
                .and_then(|index| i64::try_from(index).ok())
                .unwrap_or(-1);
            let target = (current + i64::from(increment)).max(0);
            let Some(chapter) = usize::try_from(target)
                .ok()
                .and_then(|index| info.chapters.get(index))
            else {
                return false;
            };
            tracing::debug!(chapter = target, "seeking to chapter");
            chapter.start
        };
        self.shared.stream_seek(SeekRequest::time(chapter_start, 0.0))
    }

    /// Next chapter, or one minute ahead for sources with at most one chapter.
    pub fn seek_next_chunk(&self) -> bool {
        if self.chapter_count() > 1 {
            self.seek_chapter(1)
        } else {
            self.seek(CHUNK_SEEK_INCREMENT_SECS)
        }
    }

    /// Previous chapter, or one minute back for sources with at most one chapter.
    pub fn seek_prev_chunk(&self) -> bool {
        if self.chapter_count() > 1 {
            self.seek_chapter(-1)
        } else {
            self.seek(-CHUNK_SEEK_INCREMENT_SECS)
        }
    }

    fn chapter_count(&self) -> usize {
        self.shared
            .source_info
            .read()
            .as_ref()
            .map_or(0, |info| info.chapters.len())
    }

    /// Switches to the next stream of `media_type`, wrapping around.
    ///
    /// The switch is performed by the read thread.
    pub fn stream_cycle(&self, media_type: MediaType) {
        if media_type == MediaType::Other {
            return;
        }
        self.shared.pending_cycles.lock().push(media_type);
        self.shared.seek.wake();
    }

    /// Video frame to display now, or `None` to keep showing the current one.
    ///
    /// Call at a fixed interval from the video refresh loop.
    #[must_use]
    pub fn try_to_get_video_frame(&self) -> Option<Arc<VideoFrame>> {
        self.shared.try_to_get_video_frame()
    }

    /// Fills `dest` with packed samples in the negotiated device format.
    ///
    /// Call from the audio device callback. Silence is written whenever no
    /// samples are available.
    pub fn update_audio_buffer(&self, dest: &mut [u8], volume: Volume) {
        self.shared.update_audio_buffer(dest, volume);
    }

    #[must_use]
    pub fn statistic(&self) -> Stats {
        self.shared.stats.lock().clone()
    }

    #[must_use]
    pub fn master_clock(&self) -> Option<f64> {
        self.shared.master_clock()
    }

    #[must_use]
    pub fn master_pts(&self) -> Option<f64> {
        self.shared.master_pts()
    }

    /// Clock the other stream is corrected toward, after resolution against
    /// the opened streams.
    #[must_use]
    pub fn master_sync_type(&self) -> SyncMaster {
        self.shared.resolved().master
    }

    /// Nominal video frame rate.
    #[must_use]
    pub fn frame_rate(&self) -> Rational {
        self.shared.video.frame_rate()
    }

    /// Probe result of the source, once opened.
    #[must_use]
    pub fn source_info(&self) -> Option<SourceInfo> {
        self.shared.source_info.read().clone()
    }
}
