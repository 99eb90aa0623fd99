// SPDX-License-Identifier: MPL-2.0
//! The read thread: demuxes the source into the stream packet queues and
//! services seeks, pause edges, stream switches and end of file.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::config::READ_STALL_WAIT_MS;
use crate::error::{Error, Result, VideoError};

use super::engine::{Resolved, Shared};
use super::handler::QuitReason;
use super::packet::{MediaType, StreamInfo};
use super::source::{MediaSource, ReadError, SourceInfo};

const STALL: Duration = Duration::from_millis(READ_STALL_WAIT_MS);

/// Per-run bookkeeping that only the read thread touches.
#[derive(Debug, Default)]
struct ReadState {
    eof: bool,
    last_paused: bool,
    /// Index of the last audio stream opened, kept across closes.
    last_audio: Option<usize>,
    last_video: Option<usize>,
}

impl ReadState {
    fn last_opened(&mut self, media_type: MediaType) -> Option<&mut Option<usize>> {
        match media_type {
            MediaType::Audio => Some(&mut self.last_audio),
            MediaType::Video => Some(&mut self.last_video),
            MediaType::Other => None,
        }
    }
}

/// Whether `stream` can be opened as a `media_type` component.
fn is_candidate(stream: &StreamInfo, media_type: MediaType) -> bool {
    if stream.media_type != media_type {
        return false;
    }
    match media_type {
        MediaType::Audio => stream.codec.sample_rate != 0 && stream.codec.channels != 0,
        MediaType::Video => true,
        MediaType::Other => false,
    }
}

/// Stream to open for `media_type` at startup: the wanted index if it fits,
/// else the first candidate.
fn initial_stream(info: &SourceInfo, media_type: MediaType, wanted: Option<usize>) -> Option<StreamInfo> {
    if let Some(index) = wanted {
        match info.stream(index) {
            Some(stream) if is_candidate(stream, media_type) => return Some(stream.clone()),
            _ => tracing::warn!(index, media = ?media_type, "wanted stream is not usable"),
        }
    }
    info.streams
        .iter()
        .find(|stream| is_candidate(stream, media_type))
        .cloned()
}

/// Next candidate after `current` in source order, wrapping around.
///
/// Without a current stream the search does not wrap. Returns `None` when
/// the search comes back to `current`.
pub(crate) fn next_stream(
    info: &SourceInfo,
    media_type: MediaType,
    current: Option<usize>,
) -> Option<StreamInfo> {
    let streams = &info.streams;
    let start = current.and_then(|index| streams.iter().position(|s| s.index == index));
    let order: Vec<usize> = match start {
        Some(start) => (1..streams.len()).map(|step| (start + step) % streams.len()).collect(),
        None => (0..streams.len()).collect(),
    };
    order
        .into_iter()
        .map(|position| &streams[position])
        .find(|stream| is_candidate(stream, media_type))
        .cloned()
}

impl Shared {
    /// Read thread body. Always closes every component and reports the
    /// outcome through the handler before returning.
    pub(crate) fn run(self: &Arc<Self>) -> QuitReason {
        let reason = match self.read_routine() {
            Ok(reason) => reason,
            Err(err) => {
                tracing::error!(%err, uri = %self.uri, "read routine failed");
                QuitReason::Failed(err)
            }
        };
        self.components_ready.store(false, Ordering::Release);
        self.close_component(MediaType::Audio);
        self.close_component(MediaType::Video);
        self.notify_quit(reason.clone());
        reason
    }

    fn read_routine(self: &Arc<Self>) -> Result<QuitReason> {
        let mut source = self
            .backend
            .open(&self.uri, self.interrupt.clone())
            .map_err(|err| match err {
                Error::Video(VideoError::Open(_)) => err,
                other => Error::Video(VideoError::Open(other.to_string())),
            })?;
        let info = source.info().clone();
        tracing::info!(
            uri = %self.uri,
            format = %info.format_name,
            streams = info.streams.len(),
            duration = ?info.duration,
            "source opened"
        );
        *self.resolved.write() = Resolved::for_source(&self.options, &info);
        *self.source_info.write() = Some(info.clone());

        let mut state = ReadState::default();
        if self.options.enable_audio {
            if let Some(stream) = initial_stream(&info, MediaType::Audio, self.options.wanted_audio_stream) {
                self.open_tracked(&stream, &mut state);
            }
        }
        if self.options.enable_video {
            if let Some(stream) = initial_stream(&info, MediaType::Video, self.options.wanted_video_stream) {
                self.open_tracked(&stream, &mut state);
            }
        }

        let audio = self.audio.is_opened();
        let video = self.video.is_opened();
        if !audio && !video {
            return Err(VideoError::NoStreams.into());
        }
        let resolved = self.resolved().with_opened(audio, video);
        *self.resolved.write() = resolved;
        tracing::debug!(
            master = ?resolved.master,
            seek_by_bytes = resolved.seek_by_bytes,
            infinite_buffer = resolved.infinite_buffer,
            "playback settings resolved"
        );
        self.components_ready.store(true, Ordering::Release);

        loop {
            if self.is_aborted() {
                return Ok(QuitReason::Aborted);
            }

            self.service_stream_cycles(&info, &mut state);
            self.service_pause_edge(source.as_mut(), &mut state);

            if info.realtime && state.last_paused {
                self.seek.wait(STALL);
                continue;
            }

            if let Some(request) = self.seek.begin() {
                let range = request.range();
                match source.seek(&range) {
                    Ok(()) => {
                        self.audio.put_flush_marker();
                        self.video.put_flush_marker();
                        state.eof = false;
                        {
                            let mut playback = self.playback.lock();
                            if playback.paused {
                                self.step_locked(&mut playback);
                            }
                        }
                        self.stats.lock().reset();
                        tracing::debug!(target_pos = range.target, unit = ?range.unit, "seek done");
                    }
                    Err(err) => {
                        tracing::warn!(%err, target_pos = range.target, uri = %self.uri, "seek failed");
                    }
                }
                self.seek.complete();
            }

            if !resolved.infinite_buffer && self.buffers_full() {
                self.seek.wait(STALL);
                continue;
            }

            if state.eof && !self.is_paused() && self.is_drained() {
                if self.options.auto_exit {
                    return Ok(QuitReason::EndOfPlayback);
                }
                self.seek.wait(STALL);
                continue;
            }

            match source.read_packet() {
                Ok(packet) => {
                    state.eof = false;
                    let position = source.byte_position().or(packet.pos);
                    if position.is_some() {
                        *self.last_read_pos.lock() = position;
                    }
                    let index = Some(packet.stream_index);
                    if index == self.audio.index() {
                        self.audio.register_packet(packet);
                    } else if index == self.video.index() {
                        self.video.register_packet(packet);
                    }
                }
                Err(ReadError::Interrupted) => {}
                Err(err) => {
                    if !state.eof {
                        if let ReadError::Failed(reason) = &err {
                            tracing::warn!(%reason, "read failed, treating as end of file");
                        } else {
                            tracing::debug!("end of file");
                        }
                        self.audio.put_end_of_stream();
                        self.video.put_end_of_stream();
                        state.eof = true;
                    }
                    self.seek.wait(STALL);
                }
            }
        }
    }

    fn open_tracked(self: &Arc<Self>, stream: &StreamInfo, state: &mut ReadState) {
        match self.open_component(stream) {
            Ok(()) => {
                if let Some(slot) = state.last_opened(stream.media_type) {
                    *slot = Some(stream.index);
                }
            }
            Err(err) => {
                tracing::warn!(%err, stream = stream.index, media = ?stream.media_type, "failed to open stream");
            }
        }
    }

    fn service_stream_cycles(self: &Arc<Self>, info: &SourceInfo, state: &mut ReadState) {
        let pending: Vec<MediaType> = std::mem::take(&mut *self.pending_cycles.lock());
        for media_type in pending {
            let Some(stream_slot) = self.stream(media_type) else {
                continue;
            };
            let current = stream_slot
                .index()
                .or_else(|| state.last_opened(media_type).and_then(|slot| *slot));
            let Some(next) = next_stream(info, media_type, current) else {
                continue;
            };
            if Some(next.index) == current && stream_slot.is_opened() {
                continue;
            }
            tracing::info!(
                media = ?media_type,
                from = ?current,
                to = next.index,
                "switching stream"
            );
            self.close_component(media_type);
            self.open_tracked(&next, state);
        }
    }

    fn service_pause_edge(&self, source: &mut dyn MediaSource, state: &mut ReadState) {
        let paused = self.is_paused();
        if paused == state.last_paused {
            return;
        }
        state.last_paused = paused;
        let result = if paused { source.pause() } else { source.play() };
        let supported = !matches!(result, Err(Error::Video(VideoError::Unsupported)));
        if let Err(err) = &result {
            if supported {
                tracing::warn!(%err, paused, "source rejected pause change");
            }
        }
        self.playback.lock().read_pause_supported = supported;
        self.stats.lock().reset();
        tracing::debug!(paused, supported, "pause edge handled by read thread");
    }

    /// Whether the queues hold enough that reading can stall.
    fn buffers_full(&self) -> bool {
        let queued = self.audio.queue().size() + self.video.queue().size();
        queued > self.options.max_queue_bytes
            || (self.audio.has_enough_packets() && self.video.has_enough_packets())
    }

    /// Whether every opened stream decoded and presented all its data.
    fn is_drained(&self) -> bool {
        let audio = !self.audio.is_opened()
            || (self.audio.queue().nb_packets() == 0
                && self.audio_pipe.lock().as_ref().map_or(true, |pipe| pipe.is_drained()));
        let video = !self.video.is_opened()
            || (self.video.queue().nb_packets() == 0
                && self.video_pipe.lock().as_ref().map_or(true, |pipe| pipe.is_drained()));
        audio && video
    }
}
