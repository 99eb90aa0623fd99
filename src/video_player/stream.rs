// SPDX-License-Identifier: MPL-2.0
//! One elementary stream slot of the engine.
//!
//! A [`Stream`] exists for the whole engine lifetime and is bound to a
//! concrete source stream by [`Stream::open`]. It owns the stream's clock,
//! packet queue and throughput accounting; other components only reach the
//! clock through the methods here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{DEFAULT_FRAME_PER_SEC, MIN_FRAMES};

use super::bandwidth::{BandwidthMeter, DesiredBandwidth};
use super::clock::Clock;
use super::packet::{MediaType, Packet, StreamInfo};
use super::packet_queue::PacketQueue;
use super::time_units::{now_secs, Rational};

/// Queued duration above which a stream is considered buffered.
const ENOUGH_QUEUED_SECS: f64 = 1.0;

#[derive(Debug, Default)]
struct Binding {
    info: Option<StreamInfo>,
    desired: Option<DesiredBandwidth>,
}

#[derive(Debug)]
pub struct Stream {
    media_type: MediaType,
    binding: Mutex<Binding>,
    clock: Mutex<Clock>,
    meter: Mutex<BandwidthMeter>,
    queue: Arc<PacketQueue>,
    /// Flush markers queued so far; frames of older generations are stale.
    serial: AtomicU64,
}

impl Stream {
    #[must_use]
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            binding: Mutex::new(Binding::default()),
            clock: Mutex::new(Clock::new()),
            meter: Mutex::new(BandwidthMeter::default()),
            queue: Arc::new(PacketQueue::new()),
            serial: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Binds the slot to `info` and arms its packet queue.
    pub fn open(&self, info: StreamInfo) {
        let desired = DesiredBandwidth::for_stream(&info);
        if desired.is_none() {
            tracing::warn!(
                stream = info.index,
                codec = ?info.codec.codec,
                "no bandwidth estimate for stream"
            );
        }
        tracing::debug!(stream = info.index, media = ?self.media_type, "stream opened");
        self.queue.start();
        self.serial.store(0, Ordering::Release);
        *self.clock.lock() = Clock::new();
        self.meter.lock().reset();
        let mut binding = self.binding.lock();
        binding.info = Some(info);
        binding.desired = desired;
    }

    /// Detaches the slot. The packet queue is aborted and emptied.
    pub fn close(&self) {
        let previous = self.binding.lock().info.take();
        self.queue.abort();
        self.queue.flush();
        if let Some(info) = previous {
            tracing::debug!(stream = info.index, media = ?self.media_type, "stream closed");
        }
    }

    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.binding.lock().info.is_some()
    }

    /// Source index of the bound stream.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.binding.lock().info.as_ref().map(|info| info.index)
    }

    #[must_use]
    pub fn info(&self) -> Option<StreamInfo> {
        self.binding.lock().info.clone()
    }

    /// Nominal frame rate, falling back to the default for unknown rates.
    #[must_use]
    pub fn frame_rate(&self) -> Rational {
        self.binding
            .lock()
            .info
            .as_ref()
            .and_then(|info| info.frame_rate)
            .filter(|rate| rate.to_f64().is_some_and(|fps| fps > 0.0))
            .unwrap_or(Rational::new(DEFAULT_FRAME_PER_SEC as i32, 1))
    }

    #[must_use]
    pub fn desired_bandwidth(&self) -> Option<DesiredBandwidth> {
        self.binding.lock().desired
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    /// Whether the read thread may stop feeding this stream for now.
    ///
    /// Unbound and aborted slots never need data. Attached pictures are a
    /// single frame and count as buffered. Otherwise more than
    /// [`MIN_FRAMES`] units and over a second of queued media are needed;
    /// units without a duration only count by number.
    #[must_use]
    pub fn has_enough_packets(&self) -> bool {
        let attached_picture = match self.binding.lock().info.as_ref() {
            None => return true,
            Some(info) => info.attached_picture,
        };
        if self.queue.is_aborted() || attached_picture {
            return true;
        }
        let duration = self.queue.duration();
        self.queue.nb_packets() > MIN_FRAMES && (duration == 0.0 || duration > ENOUGH_QUEUED_SECS)
    }

    /// Queues a unit read from the source and accounts for its bytes.
    ///
    /// Returns `false` if the queue rejected the unit.
    pub fn register_packet(&self, packet: Packet) -> bool {
        let size = packet.size();
        let accepted = self.queue.put(packet);
        if accepted {
            self.meter.lock().register(size, now_secs());
        }
        accepted
    }

    /// Starts a new generation after a discontinuity.
    ///
    /// Queued units are discarded, a flush marker is queued for the decoder
    /// and the clock is invalidated until a frame of the new generation
    /// sets it.
    pub fn put_flush_marker(&self) -> bool {
        let Some(index) = self.index() else {
            return false;
        };
        self.queue.flush();
        self.serial.fetch_add(1, Ordering::AcqRel);
        self.clock.lock().set_clock(None);
        self.queue.put_flush_marker(index)
    }

    /// Queues an end-of-stream drain marker.
    pub fn put_end_of_stream(&self) -> bool {
        self.index()
            .is_some_and(|index| self.queue.put_end_of_stream(index))
    }

    /// Current flush generation.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }

    /// Measured throughput in bytes per second.
    #[must_use]
    pub fn bandwidth(&self) -> u64 {
        self.meter.lock().bytes_per_sec(now_secs())
    }

    #[must_use]
    pub fn total_downloaded_bytes(&self) -> u64 {
        self.meter.lock().total_bytes()
    }

    /// Freezes or resumes the clock. Resuming restarts the bandwidth window.
    pub fn set_paused(&self, paused: bool) {
        self.clock.lock().set_paused(paused);
        if !paused {
            self.meter.lock().reset();
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.clock.lock().is_paused()
    }

    /// Re-anchors the clock to its own reading at the current wall time.
    pub fn sync_serial_clock(&self) {
        self.clock.lock().sync_to_self();
    }

    pub fn set_clock_at(&self, pts: Option<f64>, time: f64) {
        self.clock.lock().set_clock_at(pts, time);
    }

    pub fn set_clock(&self, pts: Option<f64>) {
        self.clock.lock().set_clock(pts);
    }

    #[must_use]
    pub fn get_clock(&self) -> Option<f64> {
        self.clock.lock().get_clock()
    }

    /// Last pts the clock was set to.
    #[must_use]
    pub fn get_pts(&self) -> Option<f64> {
        self.clock.lock().pts()
    }

    #[must_use]
    pub fn last_updated(&self) -> f64 {
        self.clock.lock().last_updated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;
    use crate::video_player::frame::PixelFormat;
    use crate::video_player::packet::{CodecId, CodecParameters};
    use bytes::Bytes;

    fn video_info() -> StreamInfo {
        StreamInfo::new(
            3,
            MediaType::Video,
            CodecParameters::video(CodecId::H264, 640, 360, PixelFormat::Yuv420p),
        )
        .with_frame_rate(Rational::new(30, 1))
    }

    fn unit(duration: f64) -> Packet {
        Packet::new(3, Bytes::from_static(&[0u8; 64])).with_duration(duration)
    }

    #[test]
    fn open_binds_index_and_starts_queue() {
        let stream = Stream::new(MediaType::Video);
        assert!(!stream.is_opened());
        assert!(stream.queue().is_aborted());

        stream.open(video_info());
        assert_eq!(stream.index(), Some(3));
        assert!(!stream.queue().is_aborted());
        assert!(stream.desired_bandwidth().is_some());
        assert_eq!(stream.frame_rate(), Rational::new(30, 1));
    }

    #[test]
    fn close_resets_index_and_aborts_queue() {
        let stream = Stream::new(MediaType::Video);
        stream.open(video_info());
        assert!(stream.register_packet(unit(0.04)));

        stream.close();
        assert_eq!(stream.index(), None);
        assert!(stream.queue().is_aborted());
        assert_eq!(stream.queue().nb_packets(), 0);
        assert!(!stream.register_packet(unit(0.04)));
    }

    #[test]
    fn unopened_stream_never_needs_packets() {
        let stream = Stream::new(MediaType::Audio);
        assert!(stream.has_enough_packets());
    }

    #[test]
    fn enough_packets_needs_count_and_duration() {
        let stream = Stream::new(MediaType::Video);
        stream.open(video_info());

        for _ in 0..=MIN_FRAMES {
            stream.register_packet(unit(0.01));
        }
        // Count is reached but only about a quarter second is queued.
        assert!(!stream.has_enough_packets());

        for _ in 0..80 {
            stream.register_packet(unit(0.01));
        }
        assert!(stream.has_enough_packets());
    }

    #[test]
    fn units_without_duration_count_by_number() {
        let stream = Stream::new(MediaType::Video);
        stream.open(video_info());
        for _ in 0..=MIN_FRAMES {
            stream.register_packet(unit(0.0));
        }
        assert!(stream.has_enough_packets());
    }

    #[test]
    fn attached_picture_is_always_buffered() {
        let stream = Stream::new(MediaType::Video);
        let mut info = video_info();
        info.attached_picture = true;
        stream.open(info);
        assert!(stream.has_enough_packets());
    }

    #[test]
    fn missing_frame_rate_uses_default() {
        let stream = Stream::new(MediaType::Video);
        let mut info = video_info();
        info.frame_rate = None;
        stream.open(info);
        assert_eq!(
            stream.frame_rate(),
            Rational::new(DEFAULT_FRAME_PER_SEC as i32, 1)
        );
    }

    #[test]
    fn paused_clock_is_frozen() {
        let stream = Stream::new(MediaType::Audio);
        stream.set_clock(Some(5.0));
        stream.set_paused(true);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_abs_diff_eq!(stream.get_clock().unwrap(), 5.0);
    }

    #[test]
    fn flush_marker_discards_queue_and_starts_generation() {
        let stream = Stream::new(MediaType::Video);
        stream.open(video_info());
        stream.set_clock(Some(3.0));
        stream.register_packet(unit(0.04));
        stream.register_packet(unit(0.04));

        assert!(stream.put_flush_marker());
        assert_eq!(stream.serial(), 1);
        assert_eq!(stream.queue().nb_packets(), 1);
        assert!(stream.queue().get().is_some_and(|p| p.is_flush_marker()));
        assert_eq!(stream.get_clock(), None);
    }

    #[test]
    fn unopened_stream_takes_no_markers() {
        let stream = Stream::new(MediaType::Audio);
        assert!(!stream.put_flush_marker());
        assert!(!stream.put_end_of_stream());
        assert_eq!(stream.serial(), 0);
    }

    #[test]
    fn register_packet_tracks_downloaded_bytes() {
        let stream = Stream::new(MediaType::Video);
        stream.open(video_info());
        stream.register_packet(unit(0.04));
        stream.register_packet(unit(0.04));
        assert_eq!(stream.total_downloaded_bytes(), 128);
    }
}
