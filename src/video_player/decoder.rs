// SPDX-License-Identifier: MPL-2.0
//! Generic decode loop shared by the audio and video pipelines.
//!
//! A [`Decoder`] pulls units from its stream's [`PacketQueue`], hands them to
//! an external [`DecodePrimitive`] and yields decoded frames one at a time.
//! The audio/video differences live in a [`FrameStamp`] strategy that fixes
//! up timestamps on the way out.
//!
//! # Feed/drain protocol
//!
//! ```text
//!   ┌──────────┐  get   ┌─────────┐  feed   ┌───────────┐  drain  ┌───────┐
//!   │ PacketQ  │───────▶│ Decoder │────────▶│ primitive │────────▶│ frame │
//!   └──────────┘        └─────────┘◀────────└───────────┘         └───────┘
//!                                  would-block: feed another unit
//! ```
//!
//! The primitive is drained until it reports would-block before another unit
//! is fed, so one unit may expand into many frames and one frame may need
//! several units.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;

use super::frame::{AudioFrame, VideoFrame};
use super::packet::Packet;
use super::packet_queue::PacketQueue;

/// Result of feeding one unit to a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Accepted,
    /// Output must be drained before this unit can be accepted.
    WouldBlock,
    /// The primitive was already drained to end of stream.
    EndOfStream,
}

/// Result of asking a primitive for output.
#[derive(Debug, Clone, PartialEq)]
pub enum Drain<F> {
    Frame(F),
    /// More input is needed.
    WouldBlock,
    /// Every buffered frame has been returned after an end-of-stream feed.
    EndOfStream,
}

/// External capability turning compressed units into raw frames.
///
/// Implementations must never block indefinitely; they report
/// [`Feed::WouldBlock`] or [`Drain::WouldBlock`] instead.
pub trait DecodePrimitive: Send {
    type Frame;

    /// Feeds one unit; `None` announces that no more units follow.
    fn feed(&mut self, packet: Option<&Packet>) -> Result<Feed>;

    /// Returns the next decoded frame, if any.
    fn drain(&mut self) -> Result<Drain<Self::Frame>>;

    /// Drops all internal state, ready for data after a discontinuity.
    fn flush(&mut self);
}

impl<P: DecodePrimitive + ?Sized> DecodePrimitive for Box<P> {
    type Frame = P::Frame;

    fn feed(&mut self, packet: Option<&Packet>) -> Result<Feed> {
        (**self).feed(packet)
    }

    fn drain(&mut self) -> Result<Drain<Self::Frame>> {
        (**self).drain()
    }

    fn flush(&mut self) {
        (**self).flush();
    }
}

/// Per-pipeline timestamp fix-ups applied to every decoded frame.
pub trait FrameStamp<F>: Send {
    fn stamp(&mut self, frame: &mut F);

    /// Called when a flush marker resets the decoder.
    fn on_flush(&mut self) {}
}

/// Video frames take the primitive's best-effort timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoTimestamps {
    /// Flush markers seen so far.
    serial: u64,
}

impl FrameStamp<VideoFrame> for VideoTimestamps {
    fn stamp(&mut self, frame: &mut VideoFrame) {
        frame.pts = frame.best_effort_pts.or(frame.pts);
        frame.serial = self.serial;
    }

    fn on_flush(&mut self) {
        self.serial += 1;
    }
}

/// Audio frames without pts continue from the previous frame's end.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioTimestamps {
    /// Seed used after every flush, for sources that seek by byte offset.
    start_pts: Option<f64>,
    next_pts: Option<f64>,
    serial: u64,
}

impl AudioTimestamps {
    #[must_use]
    pub fn new(start_pts: Option<f64>) -> Self {
        Self {
            start_pts,
            next_pts: start_pts,
            serial: 0,
        }
    }
}

impl FrameStamp<AudioFrame> for AudioTimestamps {
    fn stamp(&mut self, frame: &mut AudioFrame) {
        if frame.pts.is_none() {
            frame.pts = self.next_pts;
        }
        self.next_pts = frame.pts.map(|pts| pts + frame.duration());
        frame.serial = self.serial;
    }

    fn on_flush(&mut self) {
        self.next_pts = self.start_pts;
        self.serial += 1;
    }
}

/// What one [`Decoder::decode_frame`] call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome<F> {
    Frame(F),
    /// A marker was consumed or the stream ended; call again.
    NoFrame,
    /// The packet queue was aborted; the decode thread should exit.
    Aborted,
}

pub struct Decoder<P: DecodePrimitive, S> {
    primitive: P,
    stamp: S,
    queue: Arc<PacketQueue>,
    finished: Arc<AtomicBool>,
    /// Unit rejected with would-block, re-fed after draining.
    pending: Option<Packet>,
    /// Whether the primitive may hold output.
    draining: bool,
}

pub type VideoDecoder =
    Decoder<Box<dyn DecodePrimitive<Frame = VideoFrame>>, VideoTimestamps>;
pub type AudioDecoder =
    Decoder<Box<dyn DecodePrimitive<Frame = AudioFrame>>, AudioTimestamps>;

impl<P, S> Decoder<P, S>
where
    P: DecodePrimitive,
    S: FrameStamp<P::Frame>,
{
    #[must_use]
    pub fn new(primitive: P, queue: Arc<PacketQueue>, stamp: S) -> Self {
        Self {
            primitive,
            stamp,
            queue,
            finished: Arc::new(AtomicBool::new(false)),
            pending: None,
            draining: false,
        }
    }

    /// Arms the bound packet queue.
    pub fn start(&self) {
        self.queue.start();
    }

    /// Aborts and flushes the bound queue, unblocking the decode loop.
    pub fn abort(&self) {
        self.queue.abort();
        self.queue.flush();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Shared view of the finished flag for observers on other threads.
    #[must_use]
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    /// Produces the next frame, blocking on the packet queue as needed.
    pub fn decode_frame(&mut self) -> DecodeOutcome<P::Frame> {
        loop {
            if self.draining {
                match self.primitive.drain() {
                    Ok(Drain::Frame(mut frame)) => {
                        self.stamp.stamp(&mut frame);
                        return DecodeOutcome::Frame(frame);
                    }
                    Ok(Drain::WouldBlock) => self.draining = false,
                    Ok(Drain::EndOfStream) => {
                        self.draining = false;
                        self.finished.store(true, Ordering::Release);
                        return DecodeOutcome::NoFrame;
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to drain decoded frame");
                        self.draining = false;
                    }
                }
            }

            let packet = match self.pending.take() {
                Some(packet) => packet,
                None => match self.queue.get() {
                    Some(packet) => packet,
                    None => return DecodeOutcome::Aborted,
                },
            };

            if packet.is_flush_marker() {
                self.finished.store(false, Ordering::Release);
                self.draining = false;
                self.primitive.flush();
                self.stamp.on_flush();
                return DecodeOutcome::NoFrame;
            }

            let input = if packet.is_end_of_stream() {
                None
            } else {
                Some(&packet)
            };
            match self.primitive.feed(input) {
                Ok(Feed::Accepted | Feed::EndOfStream) => self.draining = true,
                Ok(Feed::WouldBlock) => {
                    self.pending = Some(packet);
                    self.draining = true;
                }
                Err(err) => {
                    tracing::warn!(%err, stream = packet.stream_index, "failed to decode unit");
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::VideoError;
    use crate::test_utils::assert_abs_diff_eq;
    use crate::video_player::frame::{AudioParams, PixelFormat, SampleFormat};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Primitive emitting `frames_per_unit` frames for every
    /// `units_per_frame` units; a payload of `b"bad"` fails to decode.
    pub(crate) struct ScriptedPrimitive {
        frames_per_unit: usize,
        units_per_frame: usize,
        fed: usize,
        ready: VecDeque<VideoFrame>,
        eos: bool,
        pub(crate) flushes: Arc<AtomicUsize>,
    }

    impl ScriptedPrimitive {
        pub(crate) fn new(frames_per_unit: usize, units_per_frame: usize) -> Self {
            Self {
                frames_per_unit,
                units_per_frame,
                fed: 0,
                ready: VecDeque::new(),
                eos: false,
                flushes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl DecodePrimitive for ScriptedPrimitive {
        type Frame = VideoFrame;

        fn feed(&mut self, packet: Option<&Packet>) -> Result<Feed> {
            let Some(packet) = packet else {
                self.eos = true;
                return Ok(Feed::Accepted);
            };
            if packet.data().is_some_and(|data| &data[..] == b"bad") {
                return Err(VideoError::Decode("corrupt unit".into()).into());
            }
            self.fed += 1;
            if self.fed % self.units_per_frame == 0 {
                for i in 0..self.frames_per_unit {
                    let mut frame = VideoFrame::empty(4, 4, PixelFormat::Rgba);
                    #[allow(clippy::cast_precision_loss)]
                    let offset = i as f64 * 0.01;
                    frame.best_effort_pts = packet.pts.map(|pts| pts + offset);
                    self.ready.push_back(frame);
                }
            }
            Ok(Feed::Accepted)
        }

        fn drain(&mut self) -> Result<Drain<VideoFrame>> {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Drain::Frame(frame));
            }
            if self.eos {
                return Ok(Drain::EndOfStream);
            }
            Ok(Drain::WouldBlock)
        }

        fn flush(&mut self) {
            self.ready.clear();
            self.eos = false;
            self.fed = 0;
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unit(pts: f64) -> Packet {
        Packet::new(0, Bytes::from_static(b"unit")).with_pts(pts)
    }

    fn decoder_with(
        primitive: ScriptedPrimitive,
    ) -> (Decoder<ScriptedPrimitive, VideoTimestamps>, Arc<PacketQueue>) {
        let queue = Arc::new(PacketQueue::new());
        let decoder = Decoder::new(primitive, Arc::clone(&queue), VideoTimestamps::default());
        decoder.start();
        (decoder, queue)
    }

    fn frame_pts(outcome: DecodeOutcome<VideoFrame>) -> Option<f64> {
        match outcome {
            DecodeOutcome::Frame(frame) => frame.pts,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn video_frames_take_best_effort_timestamp() {
        let (mut decoder, queue) = decoder_with(ScriptedPrimitive::new(1, 1));
        queue.put(unit(1.5));
        assert_eq!(frame_pts(decoder.decode_frame()), Some(1.5));
    }

    #[test]
    fn one_unit_can_expand_to_many_frames() {
        let (mut decoder, queue) = decoder_with(ScriptedPrimitive::new(3, 1));
        queue.put(unit(0.0));

        let pts: Vec<_> = (0..3).map(|_| frame_pts(decoder.decode_frame()).unwrap()).collect();
        assert_abs_diff_eq!(pts[0], 0.0);
        assert_abs_diff_eq!(pts[1], 0.01);
        assert_abs_diff_eq!(pts[2], 0.02);
    }

    #[test]
    fn one_frame_can_need_several_units() {
        let (mut decoder, queue) = decoder_with(ScriptedPrimitive::new(1, 2));
        queue.put(unit(0.0));
        queue.put(unit(0.04));
        assert_eq!(frame_pts(decoder.decode_frame()), Some(0.04));
        assert_eq!(queue.nb_packets(), 0);
    }

    #[test]
    fn flush_marker_resets_finished_and_flushes_once() {
        let primitive = ScriptedPrimitive::new(1, 1);
        let flushes = Arc::clone(&primitive.flushes);
        let (mut decoder, queue) = decoder_with(primitive);

        queue.put(unit(0.0));
        queue.put_end_of_stream(0);
        assert!(matches!(decoder.decode_frame(), DecodeOutcome::Frame(_)));
        assert_eq!(decoder.decode_frame(), DecodeOutcome::NoFrame);
        assert!(decoder.is_finished());
        assert_eq!(flushes.load(Ordering::SeqCst), 0);

        queue.put_flush_marker(0);
        assert_eq!(decoder.decode_frame(), DecodeOutcome::NoFrame);
        assert!(!decoder.is_finished());
        assert_eq!(flushes.load(Ordering::SeqCst), 1);

        queue.put_flush_marker(0);
        queue.put_flush_marker(0);
        assert_eq!(decoder.decode_frame(), DecodeOutcome::NoFrame);
        assert_eq!(decoder.decode_frame(), DecodeOutcome::NoFrame);
        assert_eq!(flushes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn frames_carry_flush_generation() {
        let (mut decoder, queue) = decoder_with(ScriptedPrimitive::new(1, 1));
        queue.put(unit(0.0));
        let DecodeOutcome::Frame(before) = decoder.decode_frame() else {
            panic!("expected a frame");
        };
        assert_eq!(before.serial, 0);

        queue.put_flush_marker(0);
        queue.put(unit(9.0));
        assert_eq!(decoder.decode_frame(), DecodeOutcome::NoFrame);
        let DecodeOutcome::Frame(after) = decoder.decode_frame() else {
            panic!("expected a frame");
        };
        assert_eq!(after.serial, 1);
    }

    #[test]
    fn decode_error_skips_unit_and_continues() {
        let (mut decoder, queue) = decoder_with(ScriptedPrimitive::new(1, 1));
        queue.put(Packet::new(0, Bytes::from_static(b"bad")).with_pts(0.0));
        queue.put(unit(0.04));
        assert_eq!(frame_pts(decoder.decode_frame()), Some(0.04));
    }

    #[test]
    fn abort_stops_the_loop() {
        let (mut decoder, queue) = decoder_with(ScriptedPrimitive::new(1, 1));
        queue.put(unit(0.0));
        decoder.abort();
        assert_eq!(decoder.decode_frame(), DecodeOutcome::Aborted);
        assert_eq!(queue.nb_packets(), 0);
    }

    #[test]
    fn abort_unblocks_decoder_waiting_on_empty_queue() {
        let (mut decoder, queue) = decoder_with(ScriptedPrimitive::new(1, 1));
        let worker = std::thread::spawn(move || decoder.decode_frame());
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.abort();
        assert_eq!(worker.join().expect("decode thread panicked"), DecodeOutcome::Aborted);
    }

    #[test]
    fn audio_timestamps_fill_gaps_and_reset_on_flush() {
        let params = AudioParams::new(1_000, 1, SampleFormat::S16);
        let mut stamp = AudioTimestamps::new(Some(10.0));

        let mut first = AudioFrame::packed(params, Bytes::from(vec![0u8; 200]));
        stamp.stamp(&mut first);
        assert_eq!(first.pts, Some(10.0));

        let mut second = AudioFrame::packed(params, Bytes::from(vec![0u8; 200]));
        stamp.stamp(&mut second);
        assert_abs_diff_eq!(second.pts.unwrap(), 10.1, epsilon = 1e-9);

        let mut explicit = AudioFrame::packed(params, Bytes::from(vec![0u8; 200])).with_pts(3.0);
        stamp.stamp(&mut explicit);
        assert_eq!(explicit.pts, Some(3.0));

        stamp.on_flush();
        let mut after_flush = AudioFrame::packed(params, Bytes::from(vec![0u8; 200]));
        stamp.stamp(&mut after_flush);
        assert_eq!(after_flush.pts, Some(10.0));
    }
}
