// SPDX-License-Identifier: MPL-2.0
//! Real-time audio/video synchronization engine.
//!
//! An [`Engine`] owns one playback session: a read thread demuxes the source
//! into per-stream packet queues, decode threads turn packets into frames,
//! and the owner pulls output at presentation time:
//!
//! - video through [`Engine::try_to_get_video_frame`] on a refresh tick, or
//!   with [`spawn_video_refresh`] on a tokio runtime
//! - audio through [`Engine::update_audio_buffer`] from the device callback
//!
//! Playback follows a master clock (audio or video). Frames are
//! held, shown or dropped according to their distance from the master, and
//! audio is nudged by resampling when it drifts.
//!
//! The codec layer is pluggable through [`MediaBackend`]; the `ffmpeg`
//! feature provides one in `infrastructure::ffmpeg`.

pub mod audio;
#[cfg(feature = "audio-output")]
pub mod audio_output;
mod bandwidth;
mod clock;
mod decoder;
mod engine;
mod filter;
mod frame;
mod frame_queue;
mod handler;
mod packet;
mod packet_queue;
mod read_loop;
mod refresh;
mod seek;
mod source;
mod stats;
mod stream;
pub mod sync;
pub mod time_units;
mod volume;
mod workers;

pub use audio::{LinearResampler, Resampler};
#[cfg(feature = "audio-output")]
pub use audio_output::CpalAudioOutput;
pub use bandwidth::{BandwidthMeter, DesiredBandwidth};
pub use clock::Clock;
pub use decoder::{
    AudioDecoder, AudioTimestamps, DecodeOutcome, DecodePrimitive, Decoder, Drain, Feed,
    FrameStamp, VideoDecoder, VideoTimestamps,
};
pub use engine::Engine;
pub use filter::{FilterStage, FrameFilter};
pub use frame::{AudioFrame, AudioParams, ChannelLayout, PixelFormat, Plane, SampleFormat, VideoFrame};
pub use frame_queue::{FrameQueue, SourcePosition, WritableSlot};
pub use handler::{EngineHandler, QuitReason};
pub use packet::{CodecId, CodecParameters, MediaType, Packet, StreamInfo};
pub use packet_queue::PacketQueue;
pub use refresh::{spawn_video_refresh, PresentationSink, RefreshHandle};
pub use seek::{SeekController, SeekRange, SeekRequest, SeekState, SeekUnit};
pub use source::{
    AudioPrimitive, Chapter, InterruptFlag, MediaBackend, MediaSource, ReadError, SourceInfo,
    VideoPrimitive,
};
pub use stats::{ActiveStreams, Stats};
pub use stream::Stream;
pub use time_units::Rational;
pub use volume::Volume;
