// SPDX-License-Identifier: MPL-2.0
//! Infrastructure layer adapters.
//!
//! Concrete implementations of the ports defined in
//! [`video_player`](crate::video_player), wrapping external libraries.
//!
//! # Available Adapters
//!
//! - [`ffmpeg`]: demuxing and decoding via `FFmpeg` (implements
//!   [`MediaBackend`]), behind the `ffmpeg` feature
//!
//! [`MediaBackend`]: crate::video_player::MediaBackend

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegBackend;
