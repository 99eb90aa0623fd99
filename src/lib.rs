// SPDX-License-Identifier: MPL-2.0
//! `lens_avsync` is a real-time audio/video synchronization engine.
//!
//! It keeps decoded audio and video in step with a master clock, buffers
//! compressed data between a demuxer and per-stream decoders, and handles
//! seeking, pausing, frame stepping, end of stream and live stream
//! switching. Codecs are supplied by a [`video_player::MediaBackend`]; an
//! `FFmpeg` backend ships behind the `ffmpeg` feature.

#![doc(html_root_url = "https://docs.rs/lens_avsync/0.1.0")]

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod video_player;

pub use config::EngineOptions;
pub use error::{Error, Result, VideoError};
pub use video_player::{Engine, EngineHandler, MediaBackend, QuitReason};

#[cfg(test)]
mod test_utils;
