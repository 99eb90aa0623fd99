// SPDX-License-Identifier: MPL-2.0
//! Engine options.
//!
//! [`EngineOptions`] collects every knob the playback engine reads at runtime:
//! master clock policy, frame dropping, seeking mode, buffering and stream
//! selection. Options are plain serde data so owners can embed them in their
//! own settings documents.
//!
//! # Examples
//!
//! ```
//! use lens_avsync::config::{EngineOptions, FrameDrop, SyncMaster};
//!
//! let options = EngineOptions::from_toml_str(
//!     r#"
//!     av_sync_type = "video"
//!     frame_drop = "off"
//!     "#,
//! )
//! .expect("valid options");
//!
//! assert_eq!(options.av_sync_type, SyncMaster::Video);
//! assert_eq!(options.frame_drop, FrameDrop::Off);
//! assert!(options.auto_exit);
//! ```

pub mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which clock the other stream is corrected toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMaster {
    #[default]
    Audio,
    Video,
}

/// Late video frame dropping policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameDrop {
    /// Drop when video is not the master clock.
    #[default]
    Auto,
    Off,
    /// Same as `Auto`; kept distinct so owners can express intent.
    On,
}

/// Whether relative seeks are expressed in bytes instead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekByBytes {
    /// Byte seeking for sources with timestamp discontinuities (except ogg).
    #[default]
    Auto,
    Off,
    On,
}

/// Whether the read thread may buffer without bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfiniteBuffer {
    /// Unbounded buffering for realtime sources only.
    #[default]
    Auto,
    Off,
    On,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub av_sync_type: SyncMaster,
    pub frame_drop: FrameDrop,
    pub seek_by_bytes: SeekByBytes,
    pub infinite_buffer: InfiniteBuffer,
    /// Report end-of-playback to the owner once both pipelines drain.
    pub auto_exit: bool,
    pub enable_audio: bool,
    pub enable_video: bool,
    /// Source stream index to prefer for audio; best match when `None`.
    pub wanted_audio_stream: Option<usize>,
    /// Source stream index to prefer for video; best match when `None`.
    pub wanted_video_stream: Option<usize>,
    /// Forced decoder name handed to the backend.
    pub audio_codec_name: Option<String>,
    /// Forced decoder name handed to the backend.
    pub video_codec_name: Option<String>,
    pub video_queue_capacity: usize,
    pub audio_queue_capacity: usize,
    pub max_queue_bytes: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            av_sync_type: SyncMaster::default(),
            frame_drop: FrameDrop::default(),
            seek_by_bytes: SeekByBytes::default(),
            infinite_buffer: InfiniteBuffer::default(),
            auto_exit: true,
            enable_audio: true,
            enable_video: true,
            wanted_audio_stream: None,
            wanted_video_stream: None,
            audio_codec_name: None,
            video_codec_name: None,
            video_queue_capacity: VIDEO_PICTURE_QUEUE_SIZE,
            audio_queue_capacity: SAMPLE_QUEUE_SIZE,
            max_queue_bytes: MAX_QUEUE_SIZE,
        }
    }
}

impl EngineOptions {
    /// Parses options from a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: Self = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Rejects option combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.video_queue_capacity < MIN_FRAME_QUEUE_SIZE
            || self.audio_queue_capacity < MIN_FRAME_QUEUE_SIZE
        {
            return Err(Error::Config(format!(
                "frame queue capacity must be at least {MIN_FRAME_QUEUE_SIZE}"
            )));
        }
        if !self.enable_audio && !self.enable_video {
            return Err(Error::Config(
                "at least one of audio or video must be enabled".to_string(),
            ));
        }
        Ok(())
    }
}
