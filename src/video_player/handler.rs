// SPDX-License-Identifier: MPL-2.0
//! Callbacks from the engine to its owner.

use crate::error::{Error, Result};

use super::frame::{AudioParams, PixelFormat};
use super::time_units::Rational;

/// Why the engine stopped.
#[derive(Debug, Clone)]
pub enum QuitReason {
    /// Every opened pipeline drained after end of file.
    EndOfPlayback,
    /// The owner called [`Engine::abort`](super::engine::Engine::abort).
    Aborted,
    Failed(Error),
}

impl QuitReason {
    /// Process-style exit code: `0` unless playback failed.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::EndOfPlayback | Self::Aborted => 0,
            Self::Failed(_) => 1,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Owner hooks. Called from engine threads, never from the owner's own
/// call-ins.
pub trait EngineHandler: Send + Sync {
    /// Terminal notification; called at most once per run.
    fn on_quit(&self, reason: QuitReason);

    /// The first video frame was decoded, or the picture format changed.
    fn on_frame_geometry_changed(
        &self,
        _width: u32,
        _height: u32,
        _format: PixelFormat,
        _sample_aspect_ratio: Rational,
    ) {
    }

    /// Asks the owner to open its audio device.
    ///
    /// Receives the decoder's native format and returns the format the
    /// device accepted together with its buffer size in bytes. Called once
    /// before the audio decode thread starts.
    ///
    /// # Errors
    ///
    /// An error disables the audio stream; playback continues with video.
    fn on_audio_format_negotiated(&self, desired: &AudioParams) -> Result<(AudioParams, usize)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VideoError;

    #[test]
    fn only_failures_have_nonzero_code() {
        assert_eq!(QuitReason::EndOfPlayback.code(), 0);
        assert_eq!(QuitReason::Aborted.code(), 0);

        let failed = QuitReason::Failed(VideoError::NoStreams.into());
        assert_eq!(failed.code(), 1);
        assert!(matches!(
            failed.error(),
            Some(Error::Video(VideoError::NoStreams))
        ));
    }
}
