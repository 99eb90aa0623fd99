// SPDX-License-Identifier: MPL-2.0
//! Crate-wide error types.
//!
//! [`Error`] is what every fallible public operation returns. Media failures
//! are grouped under [`VideoError`] so owners can tell "the source is broken"
//! apart from configuration or I/O problems.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Video(#[from] VideoError),
}

/// Failures raised by the playback pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VideoError {
    /// The source could not be opened or probed.
    #[error("failed to open source: {0}")]
    Open(String),

    /// The source contains neither a usable audio nor video stream.
    #[error("source has no playable audio or video stream")]
    NoStreams,

    /// No decoder is available for the stream's codec.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A decode primitive rejected its input.
    #[error("decoding failed: {0}")]
    Decode(String),

    /// Audio format conversion could not be configured or run.
    #[error("resampler failure: {0}")]
    Resampler(String),

    /// The source refused a seek request.
    #[error("seek failed: {0}")]
    Seek(String),

    /// The audio device rejected the requested format.
    #[error("audio device error: {0}")]
    AudioDevice(String),

    /// The operation is not implemented by the source or backend.
    #[error("operation not supported")]
    Unsupported,

    /// Generic error with raw message.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
