//! Error types for the `hub` crate.
//!
//! Follows the same pattern as the other crates in the workspace: a root `Error`
//! struct holding an optional source and a tree of error kind enums.

use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Top-level error type for the hub crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the hub.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Transport(TransportErrorKind),
    Codec(CodecErrorKind),
    Config(ConfigErrorKind),
}

/// Failures of the underlying connection.
#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    Read,
    Write,
    Closed,
}

/// Failures turning frames into envelopes and back.
#[derive(Debug, PartialEq)]
pub enum CodecErrorKind {
    Malformed,
    FrameTooLarge { size: usize, limit: usize },
    UnsupportedVersion(u8),
    UnexpectedPayload,
    NullPayload,
}

/// Invalid hub tunables.
#[derive(Debug, PartialEq)]
pub enum ConfigErrorKind {
    PingPeriodNotBelowPongWait,
    ZeroDuration(&'static str),
    ZeroMailboxCapacity,
    ZeroFrameSize,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn with_source(
        error_kind: ErrorKind,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            source: Some(source.into()),
            error_kind,
        }
    }

    pub fn transport(kind: TransportErrorKind) -> Self {
        Self::new(ErrorKind::Transport(kind))
    }

    pub fn codec(kind: CodecErrorKind) -> Self {
        Self::new(ErrorKind::Codec(kind))
    }

    pub fn config(kind: ConfigErrorKind) -> Self {
        Self::new(ErrorKind::Config(kind))
    }

    pub fn is_codec(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Codec(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport(kind) => write!(f, "transport error: {kind:?}")?,
            ErrorKind::Codec(CodecErrorKind::FrameTooLarge { size, limit }) => {
                write!(f, "frame of {size} bytes exceeds limit of {limit} bytes")?
            }
            ErrorKind::Codec(kind) => write!(f, "codec error: {kind:?}")?,
            ErrorKind::Config(kind) => write!(f, "invalid hub configuration: {kind:?}")?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Codec(CodecErrorKind::Malformed), err)
    }
}

// Errors surfaced by axum's WebSocket are all I/O level; the caller decides
// whether the failure happened while reading or writing.
impl From<axum::Error> for Error {
    fn from(err: axum::Error) -> Self {
        Error::with_source(ErrorKind::Transport(TransportErrorKind::Read), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(json_err);
        assert_eq!(err.error_kind, ErrorKind::Codec(CodecErrorKind::Malformed));
        assert!(err.to_string().starts_with("codec error: Malformed ("));
        assert!(err.source().is_some());
    }

    #[test]
    fn frame_too_large_reports_sizes() {
        let err = Error::codec(CodecErrorKind::FrameTooLarge {
            size: 10,
            limit: 4,
        });
        assert_eq!(
            err.to_string(),
            "frame of 10 bytes exceeds limit of 4 bytes"
        );
        assert!(err.is_codec());
    }
}
