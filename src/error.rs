//! Error handling types for debug-relay
//!
//! Framing problems on a DAP byte stream are reported as [`CodecError`];
//! everything else surfaced by the relay, the default session handler and the
//! backend launcher is a [`RelayError`].

use thiserror::Error;

/// Failure while decoding or encoding a Content-Length framed DAP stream.
///
/// Every variant except [`CodecError::Io`] means the stream is corrupted and
/// cannot be resynchronised.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Header block ended without a Content-Length header
    #[error("Missing Content-Length header")]
    MissingContentLength,

    /// A header line was not `Name: value`
    #[error("Malformed header line: {line:?}")]
    MalformedHeader { line: String },

    /// Content-Length value was not a non-negative integer
    #[error("Invalid Content-Length value: {value:?}")]
    InvalidContentLength { value: String },

    /// Content-Length exceeds the largest accepted frame
    #[error("Frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { length: usize, limit: usize },

    /// Stream ended in the middle of a frame
    #[error("Stream ended inside a frame ({context})")]
    UnexpectedEof { context: &'static str },

    /// Frame body was not a DAP message
    #[error("Invalid message body: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error on the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether this error means the byte stream itself is corrupted.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, CodecError::Io(_))
    }
}

/// Comprehensive error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Framing error on a DAP stream
    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    /// Backend process could not be started or reached
    #[error("Failed to launch backend: {reason}")]
    Launch { reason: String },

    /// Remote backend could not be reached
    #[error("Failed to attach to {target}: {reason}")]
    Attach { target: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Helper functions for common error patterns
impl RelayError {
    /// Create a launch error
    pub fn launch(reason: impl Into<String>) -> Self {
        RelayError::Launch {
            reason: reason.into(),
        }
    }

    /// Create an attach error
    pub fn attach(target: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::Attach {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_not_corruption() {
        let err = CodecError::Io(std::io::Error::other("broken pipe"));
        assert!(!err.is_corruption());
    }

    #[test]
    fn framing_errors_are_corruption() {
        assert!(CodecError::MissingContentLength.is_corruption());
        assert!(
            CodecError::UnexpectedEof {
                context: "body"
            }
            .is_corruption()
        );
    }

    #[test]
    fn attach_error_names_target() {
        let err = RelayError::attach("127.0.0.1:5678", "connection refused");
        assert_eq!(
            err.to_string(),
            "Failed to attach to 127.0.0.1:5678: connection refused"
        );
    }

    #[test]
    fn codec_error_converts_into_relay_error() {
        let err: RelayError = CodecError::MissingContentLength.into();
        assert!(matches!(err, RelayError::Codec(_)));
    }
}
