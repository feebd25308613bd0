//! Error types
//!
//! Construction-time failures surface through [`Error`]. Failures inside a
//! running producer or publisher loop are logged and turned into blank or
//! error frames instead of being returned.

use std::fmt;

/// Error type returned by user callbacks (modifiers, subscribers, generators)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error type
#[derive(Debug)]
pub enum Error {
    /// Bad constructor arguments (non-positive rate, zero dimensions, ...)
    InvalidConfiguration(String),
    /// A source (file, camera, URL) could not be opened
    SourceUnavailable { source: String, reason: String },
    /// A frame's size disagrees with the declared dimensions
    FrameSizeMismatch { expected: usize, actual: usize },
    /// Route or namespace already registered, or uses the reserved prefix
    RouteConflict(String),
    /// Managed stream name already used
    NameConflict(String),
    /// Managed stream not found
    StreamNotFound(String),
    /// Protocol id not known to the protocol registry
    UnsupportedProtocol(String),
    /// Sync exchange with a remote hub failed
    Sync(String),
    /// Image encode/decode/resize failure
    Codec(String),
    /// A user-supplied generator failed
    Callback(BoxError),
    /// I/O error
    Io(std::io::Error),
    /// HTTP client error
    Http(reqwest::Error),
    /// WebSocket client error
    WebSocket(tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Short name of the error kind, used for on-frame diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "InvalidConfiguration",
            Error::SourceUnavailable { .. } => "SourceUnavailable",
            Error::FrameSizeMismatch { .. } => "FrameSizeMismatch",
            Error::RouteConflict(_) => "RouteConflict",
            Error::NameConflict(_) => "NameConflict",
            Error::StreamNotFound(_) => "StreamNotFound",
            Error::UnsupportedProtocol(_) => "UnsupportedProtocol",
            Error::Sync(_) => "SyncError",
            Error::Codec(_) => "CodecError",
            Error::Callback(_) => "CallbackError",
            Error::Io(_) => "IoError",
            Error::Http(_) => "HttpError",
            Error::WebSocket(_) => "WebSocketError",
        }
    }

    pub(crate) fn source_unavailable(source: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::SourceUnavailable {
            source: source.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::SourceUnavailable { source, reason } => {
                write!(f, "Source unavailable: {} ({})", source, reason)
            }
            Error::FrameSizeMismatch { expected, actual } => write!(
                f,
                "Frame size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            Error::RouteConflict(route) => write!(f, "Route conflict: {}", route),
            Error::NameConflict(name) => write!(f, "Name {} is already used", name),
            Error::StreamNotFound(name) => write!(f, "Stream not found: {}", name),
            Error::UnsupportedProtocol(proto) => write!(f, "Unsupported protocol: {}", proto),
            Error::Sync(msg) => write!(f, "Sync failed: {}", msg),
            Error::Codec(msg) => write!(f, "Codec error: {}", msg),
            Error::Callback(e) => write!(f, "Callback failed: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Callback(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_frame_size_mismatch() {
        let err = Error::FrameSizeMismatch {
            expected: 9216,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "Frame size mismatch: expected 9216 bytes, got 10"
        );
        assert_eq!(err.kind(), "FrameSizeMismatch");
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
