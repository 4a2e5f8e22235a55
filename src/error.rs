//! # Error Handling
//!
//! This module defines the error taxonomy of the media pipeline and how foreign
//! errors (socket, JSON, base64, image, configuration) are folded into it.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces you to handle both success and failure cases
//! - **No exceptions**: A failed device open or socket connect is a value, not a throw
//!
//! ### Enums for Error Types
//! - **Variants**: Each variant is one category of failure with its own recovery policy
//! - **Pattern matching**: The session matches on the variant to decide whether to
//!   tear down (media/connection) or log and carry on (decode/playback)
//!
//! ### Traits for Error Conversion
//! - **From trait**: Lets `?` convert library errors into our categories
//! - **Display trait**: Human-readable messages for the UI log
//!
//! ## Recovery policy:
//! | Variant       | Effect on the session                          |
//! |---------------|------------------------------------------------|
//! | `MediaAccess` | fatal to session start, surfaced, no retry     |
//! | `Connection`  | surfaced, full teardown, no reconnect          |
//! | `Decode`      | logged, the single message is dropped          |
//! | `Playback`    | logged, the unit is skipped                    |
//! | `Config`      | fatal before any session starts                |

use std::fmt;

/// Errors produced anywhere in the capture → transport → playback pipeline.
///
/// ## Usage Example:
/// ```rust
/// use live_media_client::error::PipelineError;
/// let err = PipelineError::Decode("audio field is not valid base64".to_string());
/// assert!(err.is_recoverable());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Permission denied or device unavailable (microphone, camera, speaker)
    MediaAccess(String),

    /// Socket failed to open or closed unexpectedly
    Connection(String),

    /// Malformed inbound envelope or payload
    Decode(String),

    /// Output device rejected a scheduled unit
    Playback(String),

    /// Configuration file or environment variable problems
    Config(String),
}

impl PipelineError {
    /// Whether the session keeps running after this error.
    ///
    /// Decode and playback errors only cost one message or one unit; everything
    /// else ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Decode(_) | PipelineError::Playback(_))
    }

    /// Short machine-readable category, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MediaAccess(_) => "media_access_error",
            PipelineError::Connection(_) => "connection_error",
            PipelineError::Decode(_) => "decode_error",
            PipelineError::Playback(_) => "playback_error",
            PipelineError::Config(_) => "config_error",
        }
    }
}

/// Implementation of the Display trait for PipelineError.
///
/// ## Rust Concepts:
/// - **impl Trait for Type**: Implementing a trait for our custom type
/// - **match**: Pattern matching to handle each error variant
/// - **write!**: Macro for formatting strings
impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::MediaAccess(msg) => write!(f, "Media access error: {}", msg),
            PipelineError::Connection(msg) => write!(f, "Connection error: {}", msg),
            PipelineError::Decode(msg) => write!(f, "Decode error: {}", msg),
            PipelineError::Playback(msg) => write!(f, "Playback error: {}", msg),
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Inbound JSON that does not parse is a malformed envelope.
impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Decode(format!("JSON parsing error: {}", err))
    }
}

/// An `audio` field that is not valid base64 is a malformed envelope.
impl From<base64::DecodeError> for PipelineError {
    fn from(err: base64::DecodeError) -> Self {
        PipelineError::Decode(format!("base64 error: {}", err))
    }
}

/// Every socket-level failure is a connection failure; there is no partial recovery.
impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        PipelineError::Connection(err.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

/// Image failures come from opening the camera stand-in or from JPEG encoding.
impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::MediaAccess(format!("image error: {}", err))
    }
}

/// A rate pair the resampler cannot be built for is a device the pipeline cannot use.
impl From<rubato::ResamplerConstructionError> for PipelineError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        PipelineError::MediaAccess(format!("resampler error: {}", err))
    }
}

impl From<rubato::ResampleError> for PipelineError {
    fn from(err: rubato::ResampleError) -> Self {
        PipelineError::Playback(format!("resampling failed: {}", err))
    }
}

/// File-backed devices report I/O failures as media access failures.
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::MediaAccess(err.to_string())
    }
}

/// Type alias for Results that use the pipeline error type.
///
/// ## Rust Concepts:
/// - **type alias**: Creates a new name for an existing type
/// - **Generic type**: `T` can be any type
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_categories() {
        assert!(PipelineError::Decode("x".into()).is_recoverable());
        assert!(PipelineError::Playback("x".into()).is_recoverable());
        assert!(!PipelineError::Connection("x".into()).is_recoverable());
        assert!(!PipelineError::MediaAccess("x".into()).is_recoverable());
    }

    #[test]
    fn test_json_error_becomes_decode_error() {
        let err: PipelineError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "decode_error");
        assert!(err.to_string().starts_with("Decode error: JSON parsing error"));
    }
}
