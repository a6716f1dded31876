//! Error types for the reflector
//!
//! The guiding policy is containment: a fault caused by one session is
//! handled by closing or penalizing that session and must never take down
//! the server or affect other sessions.

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed frame, unexpected message in the current state, or a bad
    /// client binding. The offending session is closed.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Bad HMAC digest or unknown callsign
    #[error("access denied")]
    AuthFailure,

    /// Peer vanished or the connection was reset
    #[error("transport loss: {0}")]
    TransportLoss(String),

    /// Session-id pool exhausted or no free talkgroup available
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// The voice classifier produced unusable output
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Illegal configuration value
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Wire codec failure
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while packing or unpacking wire messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Message body ended before the advertised field length
    #[error("truncated message")]
    Truncated,

    /// A length-prefixed string was not valid UTF-8
    #[error("invalid string encoding")]
    InvalidString,

    /// A frame exceeded the configured maximum size
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// A field carried a value outside its legal range
    #[error("invalid field value: {0}")]
    InvalidValue(String),
}
