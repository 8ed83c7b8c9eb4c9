use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// WebSocket close codes sent to clients.
pub mod close_code {
    pub const MISSING_IDENTITY: u16 = 4000;
    pub const UNKNOWN_IDENTITY: u16 = 4001;
    pub const INACTIVE_IDENTITY: u16 = 4002;
    pub const NO_PERMISSIONS: u16 = 4003;
    pub const AUTH_INTERNAL: u16 = 4004;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Authentication failures. Always fatal to the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing device identity")]
    MissingIdentity,

    #[error("unknown device: {0}")]
    UnknownIdentity(String),

    #[error("device is not active: {0}")]
    InactiveIdentity(String),

    #[error("device has no permissions: {0}")]
    NoPermissions(String),

    #[error("api key rejected for device: {0}")]
    InvalidKey(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("authentication failed: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::MissingIdentity => close_code::MISSING_IDENTITY,
            AuthError::UnknownIdentity(_) => close_code::UNKNOWN_IDENTITY,
            AuthError::InactiveIdentity(_) => close_code::INACTIVE_IDENTITY,
            AuthError::NoPermissions(_) => close_code::NO_PERMISSIONS,
            AuthError::Internal(_) => close_code::AUTH_INTERNAL,
            AuthError::InvalidKey(_) | AuthError::PermissionDenied(_) => {
                close_code::POLICY_VIOLATION
            }
        }
    }

    /// Short reason for the close frame; never echoes the token.
    pub fn close_reason(&self) -> &'static str {
        match self {
            AuthError::MissingIdentity => "missing device id",
            AuthError::UnknownIdentity(_) => "unknown device",
            AuthError::InactiveIdentity(_) => "device inactive",
            AuthError::NoPermissions(_) => "no permissions",
            AuthError::InvalidKey(_) => "invalid api key",
            AuthError::PermissionDenied(_) => "permission denied",
            AuthError::Internal(_) => "authentication error",
        }
    }
}

/// The generation backend failed or stalled mid-reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation backend error: {0}")]
    Backend(String),

    #[error("generation stalled for {0:?}")]
    Timeout(Duration),
}

/// Synthesis failed for one sentence; the sentence is skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("synthesis failed for {sentence:?}: {message}")]
    Backend { sentence: String, message: String },

    #[error("synthesis of {sentence:?} timed out after {timeout:?}")]
    Timeout { sentence: String, timeout: Duration },
}

impl SynthesisError {
    pub fn sentence(&self) -> &str {
        match self {
            SynthesisError::Backend { sentence, .. } | SynthesisError::Timeout { sentence, .. } => {
                sentence
            }
        }
    }
}

/// Speech input could not be turned into an utterance; the turn is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("recognition backend error: {0}")]
    Backend(String),

    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("no speech recognized")]
    Empty,
}

/// A client frame the session could not act on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message carries neither role nor text")]
    Empty,

    #[error("binary frames are not accepted: speech input is disabled")]
    UnexpectedBinary,

    #[error("invalid utterance: {0}")]
    InvalidUtterance(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Io(String),
}

/// Category of a recoverable error reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Generation,
    Synthesis,
    Recognition,
    Protocol,
}

impl From<&GenerationError> for NoticeKind {
    fn from(_: &GenerationError) -> Self {
        NoticeKind::Generation
    }
}

impl From<&SynthesisError> for NoticeKind {
    fn from(_: &SynthesisError) -> Self {
        NoticeKind::Synthesis
    }
}

impl From<&RecognitionError> for NoticeKind {
    fn from(_: &RecognitionError) -> Self {
        NoticeKind::Recognition
    }
}

impl From<&ProtocolError> for NoticeKind {
    fn from(_: &ProtocolError) -> Self {
        NoticeKind::Protocol
    }
}
