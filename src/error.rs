//! Error taxonomy shared by every backend
//!
//! Protocol stacks report failures in wildly different shapes. Everything is funneled
//! into [`FsError`], and listeners only ever see the coarse [`ErrorKind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by listing engines, editors and session pools
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The host name could not be resolved
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// The host resolved but could not be reached
    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Connection timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    /// Target is a do-not-touch system location
    #[error("Protected location: {0}")]
    Protected(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection is closed")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol-agnostic failure classes reported to listing listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unknown,
    FileNotFound,
    NoPermission,
    HostNotFound,
    UnknownHost,
}

impl FsError {
    /// Coarse classification used by `on_listing_fatal_error`
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::UnknownHost(_) => ErrorKind::UnknownHost,
            FsError::HostNotFound(_) | FsError::Timeout(_) | FsError::ConnectionFailed(_) => {
                ErrorKind::HostNotFound
            }
            FsError::FileNotFound(_) => ErrorKind::FileNotFound,
            FsError::PermissionDenied(_) | FsError::Protected(_) => ErrorKind::NoPermission,
            FsError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::NoPermission,
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut => {
                    ErrorKind::HostNotFound
                }
                _ => ErrorKind::Unknown,
            },
            _ => ErrorKind::Unknown,
        }
    }

    /// Authentication failures take the credential-required path instead of the fatal one
    pub fn is_authentication(&self) -> bool {
        matches!(self, FsError::AuthenticationFailed(_))
    }

    /// Whether the connection that produced this error must not be reused
    pub fn poisons_connection(&self) -> bool {
        match self {
            FsError::Disconnected | FsError::Protocol(_) | FsError::ConnectionFailed(_) => true,
            FsError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Classify a transport error string the way remote servers tend to phrase them
    pub fn from_remote_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("no such file") || lower.contains("not found") {
            FsError::FileNotFound(message)
        } else if lower.contains("permission denied") || lower.contains("access denied") {
            FsError::PermissionDenied(message)
        } else if lower.contains("authentication") || lower.contains("login incorrect") {
            FsError::AuthenticationFailed(message)
        } else {
            FsError::Protocol(message)
        }
    }
}

impl Serialize for FsError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type FsResult<T> = Result<T, FsError>;
