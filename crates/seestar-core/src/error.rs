//! Error types for the Seestar client, grouped by layer

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Client error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Event Channel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Malformed event envelope: {reason}")]
    MalformedEnvelope { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Frame Codec Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Frame header needs {expected} bytes, got {actual}")]
    HeaderTooShort { expected: usize, actual: usize },

    #[error("Bad frame magic: 0x{found:04X}")]
    BadMagic { found: u16 },

    #[error("Unsupported frame type: {0}")]
    UnsupportedFrameType(u8),

    #[error("Frame has zero dimension: {width}x{height}")]
    ZeroDimension { width: u16, height: u16 },

    #[error("Truncated payload: expected {expected} bytes, got {actual}")]
    TruncatedPayload { expected: usize, actual: usize },

    #[error("Archive local-file header not found in payload")]
    ArchiveNotFound,

    #[error("Unsupported archive compression method: {method}")]
    UnsupportedCompression { method: u16 },

    #[error("Inflate failed: {reason}")]
    Inflate { reason: String },

    #[error("Decompressed {actual} bytes, expected {expected}")]
    DecompressionSizeMismatch { expected: usize, actual: usize },

    #[error("Frame payload of {length} bytes exceeds limit of {limit}")]
    PayloadTooLarge { length: usize, limit: usize },

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailure { addr: String, reason: String },

    #[error("No traffic from device for {waited:?}")]
    HeartbeatTimeout { waited: Duration },

    #[error("Connection closed by device")]
    ConnectionClosed,

    #[error("Gave up after {attempts} reconnection attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Connection was closed")]
    Closed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    pub fn inflate(reason: impl Into<String>) -> Self {
        Self::Inflate {
            reason: reason.into(),
        }
    }

    pub fn connect_failure(addr: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ConnectFailure {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    /// Per-message errors: the offending envelope or frame is dropped and
    /// the read loop carries on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedEnvelope { .. }
                | Error::Json(_)
                | Error::HeaderTooShort { .. }
                | Error::BadMagic { .. }
                | Error::UnsupportedFrameType(_)
                | Error::ZeroDimension { .. }
                | Error::TruncatedPayload { .. }
                | Error::ArchiveNotFound
                | Error::UnsupportedCompression { .. }
                | Error::Inflate { .. }
                | Error::DecompressionSizeMismatch { .. }
                | Error::PayloadTooLarge { .. }
        )
    }

    /// Connection-level errors that end a session and call for a reconnect.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectFailure { .. }
                | Error::HeartbeatTimeout { .. }
                | Error::ConnectionClosed
        )
    }

    /// Check if this error is terminal for the owning connection
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. } | Error::Closed)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
