//! Error handling for the token-backed TLS transport
//!
//! Every setup and connect operation reports exactly one of these
//! classifications. A stage classifies its own failure at the point of
//! detection and callers pass it up unchanged.

use thiserror::Error;

/// Transport-level errors returned by connect and setup operations
#[derive(Debug, Error)]
pub enum TlsTransportError {
    /// A required input (hostname, trust anchor) was missing
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Allocation or engine-defaults failure
    #[error("Insufficient memory: {0}")]
    InsufficientMemory(String),

    /// Trust anchor, client certificate or client key could not be used
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The TLS engine rejected the handshake
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The transport could not reach the peer
    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    /// Engine configuration or setup failure not attributable to credentials
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TlsTransportError {
    /// Create an `InvalidParameter` error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create an `InsufficientMemory` error
    pub fn insufficient_memory(msg: impl Into<String>) -> Self {
        Self::InsufficientMemory(msg.into())
    }

    /// Create an `InvalidCredentials` error
    pub fn invalid_credentials(msg: impl Into<String>) -> Self {
        Self::InvalidCredentials(msg.into())
    }

    /// Create a `HandshakeFailed` error
    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }

    /// Create a `ConnectFailure` error
    pub fn connect_failure(msg: impl Into<String>) -> Self {
        Self::ConnectFailure(msg.into())
    }

    /// Create an `InternalError` error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TlsTransportError>;
