//! # Client Error Types
//!
//! Error types for the connection, fetch and reporting layers.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Client Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Connection    │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  ConnectionFail │  │  MalformedMessage       │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │  Validation     │  │  Timeout        │  │  ServerError            │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │      Auth       │  │      Fetch      │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  AuthRejected   │  │  Load           │  │  ChannelError           │ │
//! │  │  (no retry)     │  │  Exhausted      │  │  Database               │ │
//! │  │                 │  │  Aborted        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use civic_core::{CoreError, ValidationError};
use thiserror::Error;

use crate::loader::LoadError;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Client error type covering every failure the data layer can surface.
#[derive(Debug, Error)]
pub enum ClientError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid client configuration.
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// Invalid argument.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// Failed to establish the push connection.
    ///
    /// ## When This Occurs
    /// - Endpoint unreachable or refusing connections
    /// - WebSocket handshake rejected
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport closed unexpectedly.
    #[error("Disconnected from push endpoint")]
    Disconnected,

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Gave up reconnecting.
    #[error("Gave up after {0} reconnect attempts")]
    ReconnectLimit(u32),

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// Server answered the auth message with an error.
    ///
    /// Fatal for the attempt: the manager closes and does not retry.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Frame was not valid JSON, had no `type`, or its fields did not match.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Failed to serialize an outgoing message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Server sent an `error` message while the session was open.
    #[error("Server error: {0}")]
    ServerError(String),

    // =========================================================================
    // Fetch Errors
    // =========================================================================
    /// Pull-side fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Error log storage failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Fetch Error
// =============================================================================

/// Failure of a single `FetchCache::fetch` call.
///
/// `Clone` because deduplicated callers all receive the same outcome.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// The cache key was rejected before any load started.
    #[error("Invalid cache key: {0}")]
    InvalidKey(ValidationError),

    /// Every attempt failed and no stale value could be served.
    #[error("Fetch of '{key}' failed after {attempts} attempts: {last_error}")]
    Exhausted {
        key: String,
        attempts: u32,
        #[source]
        last_error: LoadError,
    },

    /// The caller cancelled the load.
    #[error("Fetch of '{key}' was aborted")]
    Aborted { key: String },
}

impl FetchError {
    /// Returns the underlying load error, if any attempt reached the loader.
    pub fn load_error(&self) -> Option<&LoadError> {
        match self {
            FetchError::Exhausted { last_error, .. } => Some(last_error),
            _ => None,
        }
    }

    /// Returns true if the caller aborted the load.
    pub fn is_aborted(&self) -> bool {
        matches!(self, FetchError::Aborted { .. })
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => ClientError::Validation(v),
            other => ClientError::InvalidConfig(other.to_string()),
        }
    }
}

impl From<civic_db::DbError> for ClientError {
    fn from(err: civic_db::DbError) -> Self {
        ClientError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => ClientError::Disconnected,
            WsError::AlreadyClosed => ClientError::Disconnected,
            WsError::Protocol(p) => ClientError::WebSocketError(p.to_string()),
            WsError::Io(io) => ClientError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => ClientError::TlsError(tls.to_string()),
            other => ClientError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        ClientError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ClientError {
    fn from(err: toml::ser::Error) -> Self {
        ClientError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl ClientError {
    /// Returns true if the connection manager should back off and retry.
    ///
    /// ## Retryable Errors
    /// - Connection failures (network issues)
    /// - Timeouts
    /// - Unexpected closure
    ///
    /// ## Non-Retryable Errors
    /// - Configuration and validation errors
    /// - Auth rejection
    /// - Protocol errors (non-fatal, nothing to retry)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed(_)
                | ClientError::Disconnected
                | ClientError::Timeout(_)
                | ClientError::TlsError(_)
                | ClientError::WebSocketError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidConfig(_)
                | ClientError::InvalidUrl(_)
                | ClientError::Validation(_)
                | ClientError::ConfigLoadFailed(_)
                | ClientError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error indicates a protocol mismatch.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ClientError::MalformedMessage(_)
                | ClientError::SerializationFailed(_)
                | ClientError::ServerError(_)
        )
    }
}
