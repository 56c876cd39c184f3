//! Error types for the shop-link client.

use thiserror::Error;

/// Errors produced by the shop-link connectivity layer.
///
/// Transport and HTTP failures are normally caught inside the connection
/// manager and polling service and surfaced as events; these variants appear
/// on the public API only for configuration and serialization problems, or
/// when a caller drives an operation directly.
#[derive(Error, Debug)]
pub enum ShopLinkError {
    /// WebSocket transport or protocol failure.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Authentication handshake rejected or credentials unavailable.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// An operation exceeded its configured timeout.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// Invalid or missing client configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// HTTP transport failure from the polling fallback.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize or parse a JSON payload.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Server returned a non-success status for a polling request.
    #[error("Server error ({status_code}): {message}")]
    ServerError {
        /// HTTP status code returned by the server.
        status_code: u16,
        /// Error message extracted from the response body.
        message: String,
    },
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShopLinkError>;
