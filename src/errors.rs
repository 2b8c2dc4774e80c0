//! SockJS Client Error Types
//!
//! This module defines the error type shared by the frame decoder, the
//! transports and the negotiator. Only [`Error::Connection`] is expected to
//! reach application code; every other variant is absorbed by the transport
//! or negotiation layer and logged.

use thiserror::Error;

/// The main Error type for the SockJS client
#[derive(Error, Debug)]
pub enum Error {
    /// A single transport failed its handshake (bad status, refused
    /// connection, DNS failure, timeout). The negotiator recovers from this
    /// by trying the next candidate.
    #[error("{transport} transport failed to connect: {reason}")]
    TransportConnect {
        /// Name of the transport that failed
        transport: &'static str,
        /// Human readable cause
        reason: String,
    },

    /// Every candidate transport failed
    #[error("Unable to connect to {url}")]
    Connection {
        /// The target URL of the failed negotiation
        url: String,
    },

    /// A line from the stream could not be decoded as a SockJS frame
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket client errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The request descriptor could not be turned into a transport URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid state for requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A bounded operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Build a [`Error::TransportConnect`] for the named transport
    pub fn transport_connect(transport: &'static str, reason: impl Into<String>) -> Self {
        Error::TransportConnect {
            transport,
            reason: reason.into(),
        }
    }

    /// Whether this error is an expected handshake failure of a single
    /// transport, as opposed to an uncategorised error.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Error::TransportConnect { .. }
                | Error::Http(_)
                | Error::WebSocket(_)
                | Error::Io(_)
                | Error::Timeout(_)
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}
