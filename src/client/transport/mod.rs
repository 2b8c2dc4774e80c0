//! Transport module for SockJS communication
//!
//! This module defines the Transport trait every SockJS transport satisfies,
//! and the WebSocket and XHR-streaming implementations of it.
pub mod inbound;
pub mod state;
pub mod websocket;
pub mod xhr_streaming;

use std::fmt;

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use tokio::sync::watch;

use crate::client::transport::state::ConnectionState;
use crate::errors::Error;

/// The transports this client can negotiate, in priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Native WebSocket
    Websocket,
    /// Streaming HTTP response for reads, one POST per write
    XhrStreaming,
}

impl TransportKind {
    /// Every transport, highest priority first
    pub const ALL: [TransportKind; 2] = [TransportKind::Websocket, TransportKind::XhrStreaming];

    /// Name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Websocket => "websocket",
            TransportKind::XhrStreaming => "xhr-streaming",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A live, transport-agnostic SockJS connection
pub type Connection = Box<dyn Transport>;

/// Transport trait for the different SockJS wire mechanisms
///
/// A transport is created unconnected, `connect` is attempted once, and the
/// connection then stays open until `close` is called or the server ends
/// the session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which transport this is
    fn kind(&self) -> TransportKind;

    /// Perform the transport handshake.
    ///
    /// Fails with [`Error::TransportConnect`] (or a lower-level network
    /// error) without leaving anything running.
    async fn connect(&mut self) -> Result<(), Error>;

    /// Wait for the next message from the server.
    ///
    /// `Ok(None)` signals end of channel, and keeps being returned on
    /// every later call.
    async fn read_message(&self) -> Result<Option<String>, Error>;

    /// Send one message to the server.
    ///
    /// Delivery failures are logged, not returned; an error means the
    /// connection is not open.
    async fn write_message(&self, payload: &str) -> Result<(), Error>;

    /// Release the connection. Safe to call any number of times, also on a
    /// transport that never connected.
    async fn close(&self) -> Result<(), Error>;

    /// Get a receiver for connection state updates
    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;
}
