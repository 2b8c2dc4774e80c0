//! SockJS Rust Client
//!
//! This crate provides a client for the SockJS protocol. A connection is
//! negotiated by trying native WebSocket first and falling back to the
//! XHR-streaming transport; either way the caller gets one
//! [`Connection`] with the same read/write/close interface.
//!
//! ```no_run
//! use sockjs_client::{ ConnectRequest, Transport, sockjs_connect };
//!
//! # async fn run() -> Result<(), sockjs_client::Error> {
//! let conn = sockjs_connect(&ConnectRequest::new("ws://localhost:8080/echo")).await?;
//! conn.write_message("ping").await?;
//! while let Some(message) = conn.read_message().await? {
//!     println!("{}", message);
//! }
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod errors;
pub mod protocol;

// Re-export commonly used items
pub use client::{
    Connection,
    ConnectOptions,
    ConnectRequest,
    ConnectionState,
    Phase,
    Transport,
    TransportKind,
    WebSocketOptions,
    WebSocketTransport,
    XhrStreamingOptions,
    XhrStreamingTransport,
    sockjs_connect,
};
pub use errors::Error;
pub use protocol::Frame;
