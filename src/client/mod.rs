//! SockJS Client Implementation
//!
//! This module provides the transports of the SockJS client and the
//! negotiation that picks one of them for a connection.

pub mod connect;
pub mod transport;

// Re-export key types for easier access
pub use connect::{ ConnectOptions, ConnectRequest, connect_first, sockjs_connect };
pub use transport::state::{ ConnectionState, Phase };
pub use transport::websocket::{ WebSocketOptions, WebSocketTransport };
pub use transport::xhr_streaming::{ XhrStreamingOptions, XhrStreamingTransport };
pub use transport::{ Connection, Transport, TransportKind };
