//! SockJS wire protocol
//!
//! Frame decoding and the session URL layout shared by all transports.

pub mod frame;
pub mod session;

pub use frame::{ Frame, encode_message };
pub use session::SessionId;
