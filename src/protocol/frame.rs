//! SockJS frame decoding
//!
//! Every line of a streaming response body (and every WebSocket text
//! message) carries exactly one frame. The first byte selects the kind:
//!
//! | byte | frame |
//! |------|-------|
//! | `o`  | open |
//! | `h`  | heartbeat |
//! | `c`  | close, followed by `[code, "reason"]` |
//! | `a`  | message batch, followed by a JSON array |
//! | `m`  | legacy single message, followed by one JSON value |

use serde_json::Value;

use crate::errors::Error;

/// One decoded SockJS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Session opened by the server
    Open,
    /// Keep-alive
    Heartbeat,
    /// Server closed the session
    Close {
        /// Close code, `0` if the server sent an unreadable close frame
        code: u32,
        /// Close reason
        reason: String,
    },
    /// An `a` frame: messages in server order
    Message(Vec<String>),
    /// An `m` frame: one message
    LegacyMessage(String),
}

impl Frame {
    /// Decode one line into a frame.
    ///
    /// Trailing `\r`/`\n` are ignored. Anything after the marker byte of an
    /// `o` or `h` frame is ignored too, which lets the 2KiB `hhh…` prelude
    /// some servers send decode as a heartbeat.
    pub fn decode(line: &[u8]) -> Result<Frame, Error> {
        let line = trim_line_end(line);
        let (marker, body) = match line.split_first() {
            Some((marker, body)) => (*marker, body),
            None => {
                return Err(Error::MalformedFrame("empty line".to_string()));
            }
        };

        match marker {
            b'o' => Ok(Frame::Open),
            b'h' => Ok(Frame::Heartbeat),
            b'c' => Ok(decode_close(body)),
            b'a' => {
                let values: Vec<Value> = serde_json::from_slice(body).map_err(|e| {
                    Error::MalformedFrame(format!("invalid message array: {}", e))
                })?;
                Ok(Frame::Message(values.into_iter().map(payload_text).collect()))
            }
            b'm' => {
                let value: Value = serde_json::from_slice(body).map_err(|e| {
                    Error::MalformedFrame(format!("invalid legacy message: {}", e))
                })?;
                Ok(Frame::LegacyMessage(payload_text(value)))
            }
            other => Err(Error::MalformedFrame(format!("unknown frame type {:?}", other as char))),
        }
    }

    /// Application payloads carried by this frame, in delivery order
    pub fn into_payloads(self) -> Vec<String> {
        match self {
            Frame::Message(payloads) => payloads,
            Frame::LegacyMessage(payload) => vec![payload],
            _ => Vec::new(),
        }
    }
}

/// Encode one outgoing message as a client frame: a one-element JSON array.
pub fn encode_message(payload: &str) -> Result<String, Error> {
    Ok(serde_json::to_string(&[payload])?)
}

fn decode_close(body: &[u8]) -> Frame {
    match serde_json::from_slice::<(u32, String)>(body) {
        Ok((code, reason)) => Frame::Close { code, reason },
        Err(e) => {
            tracing::debug!("Unreadable close frame, using default: {}", e);
            Frame::Close {
                code: 0,
                reason: String::new(),
            }
        }
    }
}

/// Strings are delivered as-is, other JSON values as their JSON text
fn payload_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let Some((last, rest)) = line.split_last() {
        if *last == b'\n' || *last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line
}
