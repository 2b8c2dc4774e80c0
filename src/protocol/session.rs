//! Session identity and URL layout
//!
//! A SockJS session is addressed as `{endpoint}/{server_id}/{session_id}`,
//! with the transport name appended as the last path segment.

use url::Url;
use uuid::Uuid;

use crate::errors::Error;

/// Length of the numeric server id segment
pub const SERVER_ID_LEN: usize = 5;
/// Length of the alphanumeric session id segment
pub const SESSION_ID_LEN: usize = 8;

const SESSION_ID_ALPHABET: &[u8; 62] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// The (server id, session id) pair identifying one connection.
///
/// Generated once per transport instance and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId {
    server_id: String,
    session_id: String,
}

impl SessionId {
    /// Generate a fresh identity
    pub fn generate() -> Self {
        let server = Uuid::new_v4().as_u128() % 10u128.pow(SERVER_ID_LEN as u32);
        // Random bytes of a v4 uuid, folded onto [a-zA-Z0-9]
        let session = Uuid::new_v4()
            .as_bytes()
            .iter()
            .take(SESSION_ID_LEN)
            .map(|byte| SESSION_ID_ALPHABET[usize::from(*byte) % SESSION_ID_ALPHABET.len()] as char)
            .collect();

        Self {
            server_id: format!("{:0width$}", server, width = SERVER_ID_LEN),
            session_id: session,
        }
    }

    /// The numeric server id segment
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The alphanumeric session id segment
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Build `{endpoint}/{server_id}/{session_id}/{transport}` on top of the
    /// given endpoint, keeping its scheme, host and port. Query and fragment
    /// are dropped.
    pub fn transport_url(&self, endpoint: &Url, transport: &str) -> Result<Url, Error> {
        let mut url = endpoint.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(format!("{} cannot be a base URL", endpoint)))?
            .pop_if_empty()
            .extend([self.server_id.as_str(), self.session_id.as_str(), transport]);
        Ok(url)
    }
}

/// Rewrite the scheme of a target URL for a transport.
///
/// `secure_scheme`/`plain_scheme` are the pair the transport speaks
/// (`("https", "http")` or `("wss", "ws")`); whether the input
/// URL is secure decides which of the two is used.
pub fn with_scheme(url: &Url, plain_scheme: &str, secure_scheme: &str) -> Result<Url, Error> {
    let secure = match url.scheme() {
        "ws" | "http" => false,
        "wss" | "https" => true,
        other => {
            return Err(Error::InvalidUrl(format!("unsupported scheme '{}' in {}", other, url)));
        }
    };
    let scheme = if secure { secure_scheme } else { plain_scheme };

    // Url::set_scheme refuses ws -> http style switches, so rebuild from text
    let rest = &url.as_str()[url.scheme().len()..];
    Ok(Url::parse(&format!("{}{}", scheme, rest))?)
}
