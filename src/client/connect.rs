//! Transport negotiation
//!
//! [`sockjs_connect`] tries each enabled transport in priority order against
//! the same endpoint and hands back the first one that connects. A failing
//! transport is logged and skipped; only when every candidate failed does
//! the caller see an error, and then exactly one [`Error::Connection`].

use log::{ debug, error, info, warn };
use url::Url;

use crate::client::transport::websocket::{ WebSocketOptions, WebSocketTransport };
use crate::client::transport::xhr_streaming::{ XhrStreamingOptions, XhrStreamingTransport };
use crate::client::transport::{ Connection, TransportKind };
use crate::errors::Error;

/// Options for negotiating a connection
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Transports that may be used. Candidates are always tried in
    /// [`TransportKind::ALL`] order, whatever the order here.
    pub transports: Vec<TransportKind>,
    /// Options for the WebSocket transport
    pub websocket: WebSocketOptions,
    /// Options for the XHR-streaming transport
    pub xhr_streaming: XhrStreamingOptions,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            transports: TransportKind::ALL.to_vec(),
            websocket: WebSocketOptions::default(),
            xhr_streaming: XhrStreamingOptions::default(),
        }
    }
}

/// Target of a negotiation: the SockJS endpoint URL plus transport options
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    /// Endpoint URL, `ws`, `wss`, `http` or `https`
    pub url: String,
    /// Transport options
    pub options: ConnectOptions,
}

impl ConnectRequest {
    /// Create a request with default options
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_options(url, ConnectOptions::default())
    }

    /// Create a request with custom options
    pub fn with_options(url: impl Into<String>, options: ConnectOptions) -> Self {
        Self { url: url.into(), options }
    }

    /// Restrict the transports that may be used
    pub fn transports(mut self, transports: Vec<TransportKind>) -> Self {
        self.options.transports = transports;
        self
    }

    /// Enabled transports in priority order
    pub fn enabled_transports(&self) -> Vec<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .filter(|kind| self.options.transports.contains(kind))
            .collect()
    }

    /// Build an unconnected transport of the given kind for this request
    pub fn build_transport(&self, kind: TransportKind, url: &Url) -> Result<Connection, Error> {
        let transport: Connection = match kind {
            TransportKind::Websocket => {
                Box::new(WebSocketTransport::with_options(url, self.options.websocket.clone())?)
            }
            TransportKind::XhrStreaming => {
                Box::new(
                    XhrStreamingTransport::with_options(url, self.options.xhr_streaming.clone())?
                )
            }
        };
        Ok(transport)
    }
}

impl From<&str> for ConnectRequest {
    fn from(url: &str) -> Self {
        ConnectRequest::new(url)
    }
}

/// Connect to a SockJS endpoint with the first transport that works.
///
/// Each candidate is constructed right before it is tried, so every attempt
/// gets a fresh session identity.
pub async fn sockjs_connect(request: &ConnectRequest) -> Result<Connection, Error> {
    let url = match Url::parse(&request.url) {
        Ok(url) => url,
        Err(e) => {
            warn!("Invalid SockJS URL {}: {}", request.url, e);
            return Err(Error::Connection { url: request.url.clone() });
        }
    };

    let candidates = request
        .enabled_transports()
        .into_iter()
        .map(|kind| request.build_transport(kind, &url));

    connect_first(&request.url, candidates).await
}

/// Try candidates in order and return the first that connects.
///
/// A candidate that fails to build or to connect is logged, closed and
/// skipped. Candidates after the winning one are never constructed.
pub async fn connect_first<I>(url: &str, candidates: I) -> Result<Connection, Error>
    where I: IntoIterator<Item = Result<Connection, Error>>
{
    for candidate in candidates {
        let mut transport = match candidate {
            Ok(transport) => transport,
            Err(e) => {
                error!("Unable to create transport for {}: {}", url, e);
                continue;
            }
        };

        let kind = transport.kind();
        match transport.connect().await {
            Ok(()) => {
                info!("Connected with {}", kind);
                return Ok(transport);
            }
            Err(e) if e.is_connect_failure() => {
                debug!("Unable to connect using {}: {}", kind, e);
            }
            Err(e) => {
                error!("Uncaught error connecting with {}: {}", kind, e);
            }
        }

        if let Err(e) = transport.close().await {
            debug!("Error releasing {} candidate: {}", kind, e);
        }
    }

    Err(Error::Connection { url: url.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::Transport;
    use crate::client::transport::state::{ ConnectionState, ConnectionStateChannel };
    use async_trait::async_trait;
    use std::sync::{ Arc, Mutex };
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Outcome {
        Succeed,
        Refuse,
        Garbage,
    }

    /// Records every call made on a mock transport
    #[derive(Default, Clone)]
    struct CallLog(Arc<Mutex<Vec<String>>>);

    impl CallLog {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct MockTransport {
        kind: TransportKind,
        outcome: Outcome,
        log: CallLog,
        state: ConnectionStateChannel,
    }

    impl MockTransport {
        fn boxed(kind: TransportKind, outcome: Outcome, log: &CallLog) -> Result<Connection, Error> {
            log.push(format!("build {}", kind));
            let transport: Connection = Box::new(MockTransport {
                kind,
                outcome,
                log: log.clone(),
                state: ConnectionStateChannel::new(),
            });
            Ok(transport)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn connect(&mut self) -> Result<(), Error> {
            self.log.push(format!("connect {}", self.kind));
            match self.outcome {
                Outcome::Succeed => {
                    self.state.open();
                    Ok(())
                }
                Outcome::Refuse => Err(Error::transport_connect(self.kind.name(), "refused")),
                Outcome::Garbage => Err(Error::InvalidState("unexpected".to_string())),
            }
        }

        async fn read_message(&self) -> Result<Option<String>, Error> {
            Ok(None)
        }

        async fn write_message(&self, _payload: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn close(&self) -> Result<(), Error> {
            self.log.push(format!("close {}", self.kind));
            self.state.close();
            Ok(())
        }

        fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
            self.state.receiver()
        }
    }

    const URL: &str = "ws://localhost:8080/echo";

    #[tokio::test]
    async fn test_falls_back_to_second_transport() {
        let log = CallLog::default();
        let candidates = vec![
            MockTransport::boxed(TransportKind::Websocket, Outcome::Refuse, &log),
            MockTransport::boxed(TransportKind::XhrStreaming, Outcome::Succeed, &log)
        ];

        let conn = connect_first(URL, candidates).await.unwrap();
        assert_eq!(conn.kind(), TransportKind::XhrStreaming);
        assert!(conn.subscribe_state().borrow().is_open());
        assert_eq!(
            log.entries(),
            vec![
                "build websocket",
                "build xhr-streaming",
                "connect websocket",
                "close websocket",
                "connect xhr-streaming"
            ]
        );
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let log = CallLog::default();
        let candidates = [TransportKind::Websocket, TransportKind::XhrStreaming]
            .into_iter()
            .map(|kind| MockTransport::boxed(kind, Outcome::Succeed, &log));

        let conn = connect_first(URL, candidates).await.unwrap();
        assert_eq!(conn.kind(), TransportKind::Websocket);
        // the lower priority candidate is never even built
        assert_eq!(log.entries(), vec!["build websocket", "connect websocket"]);
    }

    #[tokio::test]
    async fn test_all_failing_is_one_aggregate_error() {
        let log = CallLog::default();
        let candidates = vec![
            MockTransport::boxed(TransportKind::Websocket, Outcome::Garbage, &log),
            Err(Error::InvalidUrl("bad".to_string())),
            MockTransport::boxed(TransportKind::XhrStreaming, Outcome::Refuse, &log)
        ];

        match connect_first(URL, candidates).await {
            Err(Error::Connection { url }) => assert_eq!(url, URL),
            other => panic!("expected aggregate error, got {:?}", other.err()),
        }
        assert!(log.entries().contains(&"close websocket".to_string()));
        assert!(log.entries().contains(&"close xhr-streaming".to_string()));
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let candidates: Vec<Result<Connection, Error>> = Vec::new();
        assert!(matches!(connect_first(URL, candidates).await, Err(Error::Connection { .. })));
    }

    #[test]
    fn test_enabled_transports_keep_priority_order() {
        let request = ConnectRequest::new(URL).transports(
            vec![TransportKind::XhrStreaming, TransportKind::Websocket]
        );
        assert_eq!(request.enabled_transports(), TransportKind::ALL.to_vec());

        let request = ConnectRequest::new(URL).transports(vec![TransportKind::XhrStreaming]);
        assert_eq!(request.enabled_transports(), vec![TransportKind::XhrStreaming]);
    }

    #[tokio::test]
    async fn test_sockjs_connect_invalid_url() {
        let request = ConnectRequest::new("not a url");
        match sockjs_connect(&request).await {
            Err(Error::Connection { url }) => assert_eq!(url, "not a url"),
            other => panic!("expected aggregate error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_sockjs_connect_unsupported_scheme() {
        let request = ConnectRequest::new("ftp://localhost/echo");
        assert!(matches!(sockjs_connect(&request).await, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn test_sockjs_connect_nothing_listening() {
        let mut options = ConnectOptions::default();
        options.websocket.connection_timeout = Duration::from_secs(2);
        options.xhr_streaming.connect_timeout = Duration::from_secs(2);
        let request = ConnectRequest::with_options("ws://127.0.0.1:9/echo", options);

        match sockjs_connect(&request).await {
            Err(Error::Connection { url }) => assert_eq!(url, "ws://127.0.0.1:9/echo"),
            other => panic!("expected aggregate error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_sockjs_connect_with_no_transports() {
        let request = ConnectRequest::new(URL).transports(Vec::new());
        assert!(matches!(sockjs_connect(&request).await, Err(Error::Connection { .. })));
    }
}
