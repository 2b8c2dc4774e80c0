//! WebSocket Transport
//!
//! This module adapts a native WebSocket connection to the [`Transport`]
//! trait. The socket is opened on the session's `/websocket` URL; every text
//! message the server sends is one SockJS frame and goes through the same
//! decoding and queueing as the XHR-streaming transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{ SplitSink, SplitStream };
use futures::{ SinkExt, StreamExt };
use tokio::net::TcpStream;
use tokio::sync::{ Mutex, watch };
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{ MaybeTlsStream, WebSocketStream, connect_async };
use url::Url;

use crate::client::transport::inbound::{ self, DEFAULT_QUEUE_CAPACITY, InboundQueue, InboundSender };
use crate::client::transport::state::{ ConnectionState, ConnectionStateChannel, Phase };
use crate::client::transport::{ Transport, TransportKind };
use crate::errors::Error;
use crate::protocol::frame::encode_message;
use crate::protocol::session::{ SessionId, with_scheme };

/// Default connection timeout
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on a single write
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const NAME: &str = "websocket";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport options
#[derive(Debug, Clone)]
pub struct WebSocketOptions {
    /// Connection timeout
    pub connection_timeout: Duration,
    /// Bound on one outgoing message
    pub write_timeout: Duration,
    /// Capacity of the inbound message queue
    pub queue_capacity: usize,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// WebSocket transport for SockJS
pub struct WebSocketTransport {
    /// The session's WebSocket URL
    url: Url,
    /// WebSocket options
    options: WebSocketOptions,
    /// Observable connection state
    state: ConnectionStateChannel,
    /// Producer half of the inbound queue, moved into the receiver task
    sender: Option<InboundSender>,
    /// Consumer half of the inbound queue
    queue: InboundQueue,
    /// Write half of the socket
    sink: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    /// Receiver task
    receiver_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Create a new, unconnected WebSocket transport with default options
    pub fn new(url: &Url) -> Result<Self, Error> {
        Self::with_options(url, WebSocketOptions::default())
    }

    /// Create a new, unconnected WebSocket transport with custom options
    pub fn with_options(url: &Url, options: WebSocketOptions) -> Result<Self, Error> {
        let endpoint = with_scheme(url, "ws", "wss")?;
        let url = SessionId::generate().transport_url(&endpoint, "websocket")?;

        let state = ConnectionStateChannel::new();
        let (sender, queue) = inbound::channel(options.queue_capacity, state.clone());

        Ok(Self {
            url,
            options,
            state,
            sender: Some(sender),
            queue,
            sink: Mutex::new(None),
            receiver_task: Mutex::new(None),
        })
    }

    /// The URL the socket connects to
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn connect_failed(&self, reason: String) -> Error {
        tracing::debug!("WebSocket connect to {} failed: {}", self.url, reason);
        self.queue.end();
        self.state.close();
        Error::transport_connect(NAME, reason)
    }

    async fn run_receiver(
        mut ws_receiver: SplitStream<WsStream>,
        mut sender: InboundSender,
        state: ConnectionStateChannel
    ) {
        tracing::info!("Starting WebSocket receiver task");
        while let Some(result) = ws_receiver.next().await {
            let flow = match result {
                Ok(WsMessage::Text(text)) => sender.dispatch(text.as_bytes()).await,
                Ok(WsMessage::Binary(data)) => sender.dispatch(&data).await,
                Ok(WsMessage::Close(frame)) => {
                    tracing::info!("WebSocket closed by server: {:?}", frame);
                    break;
                }
                Ok(_) => {
                    continue;
                }
                Err(e) => {
                    tracing::error!("WebSocket receiver error: {}", e);
                    break;
                }
            };
            if flow.is_break() {
                break;
            }
        }

        drop(ws_receiver);
        state.close();
        sender.finish().await;
        tracing::debug!("WebSocket receiver task ended");
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.receiver_task.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn connect(&mut self) -> Result<(), Error> {
        let sender = match self.sender.take() {
            Some(sender) if self.state.phase() == Phase::Connecting => sender,
            _ => {
                return Err(Error::InvalidState("connect may only be attempted once".to_string()));
            }
        };

        tracing::info!("Connecting to WebSocket at {}", self.url);

        let ws_stream = match
            tokio::time::timeout(self.options.connection_timeout, connect_async(self.url.as_str())).await
        {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                return Err(self.connect_failed(e.to_string()));
            }
            Err(_) => {
                return Err(
                    self.connect_failed(
                        format!("timed out after {:?}", self.options.connection_timeout)
                    )
                );
            }
        };

        let (ws_sender, ws_receiver) = ws_stream.split();
        *self.sink.lock().await = Some(ws_sender);
        let handle = tokio::spawn(Self::run_receiver(ws_receiver, sender, self.state.clone()));
        *self.receiver_task.lock().await = Some(handle);

        self.state.open();
        tracing::info!("WebSocket connection established");
        Ok(())
    }

    async fn read_message(&self) -> Result<Option<String>, Error> {
        if self.sender.is_some() {
            return Err(Error::InvalidState("transport is not connected".to_string()));
        }
        Ok(self.queue.recv().await)
    }

    async fn write_message(&self, payload: &str) -> Result<(), Error> {
        if self.state.phase() != Phase::Open {
            return Err(Error::InvalidState("connection is not open".to_string()));
        }

        let body = encode_message(payload)?;
        let mut sink = self.sink.lock().await;
        let Some(ws_sender) = sink.as_mut() else {
            return Err(Error::InvalidState("connection is not open".to_string()));
        };

        match
            tokio::time::timeout(self.options.write_timeout, ws_sender.send(WsMessage::text(body))).await
        {
            Ok(Ok(())) => tracing::debug!("Message sent over WebSocket"),
            Ok(Err(e)) => tracing::warn!("WebSocket send error: {}", e),
            Err(_) => tracing::warn!("WebSocket write timed out after {:?}", self.options.write_timeout),
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if let Some(mut ws_sender) = self.sink.lock().await.take() {
            tracing::info!("Closing WebSocket transport");
            let closing = async {
                ws_sender.send(WsMessage::Close(None)).await?;
                ws_sender.close().await
            };
            match tokio::time::timeout(self.options.write_timeout, closing).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("WebSocket close handshake failed: {}", e),
                Err(_) => tracing::debug!("WebSocket close handshake timed out"),
            }
        }

        if let Some(handle) = self.receiver_task.lock().await.take() {
            tracing::debug!("Aborting WebSocket receiver task");
            handle.abort();
        }

        self.queue.end();
        self.state.close();
        Ok(())
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.receiver()
    }
}
