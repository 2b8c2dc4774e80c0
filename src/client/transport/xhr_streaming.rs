//! XHR-Streaming Client Transport
//!
//! This module implements the SockJS `xhr_streaming` fallback. Reads come
//! from one long-lived `POST .../xhr_streaming` response whose body is a
//! sequence of newline terminated frames; every write is a separate
//! `POST .../xhr_send` on a connection of its own, so writes never contend
//! with the read stream.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use http::HeaderMap;
use reqwest::{ Client as HttpClient, ClientBuilder, StatusCode, header };
use tokio::io::{ AsyncBufRead, AsyncBufReadExt };
use tokio::sync::{ Mutex, oneshot, watch };
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use url::Url;

use crate::client::transport::inbound::{ self, DEFAULT_QUEUE_CAPACITY, InboundQueue, InboundSender };
use crate::client::transport::state::{ ConnectionState, ConnectionStateChannel, Phase };
use crate::client::transport::{ Transport, TransportKind };
use crate::errors::Error;
use crate::protocol::frame::encode_message;
use crate::protocol::session::{ SessionId, with_scheme };

/// Default timeout for opening the read stream
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on a single write attempt
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long `close` waits for the read task before aborting it
const CLOSE_GRACE: Duration = Duration::from_secs(1);
/// Default cap on one frame line, newline included
const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

const NAME: &str = "xhr-streaming";

/// Options for the XHR-streaming transport
#[derive(Clone, Debug)]
pub struct XhrStreamingOptions {
    /// Bound on opening the read stream (connect plus response headers)
    pub connect_timeout: Duration,
    /// Bound on one `xhr_send` request; exceeding it drops that write only
    pub write_timeout: Duration,
    /// Capacity of the inbound message queue
    pub queue_capacity: usize,
    /// Longest accepted frame line; longer lines are dropped as malformed
    pub max_frame_len: usize,
    /// Extra headers sent with every request
    pub headers: Option<HeaderMap>,
}

impl Default for XhrStreamingOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            headers: None,
        }
    }
}

/// Result of one capped line read
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// Stream ended with nothing buffered
    Eof,
    /// A complete line (or the unterminated tail of the stream) is in the buffer
    Line,
    /// The line exceeded the cap and was discarded up to its newline
    Overflow,
}

/// `read_until(b'\n')` with a length cap. An overlong line is consumed
/// without being buffered, so memory stays bounded by `max_len`.
async fn read_capped_line<R>(reader: &mut R, line: &mut Vec<u8>, max_len: usize) -> io::Result<LineRead>
    where R: AsyncBufRead + Unpin
{
    let mut overflow = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if overflow {
                LineRead::Overflow
            } else if line.is_empty() {
                LineRead::Eof
            } else {
                LineRead::Line
            });
        }

        let (used, complete) = match available.iter().position(|b| *b == b'\n') {
            Some(end) => (end + 1, true),
            None => (available.len(), false),
        };
        if !overflow {
            if line.len() + used > max_len {
                overflow = true;
                line.clear();
            } else {
                line.extend_from_slice(&available[..used]);
            }
        }
        reader.consume(used);

        if complete {
            return Ok(if overflow { LineRead::Overflow } else { LineRead::Line });
        }
    }
}

/// Handle on the running read task
struct ReadTask {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Client-side implementation of the XHR-streaming transport
pub struct XhrStreamingTransport {
    /// Identity shared by the read stream and every write
    session: SessionId,
    /// URL of the streaming read request
    streaming_url: Url,
    /// URL of the per-message write request
    send_url: Url,
    /// Options for the transport
    options: XhrStreamingOptions,
    /// Observable connection state
    state: ConnectionStateChannel,
    /// Producer half of the inbound queue, moved into the read task on connect
    sender: Option<InboundSender>,
    /// Consumer half of the inbound queue
    queue: InboundQueue,
    /// Read task, present while the stream is registered
    reader: Mutex<Option<ReadTask>>,
}

impl XhrStreamingTransport {
    /// Create a new, unconnected XHR-streaming transport
    pub fn new(url: &Url) -> Result<Self, Error> {
        Self::with_options(url, XhrStreamingOptions::default())
    }

    /// Create a new, unconnected XHR-streaming transport with custom options
    pub fn with_options(url: &Url, options: XhrStreamingOptions) -> Result<Self, Error> {
        let endpoint = with_scheme(url, "http", "https")?;
        let session = SessionId::generate();
        let streaming_url = session.transport_url(&endpoint, "xhr_streaming")?;
        let send_url = session.transport_url(&endpoint, "xhr_send")?;

        tracing::debug!(
            "XHR-streaming transport for {}: stream='{}', send='{}'",
            url,
            streaming_url,
            send_url
        );

        let state = ConnectionStateChannel::new();
        let (sender, queue) = inbound::channel(options.queue_capacity, state.clone());

        Ok(Self {
            session,
            streaming_url,
            send_url,
            options,
            state,
            sender: Some(sender),
            queue,
            reader: Mutex::new(None),
        })
    }

    /// The session identity of this connection
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// URL of the streaming read request
    pub fn streaming_url(&self) -> &Url {
        &self.streaming_url
    }

    /// URL of the write requests
    pub fn send_url(&self) -> &Url {
        &self.send_url
    }

    /// HTTP client that keeps no idle connections, so each request owns
    /// its connection and releases it when done
    fn unpooled_client(connect_timeout: Duration) -> Result<HttpClient, reqwest::Error> {
        ClientBuilder::new().connect_timeout(connect_timeout).pool_max_idle_per_host(0).build()
    }

    fn connect_failed(&self, reason: String) -> Error {
        tracing::debug!("XHR-streaming connect to {} failed: {}", self.streaming_url, reason);
        self.queue.end();
        self.state.close();
        Error::transport_connect(NAME, reason)
    }

    /// Read frames line by line until the stream ends, the server closes the
    /// session, or `close` is called.
    async fn run_reader(
        response: reqwest::Response,
        mut sender: InboundSender,
        mut shutdown_rx: oneshot::Receiver<()>,
        state: ConnectionStateChannel,
        max_frame_len: usize
    ) {
        let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
        let mut reader = StreamReader::new(stream);
        let mut line = Vec::new();
        let mut cancelled = false;

        loop {
            line.clear();
            let read = tokio::select! {
                _ = &mut shutdown_rx => {
                    cancelled = true;
                    break;
                }
                read = read_capped_line(&mut reader, &mut line, max_frame_len) => read,
            };

            match read {
                Ok(LineRead::Eof) => {
                    tracing::debug!("XHR stream reached end of file");
                    break;
                }
                Ok(LineRead::Overflow) => {
                    tracing::warn!("Dropping frame longer than {} bytes", max_frame_len);
                }
                Ok(LineRead::Line) => {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    let flow = tokio::select! {
                        _ = &mut shutdown_rx => {
                            cancelled = true;
                            break;
                        }
                        flow = sender.dispatch(&line) => flow,
                    };
                    if flow.is_break() {
                        break;
                    }
                }
                Err(e) => {
                    // Treated the same as end of file
                    tracing::warn!("Error reading XHR stream: {}", e);
                    break;
                }
            }
        }

        // Release the read connection before waiting on the queue
        drop(reader);
        state.close();

        if cancelled {
            tracing::debug!("Cancelling reader");
        } else if !sender.is_finished() {
            tokio::select! {
                _ = shutdown_rx => {}
                _ = sender.finish() => {}
            }
        }
        tracing::debug!("XHR-streaming read task ending");
    }
}

impl Drop for XhrStreamingTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.handle.abort();
        }
    }
}

#[async_trait]
impl Transport for XhrStreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::XhrStreaming
    }

    async fn connect(&mut self) -> Result<(), Error> {
        let sender = match self.sender.take() {
            Some(sender) if self.state.phase() == Phase::Connecting => sender,
            _ => {
                return Err(Error::InvalidState("connect may only be attempted once".to_string()));
            }
        };

        tracing::info!("Connecting to XHR-streaming endpoint: {}", self.streaming_url);

        let http_client = Self::unpooled_client(self.options.connect_timeout).map_err(|e|
            self.connect_failed(format!("failed to create HTTP client: {}", e))
        )?;

        let request = http_client
            .post(self.streaming_url.clone())
            .headers(self.options.headers.clone().unwrap_or_default())
            .body("");

        let response = match tokio::time::timeout(self.options.connect_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(self.connect_failed(e.to_string()));
            }
            Err(_) => {
                return Err(
                    self.connect_failed(
                        format!("timed out after {:?}", self.options.connect_timeout)
                    )
                );
            }
        };

        if response.status() != StatusCode::OK {
            let status = response.status();
            return Err(self.connect_failed(format!("unexpected status {}", status)));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(
            Self::run_reader(
                response,
                sender,
                shutdown_rx,
                self.state.clone(),
                self.options.max_frame_len
            )
        );
        *self.reader.lock().await = Some(ReadTask { shutdown_tx, handle });

        self.state.open();
        tracing::info!("XHR-streaming connection established");
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
        let timeout = self.options.write_timeout;

        // A fresh connection per write; never the read stream's
        let http_client = match Self::unpooled_client(timeout) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Failed to create HTTP client for write: {}", e);
                return Ok(());
            }
        };

        let request = http_client
            .post(self.send_url.clone())
            .headers(self.options.headers.clone().unwrap_or_default())
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(body);

        match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                tracing::debug!("Message sent with status {}", response.status());
            }
            Ok(Ok(response)) => {
                tracing::warn!("Write rejected by server with status {}", response.status());
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to send message: {}", e);
            }
            Err(_) => {
                tracing::warn!("Write timed out after {:?}", timeout);
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if let Some(task) = self.reader.lock().await.take() {
            tracing::info!("Closing XHR-streaming transport");
            let ReadTask { shutdown_tx, mut handle } = task;
            // The task may already have ended on its own
            let _ = shutdown_tx.send(());
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                tracing::warn!("XHR-streaming read task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.queue.end();
        self.state.close();
        Ok(())
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.receiver()
    }
}
