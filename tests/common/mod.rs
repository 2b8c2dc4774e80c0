//! Mock SockJS server used by the integration tests.
//!
//! Serves `xhr_streaming`, `xhr_send` and (optionally) `websocket` under
//! `/echo/{server}/{session}/`. The streaming body is fed by the test through
//! [`MockServer::push`] and ends when the test calls [`MockServer::end_stream`].

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{ Arc, Mutex, OnceLock };
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{ Message as AxumWsMessage, WebSocket, WebSocketUpgrade };
use axum::extract::{ Path, State };
use axum::http::{ StatusCode, header };
use axum::response::{ IntoResponse, Response };
use axum::routing::{ get, post };
use axum::Router;
use sockjs_client::{ ConnectOptions, ConnectRequest };
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn init_tracing() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Behaviour of the mock server
#[derive(Clone, Debug)]
pub struct MockConfig {
    /// Serve the websocket endpoint
    pub websocket: bool,
    /// Status of the xhr_streaming response
    pub stream_status: StatusCode,
    /// Status of xhr_send responses
    pub send_status: StatusCode,
    /// How long xhr_send waits before answering
    pub send_delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            websocket: false,
            stream_status: StatusCode::OK,
            send_status: StatusCode::NO_CONTENT,
            send_delay: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
struct MockState {
    config: MockConfig,
    stream_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
    sends: Arc<Mutex<Vec<String>>>,
    paths: Arc<Mutex<Vec<String>>>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    stream_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    state: MockState,
}

impl MockServer {
    pub async fn start(config: MockConfig) -> MockServer {
        init_tracing();

        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let state = MockState {
            config: config.clone(),
            stream_rx: Arc::new(Mutex::new(Some(stream_rx))),
            sends: Arc::new(Mutex::new(Vec::new())),
            paths: Arc::new(Mutex::new(Vec::new())),
        };

        let mut app = Router::new()
            .route("/echo/{server}/{session}/xhr_streaming", post(xhr_streaming))
            .route("/echo/{server}/{session}/xhr_send", post(xhr_send));
        if config.websocket {
            app = app.route("/echo/{server}/{session}/websocket", get(websocket));
        }
        let app = app.with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockServer {
            addr,
            stream_tx: Mutex::new(Some(stream_tx)),
            accept_task: Mutex::new(Some(accept_task)),
            state,
        }
    }

    /// Endpoint URL with the given scheme
    pub fn url(&self, scheme: &str) -> String {
        format!("{}://{}/echo", scheme, self.addr)
    }

    /// Request with short timeouts against this server
    pub fn request(&self, scheme: &str) -> ConnectRequest {
        let mut options = ConnectOptions::default();
        options.websocket.connection_timeout = Duration::from_secs(5);
        options.xhr_streaming.connect_timeout = Duration::from_secs(5);
        options.xhr_streaming.write_timeout = Duration::from_secs(2);
        ConnectRequest::with_options(self.url(scheme), options)
    }

    /// Append raw bytes to the streaming body
    pub fn push(&self, chunk: &str) {
        if let Some(tx) = self.stream_tx.lock().unwrap().as_ref() {
            tx.send(chunk.to_string()).unwrap();
        }
    }

    /// End the streaming body without a close frame
    pub fn end_stream(&self) {
        self.stream_tx.lock().unwrap().take();
    }

    /// Drop the listener so new connections are refused. Connections
    /// already accepted run on their own tasks and stay up.
    pub async fn stop_accepting(&self) {
        let task = self.accept_task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    /// Bodies of every xhr_send request, in arrival order
    pub fn sends(&self) -> Vec<String> {
        self.state.sends.lock().unwrap().clone()
    }

    /// `{server}/{session}/{transport}` of every request, in arrival order
    pub fn paths(&self) -> Vec<String> {
        self.state.paths.lock().unwrap().clone()
    }
}

async fn xhr_streaming(
    State(state): State<MockState>,
    Path((server, session)): Path<(String, String)>
) -> Response {
    state.paths.lock().unwrap().push(format!("{}/{}/xhr_streaming", server, session));
    if state.config.stream_status != StatusCode::OK {
        return state.config.stream_status.into_response();
    }

    let Some(mut rx) = state.stream_rx.lock().unwrap().take() else {
        return StatusCode::CONFLICT.into_response();
    };
    let body = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, std::convert::Infallible>(chunk);
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/javascript; charset=UTF-8")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn xhr_send(
    State(state): State<MockState>,
    Path((server, session)): Path<(String, String)>,
    body: String
) -> StatusCode {
    state.paths.lock().unwrap().push(format!("{}/{}/xhr_send", server, session));
    state.sends.lock().unwrap().push(body);
    if !state.config.send_delay.is_zero() {
        tokio::time::sleep(state.config.send_delay).await;
    }
    state.config.send_status
}

async fn websocket(
    State(state): State<MockState>,
    Path((server, session)): Path<(String, String)>,
    ws: WebSocketUpgrade
) -> Response {
    state.paths.lock().unwrap().push(format!("{}/{}/websocket", server, session));
    ws.on_upgrade(echo_session)
}

/// Opens, greets, then echoes every message back; `["bye"]` closes the session
async fn echo_session(mut socket: WebSocket) {
    if socket.send(AxumWsMessage::Text("o".into())).await.is_err() {
        return;
    }
    if socket.send(AxumWsMessage::Text("a[\"hello\"]".into())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let AxumWsMessage::Text(text) = message else {
            continue;
        };
        if text.as_str() == "[\"bye\"]" {
            let _ = socket.send(AxumWsMessage::Text("c[1000,\"bye\"]".into())).await;
            let _ = socket.send(AxumWsMessage::Close(None)).await;
            break;
        }
        let reply = format!("a{}", text.as_str());
        if socket.send(AxumWsMessage::Text(reply.into())).await.is_err() {
            break;
        }
    }
}
