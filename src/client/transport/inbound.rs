//! Inbound message queue
//!
//! A bounded FIFO between a transport's read task (the only producer) and
//! `read_message` callers. The read task hands every raw frame to
//! [`InboundSender::dispatch`], which applies the per-frame policy and
//! decides whether reading goes on.

use std::ops::ControlFlow;
use std::sync::atomic::{ AtomicBool, Ordering };

use tokio::sync::{ Mutex, mpsc };

use crate::client::transport::state::ConnectionStateChannel;
use crate::protocol::frame::Frame;

/// Default capacity of the inbound queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Entry of the inbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One application message
    Message(String),
    /// No more messages will follow
    EndOfStream,
}

/// Create a connected sender/queue pair
pub fn channel(
    capacity: usize,
    state: ConnectionStateChannel
) -> (InboundSender, InboundQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        InboundSender { tx, state, finished: false },
        InboundQueue { rx: Mutex::new(rx), ended: AtomicBool::new(false) },
    )
}

/// Producer half, owned by the read task
pub struct InboundSender {
    tx: mpsc::Sender<Inbound>,
    state: ConnectionStateChannel,
    finished: bool,
}

impl InboundSender {
    /// Apply the per-frame policy to one raw frame.
    ///
    /// Returns `Break` once the stream is logically over (close frame, or
    /// the queue's consumer is gone).
    pub async fn dispatch(&mut self, raw: &[u8]) -> ControlFlow<()> {
        if self.finished {
            return ControlFlow::Break(());
        }

        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                // One bad line must not end a healthy stream
                tracing::warn!("Skipping undecodable line {:?}: {}", String::from_utf8_lossy(raw), e);
                return ControlFlow::Continue(());
            }
        };
        self.state.touch();

        match frame {
            Frame::Open => {
                tracing::debug!("Connection opened");
                ControlFlow::Continue(())
            }
            Frame::Heartbeat => {
                tracing::trace!("Heartbeat");
                ControlFlow::Continue(())
            }
            Frame::Close { code, reason } => {
                tracing::debug!("Connection closed by server: {} {}", code, reason);
                self.state.record_close(code, &reason);
                self.finish().await;
                ControlFlow::Break(())
            }
            frame @ (Frame::Message(_) | Frame::LegacyMessage(_)) => {
                for payload in frame.into_payloads() {
                    tracing::debug!("Message received");
                    if self.tx.send(Inbound::Message(payload)).await.is_err() {
                        tracing::debug!("Inbound queue dropped, stopping reader");
                        self.finished = true;
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Enqueue the end-of-stream marker. Only the first call has any effect.
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.tx.send(Inbound::EndOfStream).await.is_err() {
            tracing::debug!("Inbound queue already dropped at end of stream");
        }
    }

    /// Whether the end-of-stream marker was already enqueued
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Consumer half, owned by the transport
pub struct InboundQueue {
    rx: Mutex<mpsc::Receiver<Inbound>>,
    ended: AtomicBool,
}

impl InboundQueue {
    /// Wait for the next message; `None` means end of channel.
    ///
    /// Once end of channel was seen every further call returns `None`
    /// immediately.
    pub async fn recv(&self) -> Option<String> {
        if self.ended.load(Ordering::Acquire) {
            return None;
        }

        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Inbound::Message(payload)) => Some(payload),
            // A dropped producer is an end of stream as well
            Some(Inbound::EndOfStream) | None => {
                tracing::debug!("Queue is closed");
                self.ended.store(true, Ordering::Release);
                rx.close();
                None
            }
        }
    }

    /// Make every pending and future `recv` report end of channel
    pub fn end(&self) {
        self.ended.store(true, Ordering::Release);
    }

    /// Whether end of channel was reached
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}
