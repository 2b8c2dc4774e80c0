// Connection state module
//
// Shared, lock-free observable state for a transport: lifecycle phase,
// last time anything arrived from the server, and the close frame if one
// was received.

use std::time::{ Duration, Instant };

use tokio::sync::watch;
use tracing::debug;

/// Lifecycle phase of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Created, `connect()` not finished
    Connecting,
    /// Handshake succeeded
    Open,
    /// Closed locally or by the server; no further messages
    Closed,
}

/// Represents the current state of a connection
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionState {
    /// Lifecycle phase
    pub phase: Phase,
    /// When the last frame of any kind arrived
    pub last_activity: Option<Instant>,
    /// Code and reason of the server's close frame, if one arrived
    pub close_frame: Option<(u32, String)>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: Phase::Connecting,
            last_activity: None,
            close_frame: None,
        }
    }
}

impl ConnectionState {
    /// Check if the connection is open
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Time since the last frame, `None` before anything arrived.
    ///
    /// Callers use this with the server's heartbeat cadence to detect a
    /// stalled stream and close the connection.
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_activity.map(|at| at.elapsed())
    }
}

/// Channel for watching and updating connection state
pub struct ConnectionStateChannel {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionStateChannel {
    /// Create a new state channel in the `Connecting` phase
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::default());
        Self { tx }
    }

    /// Get a receiver that can be cloned and shared
    pub fn receiver(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Update the state with a modifier function
    pub fn update<F>(&self, f: F) where F: FnOnce(&mut ConnectionState) {
        // send_modify never fails, even with no receivers
        self.tx.send_modify(f);
    }

    /// Get the current state
    pub fn current(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Get the current phase
    pub fn phase(&self) -> Phase {
        self.tx.borrow().phase
    }

    /// Mark the connection open
    pub fn open(&self) {
        self.update(|state| {
            state.phase = Phase::Open;
        });
    }

    /// Record that a frame arrived
    pub fn touch(&self) {
        self.update(|state| {
            state.last_activity = Some(Instant::now());
        });
    }

    /// Record the server's close frame
    pub fn record_close(&self, code: u32, reason: &str) {
        self.update(|state| {
            state.close_frame = Some((code, reason.to_string()));
        });
    }

    /// Mark the connection closed. Returns `false` if it already was.
    pub fn close(&self) -> bool {
        let mut changed = false;
        self.tx.send_if_modified(|state| {
            if state.phase == Phase::Closed {
                return false;
            }
            state.phase = Phase::Closed;
            changed = true;
            true
        });
        if changed {
            debug!("Connection state changed to closed");
        }
        changed
    }
}

impl Default for ConnectionStateChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ConnectionStateChannel {
    fn clone(&self) -> Self {
        // Clone the sender so every copy updates the same state
        Self { tx: self.tx.clone() }
    }
}
