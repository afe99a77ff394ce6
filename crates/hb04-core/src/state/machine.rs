//! Connection state machine for the device session.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Connection lifecycle of the pendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no discovery running.
    #[default]
    Disconnected,
    /// Polling for the device.
    Connecting,
    /// Receive and display loops running.
    Listening,
    /// Loops told to stop; waiting before a fresh connect.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Listening => write!(f, "LISTENING"),
            ConnectionState::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

/// Shared flags and current state of one session.
///
/// `running` is the only cancellation signal the worker loops observe.
/// `disconnecting` stops discovery and is never cleared.
#[derive(Debug, Default)]
pub struct SessionState {
    state: Mutex<ConnectionState>,
    running: AtomicBool,
    reconnecting: AtomicBool,
    disconnecting: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Transition to a new state, returning the previous one if it changed.
    ///
    /// Once disconnecting, only `Disconnected` is accepted.
    pub fn goto_state(&self, new_state: ConnectionState) -> Option<ConnectionState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let from = *state;
        if from == new_state {
            return None;
        }
        if self.is_disconnecting() && new_state != ConnectionState::Disconnected {
            tracing::debug!(from = %from, to = %new_state, "Ignoring transition after disconnect");
            return None;
        }
        tracing::debug!(from = %from, to = %new_state, "State transition");
        *state = new_state;
        Some(from)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub fn set_reconnecting(&self, reconnecting: bool) {
        self.reconnecting.store(reconnecting, Ordering::SeqCst);
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::SeqCst)
    }

    /// Mark the session as shutting down. Returns `true` on the first call.
    pub fn begin_disconnect(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        !self.disconnecting.swap(true, Ordering::SeqCst)
    }

    /// True while listening or between listening and the next connect.
    pub fn is_active(&self) -> bool {
        self.is_running() || self.is_reconnecting()
    }
}
