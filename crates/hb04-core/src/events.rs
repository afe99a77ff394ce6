//! Pendant events and session lifecycle notifications.
//!
//! Input reports reach consumers as [`PendantEvent`]s through the single
//! handler slot on the facade. Connection lifecycle changes go to a
//! [`SessionObserver`] so that CLI/GUI front-ends can follow them without
//! coupling to the session internals.

use std::fmt;

use crate::protocol::tables::{AxisSwitch, Button};
use crate::state::ConnectionState;

/// One decoded input report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendantEvent {
    /// First held button (or [`Button::None`]).
    pub button: Button,
    /// Second held button, for two-button chords.
    pub button2: Button,
    /// Axis selector position.
    pub axis: AxisSwitch,
    /// Knob detents since the previous report.
    pub increment: i8,
}

impl PendantEvent {
    /// Names of the fields carried by every event.
    pub const FIELDS: &'static [&'static str] = &["button", "button2", "axis", "increment"];
}

impl fmt::Display for PendantEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "button={:?} button2={:?} axis={} increment={}",
            self.button.name(),
            self.button2.name(),
            self.axis,
            self.increment
        )
    }
}

/// Lifecycle events emitted by the device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection state changed.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// First discovery miss; emitted once per connect attempt.
    WaitingForDevice { vid: u16, pid: u16 },
    /// Device opened and endpoint claimed.
    DeviceConnected { vid: u16, pid: u16 },
    /// Device vanished while listening.
    DeviceLost,
    /// Device is held by another program.
    DeviceBusy,
    /// Device could not be opened for a reason other than absence.
    OpenFailed { message: String },
    /// A display frame could not be delivered.
    WriteFailed { message: String },
    /// An unrecoverable error; the fatal hook runs next.
    Fatal { message: String },
}

/// Observer trait for receiving session events.
///
/// Called from the session's worker threads.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State changed");
            }
            SessionEvent::WaitingForDevice { vid, pid } => {
                tracing::info!(
                    vid = %format!("{:04X}", vid),
                    pid = %format!("{:04X}", pid),
                    "HB04 not found. Please attach to continue..."
                );
            }
            SessionEvent::DeviceConnected { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Found HB04");
            }
            SessionEvent::DeviceLost => {
                tracing::warn!("USB device disconnected");
            }
            SessionEvent::DeviceBusy => {
                tracing::warn!("Device in use by another program");
            }
            SessionEvent::OpenFailed { message } => {
                tracing::warn!(error = %message, "Failed to open HB04");
            }
            SessionEvent::WriteFailed { message } => {
                tracing::debug!(error = %message, "Display update failed");
            }
            SessionEvent::Fatal { message } => {
                tracing::error!("FATAL: {}", message);
            }
        }
    }
}
