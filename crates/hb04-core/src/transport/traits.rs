//! USB Transport layer abstraction.
//!
//! Defines the `PendantTransport` trait for one open pendant connection and
//! the `Connector` trait that discovers and opens it, allowing different
//! implementations (nusb, mock, etc.).

use std::time::Duration;

use thiserror::Error;

use crate::protocol::constants::{
    DISPLAY_INDEX, DISPLAY_REQUEST, DISPLAY_REQUEST_TYPE, DISPLAY_VALUE,
};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Short write: sent {actual} of {expected} bytes")]
    ShortWrite { expected: usize, actual: usize },

    #[error("No such device (it may have been disconnected)")]
    NoDevice,

    #[error("Device is busy")]
    Busy,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl TransportError {
    /// Errors that can never be fixed by polling again.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, TransportError::EndpointNotFound { .. })
    }
}

/// Setup stage of a host-to-device control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// SET_REPORT carrying one display packet.
    pub const DISPLAY_UPDATE: ControlRequest = ControlRequest {
        request_type: DISPLAY_REQUEST_TYPE,
        request: DISPLAY_REQUEST,
        value: DISPLAY_VALUE,
        index: DISPLAY_INDEX,
    };
}

/// One open connection to a pendant.
///
/// Implementations must be shareable between the receive and display
/// threads: `read` and `control_write` may run concurrently.
pub trait PendantTransport: Send + Sync {
    /// Read one report from the IN endpoint, waiting at most `timeout`.
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Send a control transfer, returning the number of bytes written.
    fn control_write(
        &self,
        request: ControlRequest,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Whether opening this connection detached a kernel driver.
    fn detached_kernel_driver(&self) -> bool {
        false
    }

    /// Release the interface and hand it back to the kernel driver.
    ///
    /// The session only calls this after some connection detached the
    /// driver, which need not be this one.
    fn reattach_kernel_driver(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Get the VID.
    fn vendor_id(&self) -> u16;

    /// Get the PID.
    fn product_id(&self) -> u16;
}

/// Discovers and opens pendant connections.
pub trait Connector: Send + Sync + 'static {
    type Transport: PendantTransport + 'static;

    /// Open the device.
    ///
    /// `DeviceNotFound` means "not attached yet" and is retried by the caller.
    fn open(&self) -> Result<Self::Transport, TransportError>;

    /// Identifiers being searched for, for log output.
    fn ids(&self) -> (u16, u16);
}
