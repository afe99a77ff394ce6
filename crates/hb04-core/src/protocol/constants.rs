//! Protocol constants for the HB04 pendant.
//!
//! Values are taken from captures of the vendor software and the LinuxCNC
//! `xhc-hb04` driver.

// ============================================================================
// Device Identification
// ============================================================================

/// HB04 Vendor ID
pub const HB04_VENDOR_ID: u16 = 0x10CE;

/// HB04 Product ID (wired USB variant)
pub const HB04_PRODUCT_ID: u16 = 0xEB70;

/// Interface carrying both the input reports and the display control requests
pub const HB04_INTERFACE: u8 = 0;

// ============================================================================
// Inbound Reports (Device -> Host)
// ============================================================================

/// Size of one button/knob report.
pub const REPORT_SIZE: usize = 6;

/// First byte of every report.
pub const REPORT_MARKER: u8 = 0x04;

/// Largest read requested from the IN endpoint.
pub const MAX_READ_SIZE: usize = 64;

// ============================================================================
// Outbound Display Frames (Host -> Device)
// ============================================================================

/// Vendor magic opening every display frame.
pub const FRAME_HEADER: [u8; 3] = [0xFE, 0xFD, 0x0C];

/// Size of the assembled display frame, reserved tail included.
pub const FRAME_SIZE: usize = 42;

/// Number of packets a frame is split into.
pub const PACKET_COUNT: usize = 6;

/// Frame bytes carried by each packet.
pub const PACKET_PAYLOAD_SIZE: usize = 7;

/// Packet size on the wire (lead-in byte + payload).
pub const PACKET_SIZE: usize = PACKET_PAYLOAD_SIZE + 1;

/// Lead-in byte of every display packet.
pub const PACKET_LEAD_IN: u8 = 0x06;

/// Host-to-device, class request, interface recipient.
pub const DISPLAY_REQUEST_TYPE: u8 = 0x21;

/// HID SET_REPORT.
pub const DISPLAY_REQUEST: u8 = 0x09;

/// Feature report, id 6.
pub const DISPLAY_VALUE: u16 = 0x0306;

pub const DISPLAY_INDEX: u16 = 0x0000;

// ============================================================================
// Display Limits
// ============================================================================

/// Largest magnitude the XYZA digits can show (inch mode has four decimals).
pub const MAX_FLOAT_DISPLAY: f64 = 9999.9999;

/// Largest value accepted by the feed/spindle fields.
pub const MAX_INT_DISPLAY: f64 = 65535.0;

/// Fixed-point scale of the float fields.
pub const FLOAT_SCALE: f64 = 10_000.0;

/// Sign flag carried in the high bit of the fractional field.
pub const FRACTION_SIGN_BIT: u16 = 0x8000;

// ============================================================================
// Timing (milliseconds)
// ============================================================================

pub const DISCOVERY_POLL_MS: u64 = 100;
pub const READ_TIMEOUT_MS: u64 = 1000;
pub const WRITE_TIMEOUT_MS: u64 = 1000;
pub const DISPLAY_PERIOD_MS: u64 = 333;
pub const RECONNECT_PAUSE_MS: u64 = 500;
pub const NO_DEVICE_BACKOFF_MS: u64 = 2000;
pub const BUSY_BACKOFF_MS: u64 = 1000;
