//! Binary codec for HB04 reports and display frames.
//!
//! Pure functions only; nothing here touches the device.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::{
    FLOAT_SCALE, FRACTION_SIGN_BIT, FRAME_HEADER, FRAME_SIZE, MAX_FLOAT_DISPLAY, MAX_INT_DISPLAY,
    PACKET_COUNT, PACKET_LEAD_IN, PACKET_PAYLOAD_SIZE, PACKET_SIZE, REPORT_SIZE,
};
use super::tables::{AxisSwitch, Button};
use crate::events::PendantEvent;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid report size: expected {expected}, got {actual}")]
    InvalidReportSize { expected: usize, actual: usize },

    #[error("Unknown button code 0x{0:02X}")]
    UnknownButton(u8),

    #[error("Unknown axis switch code 0x{0:02X}")]
    UnknownAxisSwitch(u8),

    #[error("Frame too long: max {max}, got {actual}")]
    FrameTooLong { max: usize, actual: usize },
}

/// Encoded value of one numeric display field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayBytes {
    /// XYZA style: integer part and signed fractional part.
    Float([u8; 4]),
    /// Feed/spindle style: one 16-bit field.
    Int([u8; 2]),
}

impl DisplayBytes {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DisplayBytes::Float(b) => b,
            DisplayBytes::Int(b) => b,
        }
    }
}

/// Encode a coordinate as `[int lo, int hi, frac lo, frac hi]`.
///
/// The fractional field holds ten-thousandths; its high bit is the sign.
/// Magnitudes beyond the display range saturate. NaN encodes as zero.
pub fn encode_float(v: f64) -> [u8; 4] {
    let magnitude = if v.is_nan() {
        0.0
    } else {
        v.abs().min(MAX_FLOAT_DISPLAY)
    };
    let scaled = (magnitude * FLOAT_SCALE).round() as u32;
    let int_part = (scaled / FLOAT_SCALE as u32) as u16;
    let mut fract_part = (scaled % FLOAT_SCALE as u32) as u16;
    if v < 0.0 {
        fract_part |= FRACTION_SIGN_BIT;
    }

    let mut out = [0u8; 4];
    LittleEndian::write_u16(&mut out[0..2], int_part);
    LittleEndian::write_u16(&mut out[2..4], fract_part);
    out
}

/// Inverse of [`encode_float`].
pub fn decode_float(bytes: [u8; 4]) -> f64 {
    let int_part = LittleEndian::read_u16(&bytes[0..2]);
    let fract_field = LittleEndian::read_u16(&bytes[2..4]);
    let fract_part = fract_field & !FRACTION_SIGN_BIT;
    let magnitude = f64::from(int_part) + f64::from(fract_part) / FLOAT_SCALE;
    if fract_field & FRACTION_SIGN_BIT != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encode a feed/spindle value as a 16-bit little-endian field.
///
/// Input is clamped to `[0, 65535]` and truncated. The device treats the
/// field as signed, so values above `i16::MAX` keep their bit pattern.
pub fn encode_int16(v: f64) -> [u8; 2] {
    let clamped = if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, MAX_INT_DISPLAY)
    };
    let mut out = [0u8; 2];
    LittleEndian::write_i16(&mut out, clamped.trunc() as u16 as i16);
    out
}

/// Sign-extend the knob increment byte.
pub fn decode_increment(byte: u8) -> i8 {
    byte as i8
}

/// Decode a `[marker, button1, button2, axis_switch, increment, button1_dup]`
/// input report.
pub fn decode_report(data: &[u8]) -> Result<PendantEvent, CodecError> {
    if data.len() != REPORT_SIZE {
        return Err(CodecError::InvalidReportSize {
            expected: REPORT_SIZE,
            actual: data.len(),
        });
    }

    let button = Button::from_code(data[1]).ok_or(CodecError::UnknownButton(data[1]))?;
    let button2 = Button::from_code(data[2]).ok_or(CodecError::UnknownButton(data[2]))?;
    let axis = AxisSwitch::from_code(data[3]).ok_or(CodecError::UnknownAxisSwitch(data[3]))?;

    Ok(PendantEvent {
        button,
        button2,
        axis,
        increment: decode_increment(data[4]),
    })
}

/// Everything shown on the display, already encoded per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContent {
    /// X (or A), Y, Z work coordinates.
    pub work: [DisplayBytes; 3],
    /// X (or A), Y, Z machine coordinates.
    pub machine: [DisplayBytes; 3],
    /// Feed actual, spindle actual, feed setpoint, spindle setpoint.
    pub rates: [DisplayBytes; 4],
    /// Icon code OR'd with the multiplier code.
    pub status: u8,
    pub units: u8,
}

/// Assemble the 42-byte display frame. The reserved tail is zero.
pub fn encode_frame(content: &FrameContent) -> Result<[u8; FRAME_SIZE], CodecError> {
    let mut data = Vec::with_capacity(FRAME_SIZE);
    data.extend_from_slice(&FRAME_HEADER);
    for field in content
        .work
        .iter()
        .chain(content.machine.iter())
        .chain(content.rates.iter())
    {
        data.extend_from_slice(field.as_bytes());
    }
    data.push(content.status);
    data.push(content.units);

    if data.len() > FRAME_SIZE {
        return Err(CodecError::FrameTooLong {
            max: FRAME_SIZE,
            actual: data.len(),
        });
    }

    let mut frame = [0u8; FRAME_SIZE];
    frame[..data.len()].copy_from_slice(&data);
    Ok(frame)
}

/// Split frame data into `0x06`-prefixed 8-byte packets, zero-padding short input.
pub fn packetize(data: &[u8]) -> Result<[[u8; PACKET_SIZE]; PACKET_COUNT], CodecError> {
    if data.len() > FRAME_SIZE {
        return Err(CodecError::FrameTooLong {
            max: FRAME_SIZE,
            actual: data.len(),
        });
    }

    let mut padded = [0u8; FRAME_SIZE];
    padded[..data.len()].copy_from_slice(data);

    let mut packets = [[0u8; PACKET_SIZE]; PACKET_COUNT];
    for (packet, chunk) in packets
        .iter_mut()
        .zip(padded.chunks_exact(PACKET_PAYLOAD_SIZE))
    {
        packet[0] = PACKET_LEAD_IN;
        packet[1..].copy_from_slice(chunk);
    }
    Ok(packets)
}
