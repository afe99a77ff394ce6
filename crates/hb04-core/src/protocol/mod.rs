//! Protocol module - HB04 wire format.

pub mod codec;
pub mod constants;
pub mod tables;

pub use codec::{CodecError, DisplayBytes, FrameContent, decode_report, encode_frame, packetize};
pub use constants::*;
pub use tables::{AxisSwitch, Button, Icon, Multiplier, Units};
