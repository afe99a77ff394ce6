//! HB04-Core: driver for the HB04 USB CNC pendant.
//!
//! The HB04 is a handheld remote for CNC machines: a jog knob, an axis
//! selector, a row of buttons and an LCD showing work/machine coordinates,
//! feed and spindle. This crate turns its input reports into
//! [`PendantEvent`]s and keeps the display in sync with an axis model owned
//! by motion-control code.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, code tables, report/frame codec
//! - **Axis / Display**: Coordinate model and display attributes
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **State**: Connection state machine
//! - **Events**: Input events and lifecycle observer
//! - **Session**: Discovery, receive/display loops and reconnects
//! - **Pendant**: Public facade
//!
//! # Example
//!
//! ```no_run
//! use hb04_core::{Hb04, Pendant};
//!
//! let pendant = Hb04::new();
//! pendant.on_event(|event| {
//!     println!("{event}");
//!     Ok(())
//! });
//! pendant.axis_value("x", Some(12.5), Some(112.5)).expect("known axis");
//! pendant.set_display_attribute("inch").ok();
//! ```

pub mod axis;
pub mod display;
pub mod events;
pub mod pendant;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use axis::{Axis, AxisId, AxisSet, DisplayMode};
pub use display::{DisplayAttribute, DisplayState};
pub use events::{NullObserver, PendantEvent, SessionEvent, SessionObserver, TracingObserver};
pub use pendant::{AxisReading, Hb04, Hb04Builder, Pendant, PendantError, PendantHandle};
pub use protocol::{AxisSwitch, Button, CodecError, Icon, Multiplier, Units};
pub use session::{DeviceSession, EventHandler, FatalError, FatalHook, PendantConfig};
pub use state::ConnectionState;
pub use transport::{
    Connector, MockConnector, MockTransport, NusbConnector, NusbTransport, PendantTransport,
    TransportError,
};
