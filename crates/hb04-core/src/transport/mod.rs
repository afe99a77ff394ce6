//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockConnector, MockOpen, MockRead, MockTransport};
pub use self::nusb::{NusbConnector, NusbTransport};
pub use traits::{Connector, ControlRequest, PendantTransport, TransportError};
