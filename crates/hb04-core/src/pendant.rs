//! Public pendant API.
//!
//! [`Hb04`] owns a device session and disconnects it when dropped.
//! [`PendantHandle`] is a cheap clone of the same session for event
//! handlers and other threads; dropping a handle does nothing.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::axis::AxisSet;
use crate::display::DisplayAttribute;
use crate::events::{PendantEvent, SessionObserver, TracingObserver};
use crate::protocol::tables::{AxisSwitch, Icon, Multiplier, Units};
use crate::session::{DeviceSession, EventHandler, FatalError, FatalHook, PendantConfig, exit_process};
use crate::state::ConnectionState;
use crate::transport::{Connector, NusbConnector};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PendantError {
    #[error("Unknown axis: {0}")]
    UnknownAxis(String),

    #[error("Unknown display attribute: {0:?}")]
    UnknownDisplayAttribute(String),
}

/// What a pendant offers to motion-control code.
pub trait Pendant {
    /// Replace the handler that receives every input report.
    ///
    /// The handler runs on the receive thread. An error or panic from it is
    /// fatal.
    fn register_event_handler(&self, handler: Box<EventHandler>);

    /// Names of the fields carried by each event.
    fn event_types(&self) -> &'static [&'static str] {
        PendantEvent::FIELDS
    }

    /// Update an axis's work and/or machine coordinate and refresh the display.
    ///
    /// An unknown axis name is fatal.
    fn axis_value(
        &self,
        name: &str,
        work: Option<f64>,
        machine: Option<f64>,
    ) -> Result<(), PendantError>;

    /// Every name accepted by [`Pendant::set_display_attribute`].
    fn display_attributes(&self) -> Vec<&'static str>;

    /// Select a units, icon or multiplier entry by name and refresh the display.
    ///
    /// Unknown names leave the display unchanged.
    fn set_display_attribute(&self, name: &str) -> Result<(), PendantError>;

    /// True while listening or reconnecting.
    fn is_running(&self) -> bool;

    /// Stop the session. Safe to call more than once.
    fn disconnect(&self);
}

/// Coordinates of one axis at the time of reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisReading {
    pub work: f64,
    pub machine: f64,
}

/// Shared, non-owning access to a running pendant session.
pub struct PendantHandle<C: Connector = NusbConnector> {
    session: Arc<DeviceSession<C>>,
}

impl<C: Connector> Clone for PendantHandle<C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<C: Connector> PendantHandle<C> {
    /// Register a handler from a closure.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&PendantEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.session.set_handler(Arc::new(handler));
    }

    /// Read back an axis.
    pub fn axis(&self, name: &str) -> Option<AxisReading> {
        self.session.axes().by_name(name).map(|axis| AxisReading {
            work: axis.work_coordinate(),
            machine: axis.machine_coordinate(),
        })
    }

    pub fn axes(&self) -> &AxisSet {
        self.session.axes()
    }

    pub fn axis_switch(&self) -> AxisSwitch {
        self.session.axis_switch()
    }

    pub fn units(&self) -> Units {
        self.session.display().units()
    }

    pub fn icon(&self) -> Icon {
        self.session.display().icon()
    }

    pub fn multiplier(&self) -> Multiplier {
        self.session.display().multiplier()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    /// Send the current state to the display now.
    pub fn refresh(&self) {
        self.session.refresh_display();
    }
}

impl<C: Connector> Pendant for PendantHandle<C> {
    fn register_event_handler(&self, handler: Box<EventHandler>) {
        self.session.set_handler(Arc::from(handler));
    }

    fn axis_value(
        &self,
        name: &str,
        work: Option<f64>,
        machine: Option<f64>,
    ) -> Result<(), PendantError> {
        let Some(axis) = self.session.axes().by_name(name) else {
            self.session.fatal(FatalError::UnknownAxis(name.to_string()));
            return Err(PendantError::UnknownAxis(name.to_string()));
        };

        if let Some(v) = work {
            axis.set_work_coordinate(v);
        }
        if let Some(v) = machine {
            axis.set_machine_coordinate(v);
        }
        self.session.refresh_display();
        Ok(())
    }

    fn display_attributes(&self) -> Vec<&'static str> {
        DisplayAttribute::names()
    }

    fn set_display_attribute(&self, name: &str) -> Result<(), PendantError> {
        let Some(attribute) = DisplayAttribute::lookup(name) else {
            warn!(attribute = %name, "HB04 doesn't have this display attribute");
            return Err(PendantError::UnknownDisplayAttribute(name.to_string()));
        };

        self.session.display().apply(attribute);
        self.session.refresh_display();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.session.is_running()
    }

    fn disconnect(&self) {
        self.session.disconnect();
    }
}

impl<C: Connector> fmt::Display for PendantHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HB04:")?;
        for axis in self.session.axes().iter() {
            write!(f, "{axis} ")?;
        }
        write!(
            f,
            "icon:{} units:{} x1:{} a-sw:{}",
            self.icon(),
            self.units(),
            self.multiplier(),
            self.axis_switch()
        )
    }
}

/// Builder for [`Hb04`].
pub struct Hb04Builder<C: Connector> {
    connector: C,
    config: PendantConfig,
    observer: Arc<dyn SessionObserver>,
    fatal_hook: FatalHook,
}

impl<C: Connector> Hb04Builder<C> {
    pub fn config(mut self, config: PendantConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the default fatal action (process exit).
    pub fn on_fatal(mut self, hook: FatalHook) -> Self {
        self.fatal_hook = hook;
        self
    }

    /// Create the session and start looking for the device.
    pub fn connect(self) -> Hb04<C> {
        let session = DeviceSession::new(self.connector, self.config, self.observer, self.fatal_hook);
        session.start();
        Hb04 {
            handle: PendantHandle { session },
        }
    }
}

/// An HB04 pendant. Disconnects when dropped.
pub struct Hb04<C: Connector = NusbConnector> {
    handle: PendantHandle<C>,
}

impl Hb04<NusbConnector> {
    /// Connect to the first HB04 with default settings.
    pub fn new() -> Self {
        Self::from_config(PendantConfig::default())
    }

    /// Connect using the identifiers and timings in `config`.
    pub fn from_config(config: PendantConfig) -> Self {
        let connector = NusbConnector::new(config.vendor_id, config.product_id, config.interface);
        Self::builder(connector).config(config).connect()
    }
}

impl Default for Hb04<NusbConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> Hb04<C> {
    pub fn builder(connector: C) -> Hb04Builder<C> {
        Hb04Builder {
            connector,
            config: PendantConfig::default(),
            observer: Arc::new(TracingObserver),
            fatal_hook: exit_process(),
        }
    }

    /// A non-owning handle to the same session.
    pub fn handle(&self) -> PendantHandle<C> {
        self.handle.clone()
    }
}

impl<C: Connector> Deref for Hb04<C> {
    type Target = PendantHandle<C>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<C: Connector> Pendant for Hb04<C> {
    fn register_event_handler(&self, handler: Box<EventHandler>) {
        self.handle.register_event_handler(handler);
    }

    fn axis_value(
        &self,
        name: &str,
        work: Option<f64>,
        machine: Option<f64>,
    ) -> Result<(), PendantError> {
        self.handle.axis_value(name, work, machine)
    }

    fn display_attributes(&self) -> Vec<&'static str> {
        self.handle.display_attributes()
    }

    fn set_display_attribute(&self, name: &str) -> Result<(), PendantError> {
        self.handle.set_display_attribute(name)
    }

    fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    fn disconnect(&self) {
        self.handle.disconnect();
    }
}

impl<C: Connector> fmt::Display for Hb04<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.handle, f)
    }
}

impl<C: Connector> Drop for Hb04<C> {
    fn drop(&mut self) {
        self.handle.disconnect();
    }
}
