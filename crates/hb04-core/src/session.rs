//! Device session - owns the pendant connection and its worker threads.
//!
//! One thread polls for the device, then a receive loop and a display loop
//! run side by side until the connection fails or the session is shut down.
//! Transport failures are recovered here; only invariant violations reach
//! the fatal hook.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::axis::AxisSet;
use crate::display::{DisplayState, frame_content};
use crate::events::{PendantEvent, SessionEvent, SessionObserver};
use crate::protocol::codec::{decode_report, encode_frame, packetize};
use crate::protocol::constants::{
    BUSY_BACKOFF_MS, DISCOVERY_POLL_MS, DISPLAY_PERIOD_MS, HB04_INTERFACE, HB04_PRODUCT_ID,
    HB04_VENDOR_ID, MAX_READ_SIZE, NO_DEVICE_BACKOFF_MS, READ_TIMEOUT_MS, RECONNECT_PAUSE_MS,
    WRITE_TIMEOUT_MS,
};
use crate::protocol::tables::AxisSwitch;
use crate::state::{ConnectionState, SessionState};
use crate::transport::{Connector, ControlRequest, PendantTransport, TransportError};

/// Configuration for a pendant session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendantConfig {
    /// USB vendor ID to search for.
    pub vendor_id: u16,
    /// USB product ID to search for.
    pub product_id: u16,
    /// Interface to claim.
    pub interface: u8,
    /// Delay between discovery attempts.
    pub discovery_poll_ms: u64,
    /// Receive loop read timeout.
    pub read_timeout_ms: u64,
    /// Timeout for each display packet.
    pub write_timeout_ms: u64,
    /// Display refresh period.
    pub display_period_ms: u64,
    /// Pause before reconnecting.
    pub reconnect_pause_ms: u64,
    /// Wait after the device vanished before rediscovery.
    pub no_device_backoff_ms: u64,
    /// Wait after a busy error before reconnecting.
    pub busy_backoff_ms: u64,
}

impl Default for PendantConfig {
    fn default() -> Self {
        Self {
            vendor_id: HB04_VENDOR_ID,
            product_id: HB04_PRODUCT_ID,
            interface: HB04_INTERFACE,
            discovery_poll_ms: DISCOVERY_POLL_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
            write_timeout_ms: WRITE_TIMEOUT_MS,
            display_period_ms: DISPLAY_PERIOD_MS,
            reconnect_pause_ms: RECONNECT_PAUSE_MS,
            no_device_backoff_ms: NO_DEVICE_BACKOFF_MS,
            busy_backoff_ms: BUSY_BACKOFF_MS,
        }
    }
}

impl PendantConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PendantConfig = toml::from_str(&content)?;
        Ok(config)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }
}

/// Errors that stop the session for good.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("Event handler failed: {0}")]
    HandlerFault(String),

    #[error("Found HB04 but failed to connect: {0}")]
    MissingEndpoint(String),

    #[error("Can't find axis {0}")]
    UnknownAxis(String),
}

/// Called after the session has been disconnected by a fatal error.
pub type FatalHook = Arc<dyn Fn(&FatalError) + Send + Sync>;

/// Default fatal hook: terminate the process.
pub fn exit_process() -> FatalHook {
    Arc::new(|_err: &FatalError| std::process::exit(1))
}

/// Receives every decoded input report, on the receive thread.
pub type EventHandler = dyn Fn(&PendantEvent) -> Result<()> + Send + Sync;

/// Shared state of one pendant connection.
pub struct DeviceSession<C: Connector> {
    config: PendantConfig,
    connector: C,
    /// The single open connection, swapped on rediscovery.
    transport: RwLock<Option<Arc<C::Transport>>>,
    /// Serializes frame assembly and transmission.
    write_lock: Mutex<()>,
    /// Set once any connection detached the kernel driver; never cleared.
    kernel_driver_detached: AtomicBool,
    /// Receive and display loops of the current connection.
    workers: Mutex<Vec<JoinHandle<()>>>,
    state: SessionState,
    axes: AxisSet,
    display: DisplayState,
    axis_switch: AtomicU8,
    handler: RwLock<Option<Arc<EventHandler>>>,
    observer: Arc<dyn SessionObserver>,
    fatal_hook: FatalHook,
}

impl<C: Connector> DeviceSession<C> {
    pub fn new(
        connector: C,
        config: PendantConfig,
        observer: Arc<dyn SessionObserver>,
        fatal_hook: FatalHook,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            transport: RwLock::new(None),
            write_lock: Mutex::new(()),
            kernel_driver_detached: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            state: SessionState::new(),
            axes: AxisSet::new(),
            display: DisplayState::new(),
            axis_switch: AtomicU8::new(AxisSwitch::Off.code()),
            handler: RwLock::new(None),
            observer,
            fatal_hook,
        })
    }

    /// Begin discovery on a background thread.
    pub fn start(self: &Arc<Self>) {
        let session = Arc::clone(self);
        spawn_named("hb04-connect", move || session.connect());
    }

    pub fn axes(&self) -> &AxisSet {
        &self.axes
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    /// Last axis selector position reported by the device.
    pub fn axis_switch(&self) -> AxisSwitch {
        AxisSwitch::from_code(self.axis_switch.load(Ordering::Relaxed)).unwrap_or(AxisSwitch::Off)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.current()
    }

    /// True while listening or reconnecting.
    pub fn is_running(&self) -> bool {
        self.state.is_active()
    }

    /// Replace the event handler.
    pub fn set_handler(&self, handler: Arc<EventHandler>) {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }

    fn goto_state(&self, to: ConnectionState) {
        if let Some(from) = self.state.goto_state(to) {
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn transport(&self) -> Option<Arc<C::Transport>> {
        self.transport
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_transport(&self) -> Option<Arc<C::Transport>> {
        self.transport
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Install a freshly opened device, optionally raising `running` with it.
    ///
    /// Checked against shutdown under the slot lock that `disconnect` also
    /// takes, so a device opened after shutdown is released instead.
    fn adopt(&self, transport: C::Transport, listening: bool) -> bool {
        if transport.detached_kernel_driver() {
            self.kernel_driver_detached.store(true, Ordering::SeqCst);
        }

        let mut slot = self.transport.write().unwrap_or_else(|e| e.into_inner());
        if self.state.is_disconnecting() {
            drop(slot);
            debug!("Opened device after shutdown, releasing it");
            self.release(&transport);
            return false;
        }
        *slot = Some(Arc::new(transport));
        if listening {
            self.state.set_running(true);
        }
        true
    }

    /// Hand the device back to the kernel if any connection detached it.
    fn release(&self, transport: &C::Transport) {
        if !self.kernel_driver_detached.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = transport.reattach_kernel_driver() {
            debug!(error = %e, "Kernel driver reattach failed");
        }
    }

    /// Poll until the device opens. `None` when shutting down or on a fatal error.
    #[instrument(skip(self))]
    fn acquire(&self) -> Option<C::Transport> {
        let (vid, pid) = self.connector.ids();
        let poll = PendantConfig::ms(self.config.discovery_poll_ms);
        let mut announced = false;
        let mut open_error_reported = false;

        loop {
            if self.state.is_disconnecting() {
                return None;
            }

            match self.connector.open() {
                Ok(transport) => {
                    self.emit(SessionEvent::DeviceConnected {
                        vid: transport.vendor_id(),
                        pid: transport.product_id(),
                    });
                    return Some(transport);
                }
                Err(e) if e.is_configuration_fault() => {
                    self.fatal(FatalError::MissingEndpoint(e.to_string()));
                    return None;
                }
                Err(TransportError::DeviceNotFound { .. }) => {
                    if !announced {
                        self.emit(SessionEvent::WaitingForDevice { vid, pid });
                        announced = true;
                    }
                }
                Err(e) => {
                    if open_error_reported {
                        debug!(error = %e, "Open failed");
                    } else {
                        self.emit(SessionEvent::OpenFailed {
                            message: e.to_string(),
                        });
                        open_error_reported = true;
                    }
                }
            }

            thread::sleep(poll);
        }
    }

    /// Connecting -> Listening.
    fn connect(self: &Arc<Self>) {
        self.goto_state(ConnectionState::Connecting);

        let Some(transport) = self.acquire() else {
            return;
        };
        if !self.adopt(transport, true) {
            return;
        }

        self.start_listening();
        self.refresh_display();
    }

    fn start_listening(self: &Arc<Self>) {
        self.goto_state(ConnectionState::Listening);

        let session = Arc::clone(self);
        let listener = spawn_named("hb04-listener", move || session.receive_loop());
        let session = Arc::clone(self);
        let display = spawn_named("hb04-display", move || session.display_loop());

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.extend(listener);
        workers.extend(display);
    }

    /// Wait for the loops of the previous connection to exit.
    fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            if worker.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }

    fn receive_loop(self: &Arc<Self>) {
        debug!("Listener running");
        let read_timeout = PendantConfig::ms(self.config.read_timeout_ms);

        while self.state.is_running() {
            let Some(transport) = self.transport() else {
                break;
            };

            match transport.read(MAX_READ_SIZE, read_timeout) {
                Ok(data) => self.handle_report(&data),
                Err(TransportError::Timeout { .. }) => continue,
                Err(TransportError::NoDevice) => {
                    drop(transport);
                    self.emit(SessionEvent::DeviceLost);
                    thread::sleep(PendantConfig::ms(self.config.no_device_backoff_ms));
                    if !self.rediscover() {
                        break;
                    }
                }
                Err(TransportError::Busy) => {
                    self.emit(SessionEvent::DeviceBusy);
                    thread::sleep(PendantConfig::ms(self.config.busy_backoff_ms));
                    self.spawn_reconnect();
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "USB error - reconnecting");
                    self.spawn_reconnect();
                    break;
                }
            }
        }
        debug!("Listener stopped");
    }

    /// Swap in a freshly opened device without restarting the loops.
    fn rediscover(&self) -> bool {
        self.take_transport();
        let Some(transport) = self.acquire() else {
            return false;
        };
        if !self.adopt(transport, false) {
            return false;
        }
        self.refresh_display();
        true
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let session = Arc::clone(self);
        spawn_named("hb04-reconnect", move || session.reconnect());
    }

    /// Listening -> Reconnecting -> Connecting.
    fn reconnect(self: &Arc<Self>) {
        if self.state.is_disconnecting() {
            return;
        }
        self.state.set_reconnecting(true);
        self.state.set_running(false);
        self.goto_state(ConnectionState::Reconnecting);

        thread::sleep(PendantConfig::ms(self.config.reconnect_pause_ms));
        self.join_workers();
        // Kernel driver stays detached; the next connection inherits it
        self.take_transport();
        self.state.set_reconnecting(false);

        if self.state.is_disconnecting() {
            return;
        }
        self.connect();
    }

    fn handle_report(&self, data: &[u8]) {
        let event = match decode_report(data) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, report = ?data, "Dropping report");
                return;
            }
        };
        self.axis_switch.store(event.axis.code(), Ordering::Relaxed);

        let handler = self
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(handler) = handler else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fatal(FatalError::HandlerFault(format!("{e:#}"))),
            Err(payload) => self.fatal(FatalError::HandlerFault(panic_message(&*payload))),
        }
    }

    fn display_loop(&self) {
        debug!("Display updater running");
        let period = PendantConfig::ms(self.config.display_period_ms);
        while self.state.is_running() {
            self.refresh_display();
            thread::sleep(period);
        }
        debug!("Display updater stopped");
    }

    /// Build a frame from the current state and send it.
    ///
    /// Failures are logged and dropped; the next tick retries.
    pub fn refresh_display(&self) {
        let failure = self.send_frame();
        if let Some(e) = failure {
            self.emit(SessionEvent::WriteFailed {
                message: e.to_string(),
            });
        }
    }

    /// One frame under the write lock. Returns the first write error.
    fn send_frame(&self) -> Option<TransportError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let transport = self.transport()?;

        let content = frame_content(&self.axes, &self.display, self.axis_switch());
        let packets = match encode_frame(&content).and_then(|frame| packetize(&frame)) {
            Ok(packets) => packets,
            Err(e) => {
                error!(error = %e, "Failed to build display frame");
                return None;
            }
        };

        let timeout = PendantConfig::ms(self.config.write_timeout_ms);
        for packet in &packets {
            let result = transport
                .control_write(ControlRequest::DISPLAY_UPDATE, packet, timeout)
                .and_then(|n| {
                    if n == packet.len() {
                        Ok(())
                    } else {
                        Err(TransportError::ShortWrite {
                            expected: packet.len(),
                            actual: n,
                        })
                    }
                });
            if let Err(e) = result {
                return Some(e);
            }
        }
        None
    }

    /// Log, shut down, then hand over to the fatal hook.
    pub fn fatal(&self, err: FatalError) {
        self.emit(SessionEvent::Fatal {
            message: err.to_string(),
        });
        self.disconnect();
        (self.fatal_hook)(&err);
    }

    /// Stop all loops and give the device back to the kernel. Idempotent.
    ///
    /// Waits for an in-flight frame, so nothing is written afterwards.
    pub fn disconnect(&self) {
        let transport = {
            let _frame = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut slot = self.transport.write().unwrap_or_else(|e| e.into_inner());
            if !self.state.begin_disconnect() {
                return;
            }
            slot.take()
        };
        self.goto_state(ConnectionState::Disconnected);

        if let Some(transport) = transport {
            self.release(&transport);
        }
    }
}

fn spawn_named<F>(name: &str, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.to_string()).spawn(f) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(thread = name, error = %e, "Failed to spawn thread");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::protocol::codec::encode_float;
    use crate::protocol::constants::PACKET_COUNT;
    use crate::protocol::tables::Button;
    use crate::transport::{MockConnector, MockOpen, MockRead, MockTransport};
    use std::sync::Condvar;
    use std::time::Instant;

    pub(crate) fn fast_config() -> PendantConfig {
        PendantConfig {
            discovery_poll_ms: 5,
            read_timeout_ms: 20,
            write_timeout_ms: 20,
            display_period_ms: 50,
            reconnect_pause_ms: 80,
            no_device_backoff_ms: 20,
            busy_backoff_ms: 20,
            ..PendantConfig::default()
        }
    }

    pub(crate) fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    pub(crate) fn handler<F>(f: F) -> Arc<EventHandler>
    where
        F: Fn(&PendantEvent) -> Result<()> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    pub(crate) fn recording_hook() -> (FatalHook, Arc<Mutex<Vec<FatalError>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: FatalHook = Arc::new(move |e: &FatalError| sink.lock().unwrap().push(e.clone()));
        (hook, seen)
    }

    /// Reassemble the most recent complete frame from captured packets.
    pub(crate) fn last_frame(transport: &MockTransport) -> Vec<u8> {
        let packets = transport.get_packets();
        let whole = packets.len() - packets.len() % PACKET_COUNT;
        packets[whole - PACKET_COUNT..whole]
            .iter()
            .flat_map(|p| p[1..].iter().copied())
            .collect()
    }

    fn start_session(
        connector: MockConnector,
    ) -> (Arc<DeviceSession<MockConnector>>, Arc<Mutex<Vec<FatalError>>>) {
        let (hook, fatals) = recording_hook();
        let session = DeviceSession::new(connector, fast_config(), Arc::new(NullObserver), hook);
        session.start();
        (session, fatals)
    }

    struct RecordingObserver(Mutex<Vec<SessionEvent>>);

    impl SessionObserver for RecordingObserver {
        fn on_event(&self, event: &SessionEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_connects_and_refreshes_periodically() {
        let transport = MockTransport::new();
        let (session, fatals) = start_session(MockConnector::with_device(transport.clone()));

        assert!(wait_until(Duration::from_secs(2), || session.is_running()));
        assert_eq!(session.connection_state(), ConnectionState::Listening);
        // Forced refresh plus at least two ticks
        assert!(wait_until(Duration::from_secs(2), || transport.write_count()
            >= 3 * PACKET_COUNT));

        for (request, packet) in transport.get_writes() {
            assert_eq!(request, ControlRequest::DISPLAY_UPDATE);
            assert_eq!(packet.len(), 8);
            assert_eq!(packet[0], 0x06);
        }
        assert_eq!(&last_frame(&transport)[..3], &[0xFE, 0xFD, 0x0C]);

        session.disconnect();
        assert!(!session.is_running());
        assert!(fatals.lock().unwrap().is_empty());
    }

    #[test]
    fn test_waits_for_device_and_announces_once() {
        let connector = MockConnector::new();
        connector.push(MockOpen::NotFound);
        connector.push(MockOpen::NotFound);
        connector.push(MockOpen::NotFound);
        connector.push(MockOpen::Device(MockTransport::new()));

        let observer = Arc::new(RecordingObserver(Mutex::new(Vec::new())));
        let (hook, _) = recording_hook();
        let session = DeviceSession::new(connector.clone(), fast_config(), observer.clone(), hook);
        session.start();

        assert!(wait_until(Duration::from_secs(2), || session.is_running()));
        assert_eq!(connector.attempts(), 4);
        let events = observer.0.lock().unwrap().clone();
        let waiting = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::WaitingForDevice { .. }))
            .count();
        assert_eq!(waiting, 1);
        assert!(events.contains(&SessionEvent::StateChanged {
            from: ConnectionState::Connecting,
            to: ConnectionState::Listening,
        }));
        session.disconnect();
    }

    #[test]
    fn test_report_reaches_handler_and_updates_switch() {
        let transport = MockTransport::new();
        let (session, _) = start_session(MockConnector::with_device(transport.clone()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.set_handler(handler(move |event| {
            sink.lock().unwrap().push(*event);
            Ok(())
        }));
        assert!(wait_until(Duration::from_secs(2), || session.is_running()));

        transport.queue_report(&[0x04, 0x0D, 0x00, 0x13, 0x81, 0x0D]);
        assert!(wait_until(Duration::from_secs(2), || !seen.lock().unwrap().is_empty()));

        let event = seen.lock().unwrap()[0];
        assert_eq!(event.button, Button::Step);
        assert_eq!(event.axis, AxisSwitch::Z);
        assert_eq!(event.increment, -127);
        assert_eq!(session.axis_switch(), AxisSwitch::Z);
        session.disconnect();
    }

    #[test]
    fn test_undecodable_report_is_dropped() {
        let transport = MockTransport::new();
        let (session, fatals) = start_session(MockConnector::with_device(transport.clone()));

        let calls = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&calls);
        session.set_handler(handler(move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        }));
        assert!(wait_until(Duration::from_secs(2), || session.is_running()));

        // Unmapped axis switch, then a short report, then a valid one
        transport.queue_report(&[0x04, 0x00, 0x00, 0x77, 0x01, 0x00]);
        transport.queue_report(&[0x04, 0x00, 0x00]);
        transport.queue_report(&[0x04, 0x00, 0x00, 0x12, 0x01, 0x00]);
        assert!(wait_until(Duration::from_secs(2), || *calls.lock().unwrap() == 1));
        thread::sleep(Duration::from_millis(50));

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(session.axis_switch(), AxisSwitch::Y);
        assert!(session.is_running());
        assert!(fatals.lock().unwrap().is_empty());
        session.disconnect();
    }

    #[test]
    fn test_handler_error_is_fatal() {
        let transport = MockTransport::new().with_detached_kernel_driver();
        let (session, fatals) = start_session(MockConnector::with_device(transport.clone()));
        session.set_handler(handler(|_| anyhow::bail!("boom")));
        assert!(wait_until(Duration::from_secs(2), || session.is_running()));

        transport.queue_report(&[0x04, 0x00, 0x00, 0x11, 0x00, 0x00]);
        assert!(wait_until(Duration::from_secs(2), || !fatals.lock().unwrap().is_empty()));

        assert_eq!(
            fatals.lock().unwrap()[0],
            FatalError::HandlerFault("boom".into())
        );
        assert!(!session.is_running());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.reattach_calls(), 1);
    }

    #[test]
    fn test_handler_panic_is_fatal() {
        let transport = MockTransport::new();
        let (session, fatals) = start_session(MockConnector::with_device(transport.clone()));
        session.set_handler(handler(|_| panic!("handler bug")));
        assert!(wait_until(Duration::from_secs(2), || session.is_running()));

        transport.queue_report(&[0x04, 0x00, 0x00, 0x11, 0x00, 0x00]);
        assert!(wait_until(Duration::from_secs(2), || !fatals.lock().unwrap().is_empty()));
        assert_eq!(
            fatals.lock().unwrap()[0],
            FatalError::HandlerFault("handler bug".into())
        );
        assert!(!session.is_running());
    }

    #[test]
    fn test_missing_endpoint_is_fatal() {
        let connector = MockConnector::new();
        connector.push(MockOpen::Error(TransportError::EndpointNotFound {
            ep_type: "Interrupt".into(),
            direction: "In".into(),
        }));
        let (session, fatals) = start_session(connector.clone());

        assert!(wait_until(Duration::from_secs(2), || !fatals.lock().unwrap().is_empty()));
        assert!(matches!(
            fatals.lock().unwrap()[0],
            FatalError::MissingEndpoint(_)
        ));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(connector.attempts(), 1);
        assert!(!session.is_running());
    }

    #[test]
    fn test_open_errors_keep_polling() {
        let connector = MockConnector::new();
        connector.push(MockOpen::Error(TransportError::OpenFailed(
            "permission denied".into(),
        )));
        connector.push(MockOpen::Device(MockTransport::new()));
        let (session, fatals) = start_session(connector);

        assert!(wait_until(Duration::from_secs(2), || session.is_running()));
        assert!(fatals.lock().unwrap().is_empty());
        session.disconnect();
    }

    #[test]
    fn test_no_device_rediscovers_in_place() {
        let first = MockTransport::new();
        let second = MockTransport::new();
        first.queue(MockRead::NoDevice);

        let connector = MockConnector::new();
        connector.push(MockOpen::Device(first.clone()));
        connector.push(MockOpen::NotFound);
        connector.push(MockOpen::Device(second.clone()));
        let (session, fatals) = start_session(connector.clone());

        assert!(wait_until(Duration::from_secs(2), || second.write_count() > 0));
        assert!(session.is_running());
        assert!(connector.attempts() >= 3);

        // Forced refresh, then the display loop keeps going on the new device
        let period = Duration::from_millis(fast_config().display_period_ms);
        assert!(wait_until(period * 4, || second.write_count() >= 2 * PACKET_COUNT));
        assert_eq!(session.connection_state(), ConnectionState::Listening);
        assert!(fatals.lock().unwrap().is_empty());
        session.disconnect();
    }

    #[test]
    fn test_busy_triggers_reconnect() {
        let first = MockTransport::new();
        let second = MockTransport::new();
        first.queue(MockRead::Busy);

        let connector = MockConnector::new();
        connector.push(MockOpen::Device(first.clone()));
        connector.push(MockOpen::Device(second.clone()));

        let observer = Arc::new(RecordingObserver(Mutex::new(Vec::new())));
        let (hook, _) = recording_hook();
        let session = DeviceSession::new(connector, fast_config(), observer.clone(), hook);
        session.start();

        assert!(wait_until(Duration::from_secs(2), || second.write_count() > 0));
        assert!(wait_until(Duration::from_secs(1), || session.connection_state()
            == ConnectionState::Listening));
        let events = observer.0.lock().unwrap().clone();
        assert!(events.contains(&SessionEvent::DeviceBusy));
        assert!(events.contains(&SessionEvent::StateChanged {
            from: ConnectionState::Listening,
            to: ConnectionState::Reconnecting,
        }));

        // The old connection is no longer written to
        let stale = first.write_count();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(first.write_count(), stale);
        session.disconnect();
    }

    #[test]
    fn test_other_error_triggers_reconnect() {
        let first = MockTransport::new();
        let second = MockTransport::new();
        first.queue(MockRead::Failure("pipe error".into()));

        let connector = MockConnector::new();
        connector.push(MockOpen::Device(first));
        connector.push(MockOpen::Device(second.clone()));
        let (session, _) = start_session(connector);

        assert!(wait_until(Duration::from_secs(2), || second.write_count() > 0));
        assert!(wait_until(Duration::from_secs(1), || session.is_running()));
        session.disconnect();
    }

    #[test]
    fn test_driver_detached_before_reconnect_is_reattached() {
        // Second open finds nothing to detach; the session still owes a reattach
        let first = MockTransport::new().with_detached_kernel_driver();
        let second = MockTransport::new();
        first.queue(MockRead::Busy);

        let connector = MockConnector::new();
        connector.push(MockOpen::Device(first.clone()));
        connector.push(MockOpen::Device(second.clone()));
        let (session, _) = start_session(connector);

        assert!(wait_until(Duration::from_secs(2), || second.write_count() > 0));
        assert!(wait_until(Duration::from_secs(1), || session.is_running()));

        session.disconnect();
        assert_eq!(second.reattach_calls(), 1);
        assert_eq!(first.reattach_calls(), 0);
    }

    #[test]
    fn test_reconnect_waits_for_previous_loops() {
        let config = PendantConfig {
            reconnect_pause_ms: 1,
            display_period_ms: 200,
            ..fast_config()
        };
        let first = MockTransport::new();
        let second = MockTransport::new();
        first.queue(MockRead::Failure("stall".into()));

        let connector = MockConnector::new();
        connector.push(MockOpen::Device(first.clone()));
        connector.push(MockOpen::Device(second.clone()));
        let (hook, _) = recording_hook();
        let session = DeviceSession::new(connector, config, Arc::new(NullObserver), hook);
        session.start();

        assert!(wait_until(Duration::from_secs(2), || second.write_count() > 0));
        // Only the new listener and display loop are left
        assert_eq!(session.workers.lock().unwrap().len(), 2);
        let stale = first.write_count();
        thread::sleep(Duration::from_millis(250));
        assert_eq!(first.write_count(), stale);
        session.disconnect();
    }

    /// Connector whose opens after the first block until `release`.
    #[derive(Clone)]
    struct GatedConnector {
        inner: MockConnector,
        gate: Arc<(Mutex<bool>, Condvar)>,
        blocked: Arc<AtomicBool>,
    }

    impl GatedConnector {
        fn new(inner: MockConnector) -> Self {
            Self {
                inner,
                gate: Arc::new((Mutex::new(false), Condvar::new())),
                blocked: Arc::new(AtomicBool::new(false)),
            }
        }

        fn release(&self) {
            let (open, cvar) = &*self.gate;
            *open.lock().unwrap() = true;
            cvar.notify_all();
        }
    }

    impl Connector for GatedConnector {
        type Transport = MockTransport;

        fn open(&self) -> Result<MockTransport, TransportError> {
            if self.inner.attempts() > 0 {
                self.blocked.store(true, Ordering::SeqCst);
                let (open, cvar) = &*self.gate;
                let mut open = open.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
            }
            self.inner.open()
        }

        fn ids(&self) -> (u16, u16) {
            self.inner.ids()
        }
    }

    #[test]
    fn test_device_opened_during_disconnect_is_released() {
        let first = MockTransport::new().with_detached_kernel_driver();
        let second = MockTransport::new();
        first.queue(MockRead::NoDevice);

        let inner = MockConnector::new();
        inner.push(MockOpen::Device(first.clone()));
        inner.push(MockOpen::Device(second.clone()));
        let connector = GatedConnector::new(inner);
        let (hook, _) = recording_hook();
        let session =
            DeviceSession::new(connector.clone(), fast_config(), Arc::new(NullObserver), hook);
        session.start();

        // Rediscovery is stuck inside open()
        assert!(wait_until(Duration::from_secs(2), || connector
            .blocked
            .load(Ordering::SeqCst)));
        session.disconnect();
        connector.release();

        assert!(wait_until(Duration::from_secs(2), || second.reattach_calls() == 1));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(second.write_count(), 0);
        assert_eq!(first.reattach_calls(), 0);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(!session.is_running());
    }

    #[test]
    fn test_write_failures_are_ignored() {
        let transport = MockTransport::new();
        transport.set_fail_writes(true);
        let (session, fatals) = start_session(MockConnector::with_device(transport.clone()));

        assert!(wait_until(Duration::from_secs(2), || session.is_running()));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(transport.write_count(), 0);

        transport.set_fail_writes(false);
        assert!(wait_until(Duration::from_secs(2), || transport.write_count()
            >= PACKET_COUNT));
        assert!(session.is_running());
        assert!(fatals.lock().unwrap().is_empty());
        session.disconnect();
    }

    #[test]
    fn test_refresh_sends_current_state() {
        let transport = MockTransport::new();
        let (session, _) = start_session(MockConnector::with_device(transport.clone()));
        assert!(wait_until(Duration::from_secs(2), || session.is_running()));

        session.axes().get(crate::axis::AxisId::Y).set_work_coordinate(-7.125);
        session.refresh_display();
        assert_eq!(&last_frame(&transport)[7..11], &encode_float(-7.125));
        session.disconnect();
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let transport = MockTransport::new().with_detached_kernel_driver();
        let (session, _) = start_session(MockConnector::with_device(transport.clone()));
        assert!(wait_until(Duration::from_secs(2), || session.is_running()));

        session.disconnect();
        session.disconnect();
        assert_eq!(transport.reattach_calls(), 1);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        // Loops wind down and stop writing
        thread::sleep(Duration::from_millis(100));
        let writes = transport.write_count();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(transport.write_count(), writes);
    }

    #[test]
    fn test_disconnect_stops_discovery() {
        let connector = MockConnector::new();
        let (session, _) = start_session(connector.clone());
        assert!(wait_until(Duration::from_secs(1), || connector.attempts() > 0));

        session.disconnect();
        thread::sleep(Duration::from_millis(30));
        let attempts = connector.attempts();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(connector.attempts(), attempts);
        assert!(!session.is_running());
    }

    #[test]
    fn test_load_config_from_toml() {
        let path = std::env::temp_dir().join(format!("hb04-config-{}.toml", std::process::id()));
        std::fs::write(&path, "product_id = 60273\ndisplay_period_ms = 250\n").unwrap();

        let config = PendantConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.product_id, 0xEB71);
        assert_eq!(config.display_period_ms, 250);
        assert_eq!(config.vendor_id, HB04_VENDOR_ID);
        assert_eq!(config.read_timeout_ms, READ_TIMEOUT_MS);
    }
}
