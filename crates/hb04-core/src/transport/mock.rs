//! Mock transport for testing session logic without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::traits::{Connector, ControlRequest, PendantTransport, TransportError};
use crate::protocol::constants::{HB04_PRODUCT_ID, HB04_VENDOR_ID};

/// Scripted outcome of one `read` call.
#[derive(Debug, Clone)]
pub enum MockRead {
    Data(Vec<u8>),
    NoDevice,
    Busy,
    Failure(String),
}

/// Longest a mock read blocks when nothing is queued.
const IDLE_READ_CAP: Duration = Duration::from_millis(20);

/// Mock transport for unit testing session logic.
///
/// Clones share the same queues, so a test can keep one clone to script
/// reads and inspect writes while the session owns another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued read outcomes.
    reads: Arc<Mutex<VecDeque<MockRead>>>,
    /// Captured control writes.
    write_log: Arc<Mutex<Vec<(ControlRequest, Vec<u8>)>>>,
    /// Whether writes fail.
    fail_writes: Arc<AtomicBool>,
    reattach_calls: Arc<AtomicUsize>,
    detached: bool,
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            reads: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            reattach_calls: Arc::new(AtomicUsize::new(0)),
            detached: false,
            vid: HB04_VENDOR_ID,
            pid: HB04_PRODUCT_ID,
        }
    }

    /// Pretend the kernel driver was detached on open.
    pub fn with_detached_kernel_driver(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Queue a report to be returned on a later read.
    pub fn queue_report(&self, report: &[u8]) {
        self.queue(MockRead::Data(report.to_vec()));
    }

    pub fn queue(&self, read: MockRead) {
        self.reads.lock().unwrap().push_back(read);
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<(ControlRequest, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured packets only.
    pub fn get_packets(&self) -> Vec<Vec<u8>> {
        self.get_writes().into_iter().map(|(_, data)| data).collect()
    }

    pub fn write_count(&self) -> usize {
        self.write_log.lock().unwrap().len()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reattach_calls(&self) -> usize {
        self.reattach_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PendantTransport for MockTransport {
    fn read(&self, _max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let next = self.reads.lock().unwrap().pop_front();
        match next {
            Some(MockRead::Data(data)) => Ok(data),
            Some(MockRead::NoDevice) => Err(TransportError::NoDevice),
            Some(MockRead::Busy) => Err(TransportError::Busy),
            Some(MockRead::Failure(msg)) => Err(TransportError::ReadFailed(msg)),
            None => {
                thread::sleep(timeout.min(IDLE_READ_CAP));
                Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn control_write(
        &self,
        request: ControlRequest,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed("simulated failure".into()));
        }
        self.write_log
            .lock()
            .unwrap()
            .push((request, data.to_vec()));
        Ok(data.len())
    }

    fn detached_kernel_driver(&self) -> bool {
        self.detached
    }

    fn reattach_kernel_driver(&self) -> Result<(), TransportError> {
        self.reattach_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Scripted outcome of one `open` call.
pub enum MockOpen {
    Device(MockTransport),
    NotFound,
    Error(TransportError),
}

/// Connector handing out scripted transports.
///
/// Once the script is exhausted every `open` reports "not found".
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<MockOpen>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose first `open` succeeds with `transport`.
    pub fn with_device(transport: MockTransport) -> Self {
        let connector = Self::new();
        connector.push(MockOpen::Device(transport));
        connector
    }

    pub fn push(&self, outcome: MockOpen) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Number of `open` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn open(&self) -> Result<MockTransport, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(MockOpen::Device(t)) => Ok(t),
            Some(MockOpen::Error(e)) => Err(e),
            Some(MockOpen::NotFound) | None => Err(TransportError::DeviceNotFound {
                vid: HB04_VENDOR_ID,
                pid: HB04_PRODUCT_ID,
            }),
        }
    }

    fn ids(&self) -> (u16, u16) {
        (HB04_VENDOR_ID, HB04_PRODUCT_ID)
    }
}
