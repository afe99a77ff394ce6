//! nusb-based USB transport implementation.

use std::io::{self, Read};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use nusb::descriptors::TransferType;
use nusb::io::EndpointRead;
use nusb::transfer::{
    Bulk, ControlOut, ControlType, Direction, In, Interrupt, Recipient, TransferError,
};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, trace};

use super::traits::{Connector, ControlRequest, PendantTransport, TransportError};
use crate::protocol::constants::{HB04_INTERFACE, HB04_PRODUCT_ID, HB04_VENDOR_ID};

/// Reader over whichever IN endpoint type the device exposes.
enum InReader {
    Interrupt(EndpointRead<Interrupt>),
    Bulk(EndpointRead<Bulk>),
}

impl InReader {
    fn read_with_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        match self {
            InReader::Interrupt(r) => {
                r.set_read_timeout(timeout);
                r.read(buf)
            }
            InReader::Bulk(r) => {
                r.set_read_timeout(timeout);
                r.read(buf)
            }
        }
    }
}

/// nusb-based pendant transport.
pub struct NusbTransport {
    device: Device,
    interface_number: u8,
    /// Released on kernel-driver reattach.
    interface: Mutex<Option<Interface>>,
    reader: Mutex<Option<InReader>>,
    in_endpoint: u8,
    detached_kernel_driver: bool,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open the first attached HB04.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        Self::open_with_ids(HB04_VENDOR_ID, HB04_PRODUCT_ID, HB04_INTERFACE)
    }

    /// Open a device with specific VID/PID.
    #[instrument(level = "debug", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16, interface: u8) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let detached_kernel_driver = detach_kernel_driver(&device, interface);

        let claimed = device.claim_interface(interface).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface,
                message: e.to_string(),
            }
        })?;

        // First IN endpoint of the default alt setting
        let mut in_endpoint: Option<(u8, TransferType)> = None;
        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != interface {
                    continue;
                }
                for alt in iface.alt_settings() {
                    if alt.alternate_setting() != 0 {
                        continue;
                    }
                    for ep in alt.endpoints() {
                        if in_endpoint.is_none() && ep.direction() == Direction::In {
                            in_endpoint = Some((ep.address(), ep.transfer_type()));
                        }
                    }
                }
            }
        }

        let reader = match in_endpoint {
            Some((addr, TransferType::Interrupt)) => claimed
                .endpoint::<Interrupt, In>(addr)
                .map(|ep| (addr, InReader::Interrupt(ep.reader(64))))
                .map_err(|e| TransportError::OpenFailed(e.to_string()))?,
            Some((addr, TransferType::Bulk)) => claimed
                .endpoint::<Bulk, In>(addr)
                .map(|ep| (addr, InReader::Bulk(ep.reader(64))))
                .map_err(|e| TransportError::OpenFailed(e.to_string()))?,
            _ => {
                return Err(TransportError::EndpointNotFound {
                    ep_type: "Interrupt/Bulk".into(),
                    direction: "In".into(),
                });
            }
        };
        let (in_endpoint, reader) = reader;

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            detached = detached_kernel_driver,
            "Device opened successfully"
        );

        Ok(Self {
            device,
            interface_number: interface,
            interface: Mutex::new(Some(claimed)),
            reader: Mutex::new(Some(reader)),
            in_endpoint,
            detached_kernel_driver,
            vid,
            pid,
        })
    }

    fn interface(&self) -> Result<Interface, TransportError> {
        lock(&self.interface)
            .clone()
            .ok_or_else(|| TransportError::WriteFailed("interface released".into()))
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn detach_kernel_driver(device: &Device, interface: u8) -> bool {
    // Fails when no kernel driver is bound, which is the common case.
    match device.detach_kernel_driver(interface) {
        Ok(()) => {
            debug!(interface, "Detached kernel driver");
            true
        }
        Err(e) => {
            trace!(interface, error = %e, "No kernel driver detached");
            false
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn detach_kernel_driver(_device: &Device, _interface: u8) -> bool {
    false
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn classify_read_error(e: io::Error, timeout: Duration) -> TransportError {
    match e.kind() {
        io::ErrorKind::TimedOut => TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        },
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotFound => TransportError::NoDevice,
        io::ErrorKind::ResourceBusy => TransportError::Busy,
        _ => TransportError::ReadFailed(e.to_string()),
    }
}

/// Split `bmRequestType` into nusb's control type and recipient.
fn split_request_type(request_type: u8) -> Result<(ControlType, Recipient), TransportError> {
    if request_type & 0x80 != 0 {
        return Err(TransportError::WriteFailed(format!(
            "request type 0x{request_type:02X} is device-to-host"
        )));
    }
    let control_type = match (request_type >> 5) & 0x03 {
        0 => ControlType::Standard,
        1 => ControlType::Class,
        2 => ControlType::Vendor,
        _ => {
            return Err(TransportError::WriteFailed(format!(
                "reserved request type 0x{request_type:02X}"
            )));
        }
    };
    let recipient = match request_type & 0x1F {
        0 => Recipient::Device,
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        _ => Recipient::Other,
    };
    Ok((control_type, recipient))
}

impl PendantTransport for NusbTransport {
    #[instrument(skip(self), fields(ep = self.in_endpoint))]
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut guard = lock(&self.reader);
        let reader = guard.as_mut().ok_or(TransportError::NoDevice)?;

        let mut buf = vec![0u8; max_len];
        let n = reader
            .read_with_timeout(&mut buf, timeout)
            .map_err(|e| classify_read_error(e, timeout))?;
        if n == 0 {
            return Err(TransportError::NoDevice);
        }

        buf.truncate(n);
        trace!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn control_write(
        &self,
        request: ControlRequest,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let (control_type, recipient) = split_request_type(request.request_type)?;
        let interface = self.interface()?;

        interface
            .control_out(
                ControlOut {
                    control_type,
                    recipient,
                    request: request.request,
                    value: request.value,
                    index: request.index,
                    data,
                },
                timeout,
            )
            .wait()
            .map_err(|e| match e {
                TransferError::Disconnected => TransportError::NoDevice,
                other => TransportError::WriteFailed(other.to_string()),
            })?;

        trace!(bytes_written = data.len(), "Control write complete");
        Ok(data.len())
    }

    fn detached_kernel_driver(&self) -> bool {
        self.detached_kernel_driver
    }

    fn reattach_kernel_driver(&self) -> Result<(), TransportError> {
        // The interface must be released before the kernel driver can bind.
        lock(&self.reader).take();
        lock(&self.interface).take();
        attach_kernel_driver(&self.device, self.interface_number)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn attach_kernel_driver(device: &Device, interface: u8) -> Result<(), TransportError> {
    device
        .attach_kernel_driver(interface)
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
    info!(interface, "Reattached kernel driver");
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn attach_kernel_driver(_device: &Device, _interface: u8) -> Result<(), TransportError> {
    Ok(())
}

/// Opens HB04s through nusb.
#[derive(Debug, Clone, Copy)]
pub struct NusbConnector {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
}

impl NusbConnector {
    pub fn new(vendor_id: u16, product_id: u16, interface: u8) -> Self {
        Self {
            vendor_id,
            product_id,
            interface,
        }
    }
}

impl Default for NusbConnector {
    fn default() -> Self {
        Self::new(HB04_VENDOR_ID, HB04_PRODUCT_ID, HB04_INTERFACE)
    }
}

impl Connector for NusbConnector {
    type Transport = NusbTransport;

    fn open(&self) -> Result<NusbTransport, TransportError> {
        NusbTransport::open_with_ids(self.vendor_id, self.product_id, self.interface)
    }

    fn ids(&self) -> (u16, u16) {
        (self.vendor_id, self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_display_request_type() {
        let (control_type, recipient) =
            split_request_type(ControlRequest::DISPLAY_UPDATE.request_type).unwrap();
        assert_eq!(control_type, ControlType::Class);
        assert_eq!(recipient, Recipient::Interface);
    }

    #[test]
    fn test_split_rejects_device_to_host() {
        assert!(split_request_type(0xA1).is_err());
    }

    #[test]
    fn test_classify_read_errors() {
        let timeout = Duration::from_millis(1000);
        assert!(matches!(
            classify_read_error(io::ErrorKind::TimedOut.into(), timeout),
            TransportError::Timeout { timeout_ms: 1000 }
        ));
        assert!(matches!(
            classify_read_error(io::ErrorKind::ConnectionAborted.into(), timeout),
            TransportError::NoDevice
        ));
        assert!(matches!(
            classify_read_error(io::ErrorKind::Other.into(), timeout),
            TransportError::ReadFailed(_)
        ));
    }
}
