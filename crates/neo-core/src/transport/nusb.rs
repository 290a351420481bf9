//! nusb-based USB transport implementation.

use nusb::transfer::{Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{DeviceInfo, MaybeFuture, list_devices};
use nusb::io::{EndpointRead, EndpointWrite};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::traits::{NeoTransport, TransportError};
use crate::protocol::constants::{
    ALPHASMART_VENDOR_ID, DEFAULT_TIMEOUT_MS, NEO_COMMS_PRODUCT_ID, NEO_HID_PRODUCT_ID,
    USB_BLOCK_SIZE,
};

/// HID SET_REPORT request.
const HID_SET_REPORT: u8 = 0x09;
/// Output report, ID 0.
const HID_OUTPUT_REPORT: u16 = 0x0200;
/// Report values that switch a Neo out of keyboard mode.
const COMMS_SWITCH_SEQUENCE: std::ops::RangeInclusive<u8> = 0xe0..=0xe4;

/// True for a Neo enumerated as a keyboard.
pub fn is_hid_neo(info: &DeviceInfo) -> bool {
    info.vendor_id() == ALPHASMART_VENDOR_ID && info.product_id() == NEO_HID_PRODUCT_ID
}

/// True for a Neo ready for direct communication.
pub fn is_comms_neo(info: &DeviceInfo) -> bool {
    info.vendor_id() == ALPHASMART_VENDOR_ID && info.product_id() == NEO_COMMS_PRODUCT_ID
}

/// Stable identity for a device derived from its bus and port chain.
///
/// The Neo keeps its physical location across the HID to comms
/// re-enumeration, so the same value is reported in both modes.
pub fn location_identity(info: &DeviceInfo) -> u32 {
    info.bus_id()
        .bytes()
        .chain(info.port_chain().iter().copied())
        .fold(0x811c_9dc5u32, |hash, b| (hash ^ b as u32).wrapping_mul(0x0100_0193))
}

/// Ask a keyboard-mode Neo to re-enumerate in comms mode.
#[instrument(level = "info", skip(info), fields(identity = format!("{:08X}", location_identity(info))))]
pub fn switch_to_comms(info: &DeviceInfo) -> Result<(), TransportError> {
    let device = info
        .open()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    if let Some(config) = device.configurations().next() {
        if let Err(e) = device.set_configuration(config.configuration_value()).wait() {
            warn!(error = %e, "Set configuration failed, continuing");
        }
    }

    let interface = device
        .detach_and_claim_interface(1)
        .wait()
        .map_err(|e| TransportError::ClaimInterfaceFailed {
            interface: 1,
            message: e.to_string(),
        })?;

    for value in COMMS_SWITCH_SEQUENCE {
        interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_SET_REPORT,
                    value: HID_OUTPUT_REPORT,
                    index: 1,
                    data: &[value],
                },
                Duration::from_millis(DEFAULT_TIMEOUT_MS),
            )
            .wait()
            .map_err(|e| TransportError::ModeSwitchFailed(e.to_string()))?;
    }

    info!("Comms mode requested");
    Ok(())
}

/// nusb-based transport for a Neo in comms mode.
pub struct NusbTransport {
    reader: EndpointRead<Bulk>,
    writer: EndpointWrite<Bulk>,
    identity: u32,
    default_timeout: Duration,
}

impl NusbTransport {
    /// Open the first Neo found in comms mode.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(is_comms_neo)
            .ok_or(TransportError::DeviceNotFound {
                vid: ALPHASMART_VENDOR_ID,
                pid: NEO_COMMS_PRODUCT_ID,
            })?;

        Self::open_device_info(device_info)
    }

    pub fn open_device_info(device_info: DeviceInfo) -> Result<Self, TransportError> {
        let identity = location_identity(&device_info);

        info!(
            vendor_id = %format!("{:04X}", device_info.vendor_id()),
            product_id = %format!("{:04X}", device_info.product_id()),
            identity = %format!("{:08X}", identity),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface =
            device
                .claim_interface(0)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                })?;

        // First bulk pipe in each direction
        let mut in_endpoint: Option<u8> = None;
        let mut out_endpoint: Option<u8> = None;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != 0 {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() != nusb::descriptors::TransferType::Bulk {
                            continue;
                        }
                        if ep.direction() == nusb::transfer::Direction::In {
                            in_endpoint.get_or_insert(ep.address());
                        } else {
                            out_endpoint.get_or_insert(ep.address());
                        }
                    }
                }
            }
        }

        let in_endpoint = in_endpoint.ok_or_else(|| TransportError::EndpointNotFound {
            ep_type: "Bulk".into(),
            direction: "In".into(),
        })?;
        let out_endpoint = out_endpoint.ok_or_else(|| TransportError::EndpointNotFound {
            ep_type: "Bulk".into(),
            direction: "Out".into(),
        })?;

        let reader = interface
            .endpoint::<Bulk, In>(in_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .reader(USB_BLOCK_SIZE);
        let writer = interface
            .endpoint::<Bulk, Out>(out_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .writer(USB_BLOCK_SIZE);

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            reader,
            writer,
            identity,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Override the timeout applied when a call passes `None`.
    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    fn map_io(e: std::io::Error, timeout: Duration, write: bool) -> TransportError {
        match e.kind() {
            ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            ErrorKind::BrokenPipe | ErrorKind::NotConnected => TransportError::Disconnected,
            _ if write => TransportError::WriteFailed(e.to_string()),
            _ => TransportError::ReadFailed(e.to_string()),
        }
    }
}

impl NeoTransport for NusbTransport {
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.writer.set_write_timeout(timeout);

        for block in data.chunks(USB_BLOCK_SIZE) {
            self.writer
                .write_all(block)
                .and_then(|_| self.writer.flush())
                .map_err(|e| Self::map_io(e, timeout, true))?;
        }

        debug!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    #[instrument(level = "trace", skip(self, buf), fields(max_len = buf.len()))]
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.reader.set_read_timeout(timeout);

        let mut total = 0;
        while total < buf.len() {
            let want = (buf.len() - total).min(USB_BLOCK_SIZE);
            let n = self
                .reader
                .read(&mut buf[total..total + want])
                .map_err(|e| Self::map_io(e, timeout, false))?;
            total += n;

            // A short packet ends the transfer
            if n != USB_BLOCK_SIZE {
                break;
            }
        }

        debug!(bytes_read = total, "Read complete");
        Ok(total)
    }

    fn identity(&self) -> u32 {
        self.identity
    }
}
