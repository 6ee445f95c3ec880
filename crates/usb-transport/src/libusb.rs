use crate::{ControlSetup, DeviceFilter, DeviceInfo, Result, TransportError, UsbTransport};
use rusb::{Device, DeviceDescriptor, DeviceHandle, GlobalContext};
use std::time::Duration;

/// Timeout for all control transfers unless overridden.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// libusb-backed device handle (via `rusb`).
pub struct LibusbDevice {
    handle: DeviceHandle<GlobalContext>,
    product_id: u16,
    timeout: Duration,
}

impl LibusbDevice {
    fn matching(filter: &DeviceFilter) -> Result<Vec<(Device<GlobalContext>, DeviceDescriptor)>> {
        let mut out = Vec::new();
        for device in rusb::devices().map_err(usb_err)?.iter() {
            let desc = device.device_descriptor().map_err(usb_err)?;
            if filter.matches(desc.vendor_id(), desc.product_id()) {
                out.push((device, desc));
            }
        }
        Ok(out)
    }
}

fn usb_err(e: rusb::Error) -> TransportError {
    match e {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::NoDevice | rusb::Error::NotFound => {
            TransportError::DeviceNotFound(e.to_string())
        }
        rusb::Error::NotSupported => TransportError::Unsupported("libusb operation not supported"),
        other => TransportError::Usb(other.to_string()),
    }
}

impl UsbTransport for LibusbDevice {
    fn open(filter: &DeviceFilter) -> Result<Self> {
        for (device, desc) in Self::matching(filter)? {
            let handle = device.open().map_err(usb_err)?;
            if let Some(want) = &filter.serial {
                // Devices without a readable serial never match an explicit request
                match handle.read_serial_number_string_ascii(&desc) {
                    Ok(serial) if &serial == want => {}
                    _ => continue,
                }
            }
            tracing::debug!(
                vid = desc.vendor_id(),
                pid = desc.product_id(),
                bus = device.bus_number(),
                address = device.address(),
                "opened usb device"
            );
            return Ok(Self {
                handle,
                product_id: desc.product_id(),
                timeout: DEFAULT_TIMEOUT,
            });
        }
        Err(TransportError::DeviceNotFound(format!(
            "vid=0x{:04X} serial={}",
            filter.vendor_id,
            filter.serial.as_deref().unwrap_or("any")
        )))
    }

    fn list(filter: &DeviceFilter) -> Result<Vec<DeviceInfo>> {
        let mut out = Vec::new();
        for (device, desc) in Self::matching(filter)? {
            // Still list devices we cannot open; the serial is just unknown
            let serial = device
                .open()
                .ok()
                .and_then(|h| h.read_serial_number_string_ascii(&desc).ok());
            out.push(DeviceInfo {
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                serial,
                bus: device.bus_number(),
                address: device.address(),
            });
        }
        Ok(out)
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn control_out(&mut self, setup: ControlSetup, data: &[u8]) -> Result<()> {
        let written = self
            .handle
            .write_control(
                setup.kind.request_type(false),
                setup.request,
                setup.value,
                setup.index,
                data,
                self.timeout,
            )
            .map_err(usb_err)?;
        if written != data.len() {
            return Err(TransportError::ShortTransfer {
                expected: data.len(),
                actual: written,
            });
        }
        Ok(())
    }

    fn control_in(&mut self, setup: ControlSetup, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        let n = self
            .handle
            .read_control(
                setup.kind.request_type(true),
                setup.request,
                setup.value,
                setup.index,
                &mut buf,
                self.timeout,
            )
            .map_err(usb_err)?;
        buf.truncate(n);
        Ok(buf)
    }
}
