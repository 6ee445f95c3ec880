use crate::{ControlSetup, DeviceFilter, DeviceInfo, Result};
use std::time::Duration;

/// A minimal blocking USB control-transfer interface.
///
/// Every call blocks until the transfer completes or fails. Implementations never retry.
pub trait UsbTransport {
    /// Open the first device matching `filter`.
    fn open(filter: &DeviceFilter) -> Result<Self>
    where
        Self: Sized;

    /// List the devices this backend can see that match `filter`.
    fn list(filter: &DeviceFilter) -> Result<Vec<DeviceInfo>>
    where
        Self: Sized;

    /// USB product id of the opened device.
    fn product_id(&self) -> u16;

    /// Per-transfer timeout. Backends without a real bus may ignore it.
    fn set_timeout(&mut self, _timeout: Duration) {}

    /// Host-to-device control transfer with an optional data stage.
    fn control_out(&mut self, setup: ControlSetup, data: &[u8]) -> Result<()>;

    /// Device-to-host control transfer; returns the bytes the device actually sent,
    /// which may be fewer than `length`.
    fn control_in(&mut self, setup: ControlSetup, length: usize) -> Result<Vec<u8>>;
}
