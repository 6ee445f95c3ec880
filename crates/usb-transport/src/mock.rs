use crate::{
    ControlSetup, DeviceFilter, DeviceInfo, Result, Timestamp, TransportError, UsbTransport,
};
use std::collections::{HashMap, VecDeque};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Out,
    In,
}

/// One control transfer as seen by the mock device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferRecord {
    pub direction: Direction,
    pub setup: ControlSetup,
    /// Payload for OUT transfers, returned bytes for IN transfers.
    pub data: Vec<u8>,
    pub timestamp: Timestamp,
}

/// A simple in-process mock device. Each instance is independent.
///
/// OUT transfers are accepted and logged. IN transfers return the next queued response for
/// their request code, or a zero-filled buffer of the requested length.
pub struct MockDevice {
    product_id: u16,
    serial: String,
    log: Vec<TransferRecord>,
    responses: HashMap<u8, VecDeque<Vec<u8>>>,
    fail_after: Option<usize>,
}

impl MockDevice {
    pub fn new(product_id: u16) -> Self {
        Self {
            product_id,
            serial: "mock0".to_string(),
            log: Vec::new(),
            responses: HashMap::new(),
            fail_after: None,
        }
    }

    /// Queue the bytes returned by the next IN transfer with this request code.
    pub fn queue_response(&mut self, request: u8, data: impl Into<Vec<u8>>) {
        self.responses
            .entry(request)
            .or_default()
            .push_back(data.into());
    }

    /// Fail every transfer once `count` transfers have succeeded.
    pub fn fail_after(&mut self, count: usize) {
        self.fail_after = Some(count);
    }

    pub fn log(&self) -> &[TransferRecord] {
        &self.log
    }

    fn check_failure(&self) -> Result<()> {
        match self.fail_after {
            Some(n) if self.log.len() >= n => Err(TransportError::Usb("injected failure".into())),
            _ => Ok(()),
        }
    }

    fn record(&mut self, direction: Direction, setup: ControlSetup, data: Vec<u8>) {
        self.log.push(TransferRecord {
            direction,
            setup,
            data,
            timestamp: Timestamp(OffsetDateTime::now_utc()),
        });
    }
}

impl UsbTransport for MockDevice {
    fn open(filter: &DeviceFilter) -> Result<Self> {
        let product_id = filter
            .product_ids
            .first()
            .copied()
            .ok_or_else(|| TransportError::DeviceNotFound("no product id in filter".into()))?;
        let mut dev = Self::new(product_id);
        if let Some(serial) = &filter.serial {
            dev.serial = serial.clone();
        }
        Ok(dev)
    }

    fn list(filter: &DeviceFilter) -> Result<Vec<DeviceInfo>> {
        Ok(filter
            .product_ids
            .first()
            .map(|&product_id| DeviceInfo {
                vendor_id: filter.vendor_id,
                product_id,
                serial: Some("mock0".to_string()),
                bus: 0,
                address: 0,
            })
            .into_iter()
            .collect())
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn control_out(&mut self, setup: ControlSetup, data: &[u8]) -> Result<()> {
        self.check_failure()?;
        tracing::trace!(serial = %self.serial, %setup, len = data.len(), "mock control out");
        self.record(Direction::Out, setup, data.to_vec());
        Ok(())
    }

    fn control_in(&mut self, setup: ControlSetup, length: usize) -> Result<Vec<u8>> {
        self.check_failure()?;
        let data = self
            .responses
            .get_mut(&setup.request)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| vec![0u8; length]);
        tracing::trace!(serial = %self.serial, %setup, len = data.len(), "mock control in");
        self.record(Direction::In, setup, data.clone());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DeviceFilter {
        DeviceFilter {
            vendor_id: 0x1FFB,
            product_ids: vec![0x008A],
            serial: None,
        }
    }

    #[test]
    fn open_takes_first_product_id() -> anyhow::Result<()> {
        let dev = MockDevice::open(&filter())?;
        assert_eq!(dev.product_id(), 0x008A);
        assert_eq!(MockDevice::list(&filter())?.len(), 1);
        Ok(())
    }

    #[test]
    fn open_without_product_ids_fails() {
        let f = DeviceFilter {
            vendor_id: 0x1FFB,
            product_ids: Vec::new(),
            serial: None,
        };
        assert!(matches!(
            MockDevice::open(&f),
            Err(TransportError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn transfers_are_logged_in_order() -> anyhow::Result<()> {
        let mut dev = MockDevice::new(0x0089);
        dev.control_out(ControlSetup::vendor(0x85, 6000, 1), &[])?;
        dev.control_out(ControlSetup::vendor(0xA1, 0, 3), &[1, 2, 3])?;
        let log = dev.log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].setup.request, 0x85);
        assert_eq!(log[0].setup.value, 6000);
        assert_eq!(log[1].data, vec![1, 2, 3]);
        assert_eq!(log[1].direction, Direction::Out);
        Ok(())
    }

    #[test]
    fn queued_responses_are_returned_fifo_then_zero_filled() -> anyhow::Result<()> {
        let mut dev = MockDevice::new(0x0089);
        dev.queue_response(0x81, vec![0x34, 0x12]);
        dev.queue_response(0x81, vec![0x07]);
        assert_eq!(dev.control_in(ControlSetup::vendor(0x81, 0, 6), 2)?, vec![0x34, 0x12]);
        assert_eq!(dev.control_in(ControlSetup::vendor(0x81, 0, 3), 1)?, vec![0x07]);
        assert_eq!(dev.control_in(ControlSetup::vendor(0x81, 0, 3), 4)?, vec![0; 4]);
        Ok(())
    }

    #[test]
    fn injected_failure_stops_transfers() -> anyhow::Result<()> {
        let mut dev = MockDevice::new(0x0089);
        dev.fail_after(1);
        dev.control_out(ControlSetup::vendor(0x90, 0, 0), &[])?;
        assert!(dev.control_out(ControlSetup::vendor(0x90, 0, 0), &[]).is_err());
        assert_eq!(dev.log().len(), 1);
        Ok(())
    }

    #[test]
    fn request_type_bytes() {
        use crate::RequestKind;
        assert_eq!(RequestKind::Vendor.request_type(false), 0x40);
        assert_eq!(RequestKind::Vendor.request_type(true), 0xC0);
        assert_eq!(RequestKind::Standard.request_type(true), 0x80);
    }
}
