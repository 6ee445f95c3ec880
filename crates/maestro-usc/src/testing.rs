//! In-memory controller used by the session tests.

use std::collections::{BTreeMap, HashMap};
use usb_transport::{
    ControlSetup, DeviceFilter, DeviceInfo, Direction, RequestKind, Result, TransportError,
    UsbTransport,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub setup: ControlSetup,
    pub data: Vec<u8>,
}

/// Keeps a parameter store and script memory and answers reads from them.
///
/// Status requests return the canned buffer for their request code, or zeros.
pub struct SimulatedMaestro {
    product_id: u16,
    params: [u16; 256],
    blocks: BTreeMap<u16, [u8; 16]>,
    pub status: HashMap<u8, Vec<u8>>,
    pub descriptor: Vec<u8>,
    pub fail_on: Option<u8>,
    pub log: Vec<Transfer>,
}

impl SimulatedMaestro {
    pub fn new(product_id: u16) -> Self {
        Self {
            product_id,
            params: [0; 256],
            blocks: BTreeMap::new(),
            status: HashMap::new(),
            descriptor: vec![0; 18],
            fail_on: None,
            log: Vec::new(),
        }
    }

    pub fn param(&self, id: u8) -> u16 {
        self.params[usize::from(id)]
    }

    /// Script memory starting at `first_block`, unwritten bytes read as 0xFF.
    pub fn script_bytes(&self, first_block: u16, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let block = first_block + (i / 16) as u16;
                self.blocks.get(&block).map_or(0xFF, |b| b[i % 16])
            })
            .collect()
    }

    pub fn requests(&self) -> Vec<u8> {
        self.log.iter().map(|t| t.setup.request).collect()
    }

    fn check(&self, setup: &ControlSetup) -> Result<()> {
        if self.fail_on == Some(setup.request) {
            return Err(TransportError::Usb("simulated failure".into()));
        }
        Ok(())
    }
}

impl UsbTransport for SimulatedMaestro {
    fn open(filter: &DeviceFilter) -> Result<Self> {
        let pid = filter
            .product_ids
            .first()
            .copied()
            .ok_or_else(|| TransportError::DeviceNotFound("empty filter".into()))?;
        Ok(Self::new(pid))
    }

    fn list(_filter: &DeviceFilter) -> Result<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn control_out(&mut self, setup: ControlSetup, data: &[u8]) -> Result<()> {
        self.check(&setup)?;
        match setup.request {
            0x82 => {
                let id = usize::from(setup.index & 0xFF);
                let mask = if setup.index >> 8 == 1 { 0xFF } else { 0xFFFF };
                self.params[id] = setup.value & mask;
            }
            0xA0 => self.blocks.clear(),
            0xA1 => {
                let mut block = [0xFF; 16];
                let n = data.len().min(16);
                block[..n].copy_from_slice(&data[..n]);
                self.blocks.insert(setup.index, block);
            }
            _ => {}
        }
        self.log.push(Transfer {
            direction: Direction::Out,
            setup,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn control_in(&mut self, setup: ControlSetup, length: usize) -> Result<Vec<u8>> {
        self.check(&setup)?;
        let data = match (setup.kind, setup.request) {
            (RequestKind::Standard, 6) => self.descriptor.clone(),
            (RequestKind::Vendor, 0x81) => {
                let value = self.params[usize::from(setup.index & 0xFF)];
                value.to_le_bytes()[..length.min(2)].to_vec()
            }
            (_, request) => self
                .status
                .get(&request)
                .cloned()
                .unwrap_or_else(|| vec![0; length]),
        };
        self.log.push(Transfer {
            direction: Direction::In,
            setup,
            data: data.clone(),
        });
        Ok(data)
    }
}
