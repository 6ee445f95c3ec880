use core::fmt;
use time::OffsetDateTime;

/// Request type field of a control transfer setup packet (bits 6..5 of `bmRequestType`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RequestKind {
    Standard,
    Vendor,
}

impl RequestKind {
    /// `bmRequestType` for a device-recipient transfer in the given direction.
    pub fn request_type(self, device_to_host: bool) -> u8 {
        let kind = match self {
            RequestKind::Standard => 0x00,
            RequestKind::Vendor => 0x40,
        };
        if device_to_host {
            kind | 0x80
        } else {
            kind
        }
    }
}

/// Setup stage of a control transfer, minus direction and length.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ControlSetup {
    pub kind: RequestKind,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlSetup {
    pub fn vendor(request: u8, value: u16, index: u16) -> Self {
        Self {
            kind: RequestKind::Vendor,
            request,
            value,
            index,
        }
    }

    pub fn standard(request: u8, value: u16, index: u16) -> Self {
        Self {
            kind: RequestKind::Standard,
            request,
            value,
            index,
        }
    }
}

impl fmt::Display for ControlSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{kind:?} 0x{request:02X} value=0x{value:04X} index=0x{index:04X}",
            kind = self.kind,
            request = self.request,
            value = self.value,
            index = self.index
        )
    }
}

/// Selects which attached device a backend should open.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_ids: Vec<u16>,
    /// Match a specific serial number; `None` takes the first matching device.
    pub serial: Option<String>,
}

impl DeviceFilter {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id
            && (self.product_ids.is_empty() || self.product_ids.contains(&product_id))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
    pub bus: u8,
    pub address: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);
