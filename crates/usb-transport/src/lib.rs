//! usb-transport: blocking USB control-transfer abstractions
//!
//! This crate provides the trait and types used to talk to vendor-class USB devices over
//! the default control pipe, with feature-gated backends. The default build enables a
//! `mock` backend so that binaries can compile on any host without libusb.

mod types;
pub use types::{ControlSetup, DeviceFilter, DeviceInfo, RequestKind, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::UsbTransport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{Direction, MockDevice, TransferRecord};

#[cfg(feature = "libusb")]
mod libusb;

#[cfg(feature = "libusb")]
pub use libusb::LibusbDevice;
