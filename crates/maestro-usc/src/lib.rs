//! maestro-usc: settings, status and script transfer for Maestro USB servo controllers
//!
//! A [`DeviceSession`] drives one controller over any [`usb_transport::UsbTransport`]. The
//! controller family (compact 6-channel or extended 12/18/24-channel) is picked once from
//! the product id and never switched on again.

mod error;
pub use error::{Diagnostic, Error, ProtocolError, Result, ValidationError};

mod types;
pub use types::*;

mod params;
pub use params::{
    decode as decode_parameter, encode as encode_parameter, range_of, Parameter,
    ParameterDescriptor, ParameterWrite, Request, ServoAttribute, MAX_CHANNELS, POSITION_MAX,
    SERVO_PARAMETER_BYTES,
};

mod variant;
pub use variant::{
    channel_to_port, device_filter, CompactLayout, DeviceVariant, ExtendedLayout, StatusQuery,
    VariantLayout, PRODUCT_IDS, VENDOR_ID,
};

pub mod decode;

mod settings;
pub use settings::{
    bps_to_spbrg, decode_settings, encode_settings, exponential_speed_to_normal, fix_settings,
    home_to_raw, microseconds_to_period, microseconds_to_position, multiplier_to_raw,
    normal_speed_to_exponential, period_to_microseconds, position_to_microseconds, raw_to_home,
    spbrg_to_bps, DEFAULT_SERIAL_DEVICE_NUMBER, INSTRUCTION_FREQUENCY,
};

mod script;
pub use script::{ScriptBlock, ScriptImage, BLOCK_LEN, QUIT, SUBROUTINE_TABLE_LEN};

mod config;
pub use config::{SessionConfig, SettleDelays};

mod loader;
pub use loader::{load_program_file, load_session_config, load_settings_file, save_settings_file};

mod metrics;
pub use metrics::{MetricsHub, TransferMetrics};

mod session;
pub use session::DeviceSession;

#[cfg(test)]
mod testing;
