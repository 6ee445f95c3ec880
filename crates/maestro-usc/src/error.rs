use crate::params::Parameter;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Input rejected before any transfer was issued. The caller must correct it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{parameter} must be between {min} and {max} but the value given was {value}")]
    OutOfRange {
        parameter: Parameter,
        value: i64,
        min: u16,
        max: u16,
    },
    #[error("script is too long for device ({length} bytes, maximum {max})")]
    ScriptTooLong { length: usize, max: usize },
    #[error("subroutine {name} has opcode {opcode}, expected 128..=255")]
    SubroutineOpcode { name: String, opcode: u8 },
    #[error("subroutine {0} has an address but no command")]
    UnknownSubroutine(String),
    #[error("settings hold {actual} channels but the device has {expected}")]
    ChannelCount { expected: usize, actual: usize },
    #[error("channel {channel} is out of range for a {servo_count}-channel device")]
    InvalidChannel { channel: u8, servo_count: u8 },
}

/// Table or logic defect, or an incompatible device response. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid parameter id {0}, can not determine the range of this parameter")]
    UnknownParameter(u8),
    #[error("invalid channel number {0}")]
    InvalidChannel(u8),
    #[error("unknown product id 0x{0:04X}")]
    UnrecognizedProduct(u16),
    #[error("short read of {what}: expected {expected} bytes, got {actual}")]
    ShortRead {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("not supported on this device: {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] usb_transport::TransportError),
}

/// Non-fatal advisory produced while reconciling or applying settings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    ChannelsTruncated { provided: usize, supported: usize },
    ChannelsPadded { provided: usize, supported: usize },
    SerialDeviceNumberClamped { provided: u8 },
    ScriptInconsistent,
    ScriptMissing,
}

impl core::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Diagnostic::ChannelsTruncated { provided, supported } => write!(
                f,
                "the settings include {provided} channels but this device has only {supported}; \
                 the extra channel settings will be ignored"
            ),
            Diagnostic::ChannelsPadded { provided, supported } => write!(
                f,
                "the settings include only {provided} channels but this device has {supported}; \
                 the other channels will be initialized with default settings"
            ),
            Diagnostic::SerialDeviceNumberClamped { provided } => write!(
                f,
                "the serial device number must be less than 128 (got {provided}); \
                 it will be changed to 12"
            ),
            Diagnostic::ScriptInconsistent => {
                write!(f, "the compiled script does not match its source; it was not uploaded")
            }
            Diagnostic::ScriptMissing => {
                write!(f, "script upload was requested but the settings carry no compiled program")
            }
        }
    }
}
