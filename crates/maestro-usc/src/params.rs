//! Request codes, parameter addresses and the parameter range table.
//!
//! Parameters live in the controller's non-volatile settings region. Each one has a fixed
//! width of one or two bytes and an inclusive legal range. Values travel little-endian.

use crate::error::{Error, ProtocolError, Result, ValidationError};
use core::fmt;
use serde::{Deserialize, Serialize};
use usb_transport::ControlSetup;

/// Vendor request codes understood by the controller firmware.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Request {
    GetParameter = 0x81,
    SetParameter = 0x82,
    GetVariables = 0x83,
    SetServoVariable = 0x84,
    SetTarget = 0x85,
    ClearErrors = 0x86,
    GetServoSettings = 0x87,
    // Extended variant only
    GetStack = 0x88,
    GetCallStack = 0x89,
    SetPwm = 0x8A,
    Reinitialize = 0x90,
    EraseScript = 0xA0,
    WriteScript = 0xA1,
    SetScriptDone = 0xA2,
    RestartScriptAtSubroutine = 0xA3,
    RestartScriptAtSubroutineWithParameter = 0xA4,
    RestartScript = 0xA5,
    StartBootloader = 0xFF,
}

impl Request {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn setup(self, value: u16, index: u16) -> ControlSetup {
        ControlSetup::vendor(self.code(), value, index)
    }
}

/// Address of a parameter in the settings region.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Parameter(pub u8);

impl Parameter {
    pub const INITIALIZED: Parameter = Parameter(0);
    pub const SERVOS_AVAILABLE: Parameter = Parameter(1);
    pub const SERVO_PERIOD: Parameter = Parameter(2);
    pub const SERIAL_MODE: Parameter = Parameter(3);
    pub const SERIAL_FIXED_BAUD_RATE: Parameter = Parameter(4);
    pub const SERIAL_TIMEOUT: Parameter = Parameter(6);
    pub const SERIAL_ENABLE_CRC: Parameter = Parameter(8);
    pub const SERIAL_NEVER_SUSPEND: Parameter = Parameter(9);
    pub const SERIAL_DEVICE_NUMBER: Parameter = Parameter(10);
    pub const SERIAL_BAUD_DETECT_TYPE: Parameter = Parameter(11);
    pub const CHANNEL_MODES_0_3: Parameter = Parameter(12);
    pub const CHANNEL_MODES_4_7: Parameter = Parameter(13);
    pub const CHANNEL_MODES_8_11: Parameter = Parameter(14);
    pub const CHANNEL_MODES_12_15: Parameter = Parameter(15);
    pub const CHANNEL_MODES_16_19: Parameter = Parameter(16);
    pub const CHANNEL_MODES_20_23: Parameter = Parameter(17);
    // The compact variant reuses 16 and 17 for its port masks.
    pub const IO_MASK_C: Parameter = Parameter(16);
    pub const OUTPUT_MASK_C: Parameter = Parameter(17);
    pub const MINI_SERVO_PERIOD_L: Parameter = Parameter(18);
    pub const MINI_SERVO_PERIOD_HU: Parameter = Parameter(19);
    pub const ENABLE_PULLUPS: Parameter = Parameter(21);
    pub const SCRIPT_CRC: Parameter = Parameter(22);
    pub const SCRIPT_DONE: Parameter = Parameter(24);
    pub const SERIAL_MINI_SSC_OFFSET: Parameter = Parameter(25);
    pub const SERVO_MULTIPLIER: Parameter = Parameter(26);
    /// First per-servo parameter (servo 0 home).
    pub const SERVO0_HOME: Parameter = Parameter(30);

    /// The per-servo parameter for `attribute` of `channel`.
    pub fn servo(attribute: ServoAttribute, channel: u8) -> Result<Parameter, ProtocolError> {
        if channel >= MAX_CHANNELS {
            return Err(ProtocolError::InvalidChannel(channel));
        }
        Ok(Parameter(
            Self::SERVO0_HOME.0 + attribute.offset() + channel * SERVO_PARAMETER_BYTES,
        ))
    }

    /// Inverse of [`Parameter::servo`].
    pub fn servo_attribute(self) -> Option<(ServoAttribute, u8)> {
        let rel = self.0.checked_sub(Self::SERVO0_HOME.0)?;
        let channel = rel / SERVO_PARAMETER_BYTES;
        if channel >= MAX_CHANNELS {
            return None;
        }
        let attribute = ServoAttribute::from_offset(rel % SERVO_PARAMETER_BYTES)?;
        Some((attribute, channel))
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::INITIALIZED => "initialized",
            Self::SERVOS_AVAILABLE => "servos available",
            Self::SERVO_PERIOD => "servo period",
            Self::SERIAL_MODE => "serial mode",
            Self::SERIAL_FIXED_BAUD_RATE => "serial fixed baud rate",
            Self::SERIAL_TIMEOUT => "serial timeout",
            Self::SERIAL_ENABLE_CRC => "serial enable crc",
            Self::SERIAL_NEVER_SUSPEND => "serial never suspend",
            Self::SERIAL_DEVICE_NUMBER => "serial device number",
            Self::SERIAL_BAUD_DETECT_TYPE => "serial baud detect type",
            Self::CHANNEL_MODES_0_3 => "channel modes 0-3",
            Self::CHANNEL_MODES_4_7 => "channel modes 4-7",
            Self::CHANNEL_MODES_8_11 => "channel modes 8-11",
            Self::CHANNEL_MODES_12_15 => "channel modes 12-15",
            Self::CHANNEL_MODES_16_19 => "channel modes 16-19 / io mask",
            Self::CHANNEL_MODES_20_23 => "channel modes 20-23 / output mask",
            Self::MINI_SERVO_PERIOD_L => "servo period (low byte)",
            Self::MINI_SERVO_PERIOD_HU => "servo period (upper bytes)",
            Self::ENABLE_PULLUPS => "enable pull-ups",
            Self::SCRIPT_CRC => "script crc",
            Self::SCRIPT_DONE => "script done",
            Self::SERIAL_MINI_SSC_OFFSET => "mini ssc offset",
            Self::SERVO_MULTIPLIER => "servo multiplier",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            return write!(f, "parameter {} ({name})", self.0);
        }
        match self.servo_attribute() {
            Some((attr, channel)) => write!(f, "parameter {} (servo {channel} {attr:?})", self.0),
            None => write!(f, "parameter {}", self.0),
        }
    }
}

/// Parameter slots reserved per channel.
pub const SERVO_PARAMETER_BYTES: u8 = 9;

/// Largest channel count of any variant.
pub const MAX_CHANNELS: u8 = 24;

/// Per-servo attributes, by offset from the channel's home parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ServoAttribute {
    Home,
    Min,
    Max,
    Neutral,
    Range,
    Speed,
    Acceleration,
}

impl ServoAttribute {
    pub fn offset(self) -> u8 {
        match self {
            ServoAttribute::Home => 0,
            ServoAttribute::Min => 2,
            ServoAttribute::Max => 3,
            ServoAttribute::Neutral => 4,
            ServoAttribute::Range => 6,
            ServoAttribute::Speed => 7,
            ServoAttribute::Acceleration => 8,
        }
    }

    fn from_offset(offset: u8) -> Option<Self> {
        match offset {
            0 => Some(ServoAttribute::Home),
            2 => Some(ServoAttribute::Min),
            3 => Some(ServoAttribute::Max),
            4 => Some(ServoAttribute::Neutral),
            6 => Some(ServoAttribute::Range),
            7 => Some(ServoAttribute::Speed),
            8 => Some(ServoAttribute::Acceleration),
            _ => None,
        }
    }
}

/// Width and inclusive legal range of one parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParameterDescriptor {
    pub id: Parameter,
    pub width: u8,
    pub min: u16,
    pub max: u16,
}

impl ParameterDescriptor {
    const fn new(id: Parameter, width: u8, min: u16, max: u16) -> Self {
        Self { id, width, min, max }
    }

    /// Range-check `value` and narrow it to the wire representation.
    pub fn check(&self, value: i64) -> Result<u16, ValidationError> {
        if value < i64::from(self.min) || value > i64::from(self.max) {
            return Err(ValidationError::OutOfRange {
                parameter: self.id,
                value,
                min: self.min,
                max: self.max,
            });
        }
        // In range, so it fits.
        Ok(value as u16)
    }
}

/// Highest valid home/neutral position in quarter-microseconds.
pub const POSITION_MAX: u16 = 32440;

/// Look up the descriptor of a parameter.
pub fn range_of(id: Parameter) -> Result<ParameterDescriptor, ProtocolError> {
    let d = ParameterDescriptor::new;
    let desc = match id {
        Parameter::INITIALIZED
        | Parameter::SERVOS_AVAILABLE
        | Parameter::SERVO_PERIOD
        | Parameter::MINI_SERVO_PERIOD_L
        | Parameter::SERVO_MULTIPLIER
        | Parameter::CHANNEL_MODES_0_3
        | Parameter::CHANNEL_MODES_4_7
        | Parameter::CHANNEL_MODES_8_11
        | Parameter::CHANNEL_MODES_12_15
        | Parameter::CHANNEL_MODES_16_19
        | Parameter::CHANNEL_MODES_20_23
        | Parameter::ENABLE_PULLUPS => d(id, 1, 0, 0xFF),
        Parameter::MINI_SERVO_PERIOD_HU
        | Parameter::SERIAL_TIMEOUT
        | Parameter::SERIAL_FIXED_BAUD_RATE
        | Parameter::SCRIPT_CRC => d(id, 2, 0, 0xFFFF),
        Parameter::SERIAL_NEVER_SUSPEND
        | Parameter::SERIAL_ENABLE_CRC
        | Parameter::SCRIPT_DONE
        | Parameter::SERIAL_BAUD_DETECT_TYPE => d(id, 1, 0, 1),
        Parameter::SERIAL_DEVICE_NUMBER => d(id, 1, 0, 0x7F),
        Parameter::SERIAL_MODE => d(id, 1, 0, 3),
        Parameter::SERIAL_MINI_SSC_OFFSET => d(id, 1, 0, 254),
        _ => match id.servo_attribute() {
            Some((ServoAttribute::Min | ServoAttribute::Max, _))
            | Some((ServoAttribute::Speed | ServoAttribute::Acceleration, _)) => d(id, 1, 0, 0xFF),
            Some((ServoAttribute::Home | ServoAttribute::Neutral, _)) => {
                d(id, 2, 0, POSITION_MAX)
            }
            Some((ServoAttribute::Range, _)) => d(id, 1, 1, 50),
            None => return Err(ProtocolError::UnknownParameter(id.0)),
        },
    };
    Ok(desc)
}

/// A validated parameter write, ready to go on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParameterWrite {
    pub descriptor: ParameterDescriptor,
    pub value: u16,
}

impl ParameterWrite {
    /// Validate `value` against the table entry for `id`.
    pub fn new(id: Parameter, value: i64) -> Result<Self> {
        let descriptor = range_of(id)?;
        let value = descriptor.check(value)?;
        Ok(Self { descriptor, value })
    }

    /// SET_PARAMETER carries the value in wValue and `(width << 8) | id` in wIndex.
    pub fn setup(&self) -> ControlSetup {
        let index = (u16::from(self.descriptor.width) << 8) | u16::from(self.descriptor.id.0);
        Request::SetParameter.setup(self.value, index)
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.value.to_le_bytes()[..usize::from(self.descriptor.width)].to_vec()
    }
}

/// Validate `value` and return its little-endian representation.
pub fn encode(id: Parameter, value: i64) -> Result<Vec<u8>> {
    Ok(ParameterWrite::new(id, value)?.bytes())
}

/// Reassemble a parameter value from the bytes the device returned. Not range-checked.
pub fn decode(id: Parameter, bytes: &[u8]) -> Result<u16> {
    let desc = range_of(id)?;
    match (desc.width, bytes) {
        (1, [lo]) => Ok(u16::from(*lo)),
        (2, [lo, hi]) => Ok(u16::from_le_bytes([*lo, *hi])),
        (width, _) => Err(Error::Protocol(ProtocolError::ShortRead {
            what: "parameter",
            expected: usize::from(width),
            actual: bytes.len(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLOBALS: &[u8] = &[
        0, 1, 2, 3, 4, 6, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 24, 25, 26,
    ];

    fn all_known() -> Vec<Parameter> {
        let mut out: Vec<Parameter> = GLOBALS.iter().map(|&id| Parameter(id)).collect();
        for ch in 0..MAX_CHANNELS {
            for attr in [
                ServoAttribute::Home,
                ServoAttribute::Min,
                ServoAttribute::Max,
                ServoAttribute::Neutral,
                ServoAttribute::Range,
                ServoAttribute::Speed,
                ServoAttribute::Acceleration,
            ] {
                out.push(Parameter::servo(attr, ch).unwrap());
            }
        }
        out
    }

    #[test]
    fn every_known_parameter_round_trips_its_whole_range() {
        for p in all_known() {
            let desc = range_of(p).unwrap();
            assert!(desc.width == 1 || desc.width == 2);
            assert!(desc.min <= desc.max);
            for v in desc.min..=desc.max {
                let bytes = encode(p, i64::from(v)).unwrap();
                assert_eq!(bytes.len(), usize::from(desc.width));
                assert_eq!(decode(p, &bytes).unwrap(), v, "{p}");
            }
        }
    }

    #[test]
    fn widths_and_ranges_match_firmware_table() {
        let cases = [
            (Parameter::SERIAL_FIXED_BAUD_RATE, 2, 0, 0xFFFF),
            (Parameter::SERIAL_DEVICE_NUMBER, 1, 0, 127),
            (Parameter::SERIAL_MINI_SSC_OFFSET, 1, 0, 254),
            (Parameter::SERIAL_MODE, 1, 0, 3),
            (Parameter::SCRIPT_DONE, 1, 0, 1),
            (Parameter::MINI_SERVO_PERIOD_HU, 2, 0, 0xFFFF),
            (Parameter(30), 2, 0, 32440),
            (Parameter(34), 2, 0, 32440),
            (Parameter(36), 1, 1, 50),
            (Parameter(37), 1, 0, 255),
            (Parameter(245), 1, 0, 255),
        ];
        for (p, width, min, max) in cases {
            let d = range_of(p).unwrap();
            assert_eq!((d.width, d.min, d.max), (width, min, max), "{p}");
        }
    }

    #[test]
    fn gaps_in_the_table_are_unknown() {
        for id in [5u8, 7, 20, 23, 27, 28, 29, 31, 35, 40, 246, 255] {
            assert_eq!(
                range_of(Parameter(id)),
                Err(ProtocolError::UnknownParameter(id))
            );
        }
    }

    #[test]
    fn servo_addressing_uses_nine_slots_per_channel() {
        assert_eq!(Parameter::servo(ServoAttribute::Home, 0).unwrap(), Parameter(30));
        assert_eq!(Parameter::servo(ServoAttribute::Speed, 0).unwrap(), Parameter(37));
        assert_eq!(Parameter::servo(ServoAttribute::Home, 1).unwrap(), Parameter(39));
        assert_eq!(Parameter::servo(ServoAttribute::Acceleration, 5).unwrap(), Parameter(83));
        assert_eq!(
            Parameter::servo(ServoAttribute::Home, 24),
            Err(ProtocolError::InvalidChannel(24))
        );
        assert_eq!(
            Parameter(83).servo_attribute(),
            Some((ServoAttribute::Acceleration, 5))
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = encode(Parameter::SERIAL_DEVICE_NUMBER, 128).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::OutOfRange { value: 128, max: 127, .. })
        ));
        assert!(encode(Parameter(36), 0).is_err());
        assert!(encode(Parameter::SERIAL_TIMEOUT, -1).is_err());
        assert!(encode(Parameter::SERIAL_TIMEOUT, 65536).is_err());
    }

    #[test]
    fn decode_rejects_wrong_width() {
        assert!(matches!(
            decode(Parameter::SERIAL_TIMEOUT, &[1]),
            Err(Error::Protocol(ProtocolError::ShortRead { expected: 2, actual: 1, .. }))
        ));
        assert!(matches!(
            decode(Parameter::SERIAL_MODE, &[]),
            Err(Error::Protocol(ProtocolError::ShortRead { expected: 1, actual: 0, .. }))
        ));
        assert!(matches!(
            decode(Parameter::SERIAL_TIMEOUT, &[1, 2, 3]),
            Err(Error::Protocol(ProtocolError::ShortRead { expected: 2, actual: 3, .. }))
        ));
    }

    #[test]
    fn set_parameter_setup_packs_width_into_index() {
        let w = ParameterWrite::new(Parameter::SERIAL_TIMEOUT, 0x1234).unwrap();
        let s = w.setup();
        assert_eq!(s.request, 0x82);
        assert_eq!(s.value, 0x1234);
        assert_eq!(s.index, 0x0206);
        assert_eq!(w.bytes(), vec![0x34, 0x12]);
    }
}
