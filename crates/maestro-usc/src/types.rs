use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ChannelMode {
    #[default]
    Servo = 0,
    ServoMultiplied = 1,
    Output = 2,
    Input = 3,
}

impl ChannelMode {
    /// Decode a 2-bit mode code; higher bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => ChannelMode::Servo,
            1 => ChannelMode::ServoMultiplied,
            2 => ChannelMode::Output,
            _ => ChannelMode::Input,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeMode {
    #[default]
    Off,
    Ignore,
    Goto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SerialMode {
    UsbDualPort = 0,
    UsbChained = 1,
    #[default]
    UartDetectBaudRate = 2,
    UartFixedBaudRate = 3,
}

impl SerialMode {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(SerialMode::UsbDualPort),
            1 => Some(SerialMode::UsbChained),
            2 => Some(SerialMode::UartDetectBaudRate),
            3 => Some(SerialMode::UartFixedBaudRate),
            _ => None,
        }
    }
}

/// Value of the SET_SCRIPT_DONE request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ScriptState {
    Run = 0,
    Stop = 1,
    Step = 2,
}

/// Configuration of one channel, in host units (quarter-microseconds for positions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSetting {
    pub name: String,
    pub mode: ChannelMode,
    pub home_mode: HomeMode,
    pub home: u16,
    pub minimum: u16,
    pub maximum: u16,
    pub neutral: u16,
    pub range: u16,
    pub speed: u16,
    pub acceleration: u8,
}

impl Default for ChannelSetting {
    fn default() -> Self {
        Self {
            name: String::new(),
            mode: ChannelMode::Servo,
            home_mode: HomeMode::Off,
            home: 6000,
            minimum: 3968,
            maximum: 8000,
            neutral: 6000,
            range: 1905,
            speed: 0,
            acceleration: 0,
        }
    }
}

/// Device-wide settings plus one [`ChannelSetting`] per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UscSettings {
    /// Compact variant only.
    pub servos_available: u8,
    /// Compact variant only.
    pub servo_period: u8,
    /// Extended variant only, quarter-microseconds (24 bits on the wire).
    pub mini_servo_period: u32,
    /// Extended variant only, effective range 1..=256.
    pub servo_multiplier: u16,
    pub serial_mode: SerialMode,
    /// Bits per second; 0 means autodetect.
    pub fixed_baud_rate: u32,
    pub enable_crc: bool,
    pub never_suspend: bool,
    pub serial_device_number: u8,
    pub mini_ssc_offset: u8,
    pub serial_timeout: u16,
    pub script_done: bool,
    /// 24-channel model only.
    pub enable_pullups: bool,
    pub channels: Vec<ChannelSetting>,
    /// Set by the external script compiler when `program` no longer matches the script source.
    pub script_inconsistent: bool,
    pub program: Option<CompiledProgram>,
}

impl Default for UscSettings {
    fn default() -> Self {
        Self {
            servos_available: 6,
            servo_period: 156,
            mini_servo_period: 80000,
            servo_multiplier: 1,
            serial_mode: SerialMode::UartDetectBaudRate,
            fixed_baud_rate: 9600,
            enable_crc: false,
            never_suspend: false,
            serial_device_number: 12,
            mini_ssc_offset: 0,
            serial_timeout: 0,
            script_done: true,
            enable_pullups: true,
            channels: Vec::new(),
            script_inconsistent: false,
            program: None,
        }
    }
}

/// How a subroutine is reached from the byte code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubroutineCommand {
    /// Invoked through a one-byte opcode (128..=255) that indexes the subroutine table.
    Opcode(u8),
    /// Only reachable through an explicit CALL with an inline address.
    CallOnly,
}

/// A compiled script, as produced by the external compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompiledProgram {
    pub byte_code: Vec<u8>,
    pub subroutine_addresses: BTreeMap<String, u16>,
    pub subroutine_commands: BTreeMap<String, SubroutineCommand>,
    pub checksum: u16,
}

/// Runtime state of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoStatus {
    pub position: u16,
    pub target: u16,
    pub speed: u16,
    pub acceleration: u8,
}

/// Error bitmask reported in the variables record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorFlags(pub u16);

impl ErrorFlags {
    pub const SERIAL_SIGNAL: u16 = 1 << 0;
    pub const SERIAL_OVERRUN: u16 = 1 << 1;
    pub const SERIAL_BUFFER_FULL: u16 = 1 << 2;
    pub const SERIAL_CRC: u16 = 1 << 3;
    pub const SERIAL_PROTOCOL: u16 = 1 << 4;
    pub const SERIAL_TIMEOUT: u16 = 1 << 5;
    pub const SCRIPT_STACK: u16 = 1 << 6;
    pub const SCRIPT_CALL_STACK: u16 = 1 << 7;
    pub const SCRIPT_PROGRAM_COUNTER: u16 = 1 << 8;

    pub fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the set bits, lowest first.
    pub fn names(self) -> Vec<&'static str> {
        const NAMES: [&str; 9] = [
            "serial signal",
            "serial overrun",
            "serial buffer full",
            "serial crc",
            "serial protocol",
            "serial timeout",
            "script stack",
            "script call stack",
            "script program counter",
        ];
        NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerformanceFlags(pub u8);

impl PerformanceFlags {
    pub const ADVANCED_UPDATE: u8 = 1 << 0;
    pub const BASIC_UPDATE: u8 = 1 << 1;
    pub const PERIOD: u8 = 1 << 2;

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }
}

/// Script interpreter state. The compact variant reports the stacks inline and has no
/// program counter or performance flags; the extended variant is the reverse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceVariables {
    pub stack_pointer: u8,
    pub call_stack_pointer: u8,
    pub errors: ErrorFlags,
    pub program_counter: Option<u16>,
    pub script_done: u8,
    pub performance_flags: Option<PerformanceFlags>,
    pub stack: Vec<i16>,
    pub call_stack: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Variables,
    Servos,
    Stack,
    CallStack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReport {
    Variables(DeviceVariables),
    Servos(Vec<ServoStatus>),
    Stack(Vec<i16>),
    CallStack(Vec<u16>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl core::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}
