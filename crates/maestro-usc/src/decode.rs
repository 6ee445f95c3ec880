//! Fixed-layout status records returned by the controller.
//!
//! All multi-byte fields are little-endian. Byte offsets:
//!
//! `ServoStatus` (7 bytes): position u16 @0, target u16 @2, speed u16 @4, acceleration u8 @6.
//!
//! Extended variables (8 bytes): stack pointer u8 @0, call-stack pointer u8 @1, errors u16 @2,
//! program counter u16 @4, script done u8 @6, performance flags u8 @7.
//!
//! Compact variables (96 bytes): stack pointer u8 @0, call-stack pointer u8 @1, errors u16 @2,
//! reserved 3 x u16 @4, stack 32 x i16 @10, call stack 10 x u16 @74, script done u8 @94,
//! reserved u8 @95. The compact GET_VARIABLES reply appends one `ServoStatus` per channel.

use crate::error::ProtocolError;
use crate::types::{DeviceVariables, ErrorFlags, FirmwareVersion, PerformanceFlags, ServoStatus};

pub const SERVO_STATUS_LEN: usize = 7;
pub const EXTENDED_VARIABLES_LEN: usize = 8;
pub const COMPACT_VARIABLES_LEN: usize = 96;
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

const COMPACT_STACK_OFFSET: usize = 10;
const COMPACT_STACK_SLOTS: usize = 32;
const COMPACT_CALL_STACK_OFFSET: usize = 74;
const COMPACT_CALL_STACK_SLOTS: usize = 10;
const COMPACT_SCRIPT_DONE_OFFSET: usize = 94;

fn expect_len(what: &'static str, buf: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if buf.len() != expected {
        return Err(ProtocolError::ShortRead {
            what,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn u16_at(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn i16_at(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub fn servo_status(buf: &[u8]) -> Result<ServoStatus, ProtocolError> {
    expect_len("servo status", buf, SERVO_STATUS_LEN)?;
    Ok(ServoStatus {
        position: u16_at(buf, 0),
        target: u16_at(buf, 2),
        speed: u16_at(buf, 4),
        acceleration: buf[6],
    })
}

/// Decode `servo_count` consecutive servo records.
pub fn servo_statuses(buf: &[u8], servo_count: u8) -> Result<Vec<ServoStatus>, ProtocolError> {
    expect_len(
        "servo status array",
        buf,
        usize::from(servo_count) * SERVO_STATUS_LEN,
    )?;
    buf.chunks_exact(SERVO_STATUS_LEN).map(servo_status).collect()
}

pub fn extended_variables(buf: &[u8]) -> Result<DeviceVariables, ProtocolError> {
    expect_len("variables", buf, EXTENDED_VARIABLES_LEN)?;
    Ok(DeviceVariables {
        stack_pointer: buf[0],
        call_stack_pointer: buf[1],
        errors: ErrorFlags(u16_at(buf, 2)),
        program_counter: Some(u16_at(buf, 4)),
        script_done: buf[6],
        performance_flags: Some(PerformanceFlags(buf[7])),
        stack: Vec::new(),
        call_stack: Vec::new(),
    })
}

pub fn compact_variables(buf: &[u8]) -> Result<DeviceVariables, ProtocolError> {
    expect_len("variables", buf, COMPACT_VARIABLES_LEN)?;
    let stack = (0..COMPACT_STACK_SLOTS)
        .map(|i| i16_at(buf, COMPACT_STACK_OFFSET + 2 * i))
        .collect();
    let call_stack = (0..COMPACT_CALL_STACK_SLOTS)
        .map(|i| u16_at(buf, COMPACT_CALL_STACK_OFFSET + 2 * i))
        .collect();
    Ok(DeviceVariables {
        stack_pointer: buf[0],
        call_stack_pointer: buf[1],
        errors: ErrorFlags(u16_at(buf, 2)),
        program_counter: None,
        script_done: buf[COMPACT_SCRIPT_DONE_OFFSET],
        performance_flags: None,
        stack,
        call_stack,
    })
}

/// Split and decode the combined compact GET_VARIABLES reply.
pub fn compact_status(
    buf: &[u8],
    servo_count: u8,
) -> Result<(DeviceVariables, Vec<ServoStatus>), ProtocolError> {
    expect_len(
        "variables and servo status",
        buf,
        COMPACT_VARIABLES_LEN + usize::from(servo_count) * SERVO_STATUS_LEN,
    )?;
    let (vars, servos) = buf.split_at(COMPACT_VARIABLES_LEN);
    Ok((compact_variables(vars)?, servo_statuses(servos, servo_count)?))
}

/// Extended-variant GET_STACK reply: `stack_size` signed slots.
pub fn stack(buf: &[u8], stack_size: u8) -> Result<Vec<i16>, ProtocolError> {
    expect_len("stack", buf, 2 * usize::from(stack_size))?;
    Ok(buf
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// Extended-variant GET_CALL_STACK reply: `call_stack_size` return addresses.
pub fn call_stack(buf: &[u8], call_stack_size: u8) -> Result<Vec<u16>, ProtocolError> {
    expect_len("call stack", buf, 2 * usize::from(call_stack_size))?;
    Ok(buf
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect())
}

fn bcd(byte: u8) -> u8 {
    (byte & 0x0F) + ((byte >> 4) & 0x0F) * 10
}

/// Firmware version from the bcdDevice field of the standard device descriptor.
pub fn firmware_version(descriptor: &[u8]) -> Result<FirmwareVersion, ProtocolError> {
    expect_len("device descriptor", descriptor, DEVICE_DESCRIPTOR_LEN)?;
    Ok(FirmwareVersion {
        minor: bcd(descriptor[12]),
        major: bcd(descriptor[13]),
    })
}
