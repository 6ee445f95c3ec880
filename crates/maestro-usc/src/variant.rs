//! Per-model constants and the two algorithms that differ between hardware families.
//!
//! The compact (6-channel) controller stores channel modes as two port bitmasks and reports
//! all status in one combined buffer. The extended (12/18/24-channel) controllers pack a
//! 2-bit mode per channel and answer one query per status category. The choice is made once,
//! from the product id, and carried as a `&'static dyn VariantLayout`.

use crate::decode;
use crate::error::ProtocolError;
use crate::params::{Parameter, Request};
use crate::types::{ChannelMode, StatusKind, StatusReport};
use core::fmt;
use usb_transport::DeviceFilter;

/// Pololu's USB vendor id.
pub const VENDOR_ID: u16 = 0x1FFB;

/// Product ids of the 6, 12, 18 and 24 channel models.
pub const PRODUCT_IDS: [u16; 4] = [0x0089, 0x008A, 0x008B, 0x008C];

/// Filter matching any supported controller, optionally by serial number.
pub fn device_filter(serial: Option<&str>) -> DeviceFilter {
    DeviceFilter {
        vendor_id: VENDOR_ID,
        product_ids: PRODUCT_IDS.to_vec(),
        serial: serial.map(str::to_string),
    }
}

/// One control transfer that fetches a status category.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusQuery {
    pub request: Request,
    pub length: usize,
}

/// Behaviour that differs between the compact and extended families.
pub trait VariantLayout: fmt::Debug + Send + Sync {
    fn is_compact(&self) -> bool;

    /// Parameters that hold the channel modes, in write order.
    fn mode_parameters(&self) -> &'static [Parameter];

    /// One raw value per entry of [`VariantLayout::mode_parameters`].
    fn encode_modes(&self, modes: &[ChannelMode]) -> Result<Vec<u16>, ProtocolError>;

    /// Inverse of [`VariantLayout::encode_modes`] for `servo_count` channels.
    fn decode_modes(&self, raw: &[u16], servo_count: u8) -> Result<Vec<ChannelMode>, ProtocolError>;

    fn status_query(&self, variant: &DeviceVariant, kind: StatusKind) -> StatusQuery;

    fn decode_status(
        &self,
        variant: &DeviceVariant,
        kind: StatusKind,
        buf: &[u8],
    ) -> Result<StatusReport, ProtocolError>;

    /// The extended firmware only completes a reinitialize after a variables read.
    fn refetch_after_reinitialize(&self) -> bool;
}

/// Physical port of a compact-variant channel. Ports 4 and 5 are not wired to channels.
pub fn channel_to_port(channel: u8) -> Result<u8, ProtocolError> {
    match channel {
        0..=3 => Ok(channel),
        4 | 5 => Ok(channel + 2),
        _ => Err(ProtocolError::InvalidChannel(channel)),
    }
}

#[derive(Debug)]
pub struct CompactLayout;

#[derive(Debug)]
pub struct ExtendedLayout;

static COMPACT: CompactLayout = CompactLayout;
static EXTENDED: ExtendedLayout = ExtendedLayout;

impl VariantLayout for CompactLayout {
    fn is_compact(&self) -> bool {
        true
    }

    fn mode_parameters(&self) -> &'static [Parameter] {
        &[Parameter::IO_MASK_C, Parameter::OUTPUT_MASK_C]
    }

    fn encode_modes(&self, modes: &[ChannelMode]) -> Result<Vec<u16>, ProtocolError> {
        let mut io_mask = 0u16;
        let mut output_mask = 0u16;
        for (channel, mode) in modes.iter().enumerate() {
            let channel =
                u8::try_from(channel).map_err(|_| ProtocolError::InvalidChannel(u8::MAX))?;
            let bit = 1u16 << channel_to_port(channel)?;
            match mode {
                ChannelMode::Input => io_mask |= bit,
                ChannelMode::Output => {
                    io_mask |= bit;
                    output_mask |= bit;
                }
                // No multiplier on this family; both servo modes clear the io bit.
                ChannelMode::Servo | ChannelMode::ServoMultiplied => {}
            }
        }
        Ok(vec![io_mask, output_mask])
    }

    fn decode_modes(
        &self,
        raw: &[u16],
        servo_count: u8,
    ) -> Result<Vec<ChannelMode>, ProtocolError> {
        let &[io_mask, output_mask] = raw else {
            return Err(ProtocolError::ShortRead {
                what: "channel mode masks",
                expected: 2,
                actual: raw.len(),
            });
        };
        (0..servo_count)
            .map(|channel| {
                let bit = 1u16 << channel_to_port(channel)?;
                Ok(if io_mask & bit == 0 {
                    ChannelMode::Servo
                } else if output_mask & bit == 0 {
                    ChannelMode::Input
                } else {
                    ChannelMode::Output
                })
            })
            .collect()
    }

    fn status_query(&self, variant: &DeviceVariant, _kind: StatusKind) -> StatusQuery {
        StatusQuery {
            request: Request::GetVariables,
            length: decode::COMPACT_VARIABLES_LEN
                + usize::from(variant.servo_count) * decode::SERVO_STATUS_LEN,
        }
    }

    fn decode_status(
        &self,
        variant: &DeviceVariant,
        kind: StatusKind,
        buf: &[u8],
    ) -> Result<StatusReport, ProtocolError> {
        let (variables, servos) = decode::compact_status(buf, variant.servo_count)?;
        Ok(match kind {
            StatusKind::Variables => StatusReport::Variables(variables),
            StatusKind::Servos => StatusReport::Servos(servos),
            StatusKind::Stack => StatusReport::Stack(variables.stack),
            StatusKind::CallStack => StatusReport::CallStack(variables.call_stack),
        })
    }

    fn refetch_after_reinitialize(&self) -> bool {
        false
    }
}

impl VariantLayout for ExtendedLayout {
    fn is_compact(&self) -> bool {
        false
    }

    fn mode_parameters(&self) -> &'static [Parameter] {
        &[
            Parameter::CHANNEL_MODES_0_3,
            Parameter::CHANNEL_MODES_4_7,
            Parameter::CHANNEL_MODES_8_11,
            Parameter::CHANNEL_MODES_12_15,
            Parameter::CHANNEL_MODES_16_19,
            Parameter::CHANNEL_MODES_20_23,
        ]
    }

    fn encode_modes(&self, modes: &[ChannelMode]) -> Result<Vec<u16>, ProtocolError> {
        let mut bytes = vec![0u16; self.mode_parameters().len()];
        for (channel, mode) in modes.iter().enumerate() {
            let slot = bytes
                .get_mut(channel >> 2)
                .ok_or(ProtocolError::InvalidChannel(channel as u8))?;
            *slot |= (*mode as u16) << ((channel & 3) << 1);
        }
        Ok(bytes)
    }

    fn decode_modes(
        &self,
        raw: &[u16],
        servo_count: u8,
    ) -> Result<Vec<ChannelMode>, ProtocolError> {
        (0..servo_count)
            .map(|channel| {
                let byte = raw
                    .get(usize::from(channel >> 2))
                    .copied()
                    .ok_or(ProtocolError::InvalidChannel(channel))?;
                Ok(ChannelMode::from_bits((byte >> ((channel & 3) << 1)) as u8))
            })
            .collect()
    }

    fn status_query(&self, variant: &DeviceVariant, kind: StatusKind) -> StatusQuery {
        let (request, length) = match kind {
            StatusKind::Variables => (Request::GetVariables, decode::EXTENDED_VARIABLES_LEN),
            StatusKind::Servos => (
                Request::GetServoSettings,
                usize::from(variant.servo_count) * decode::SERVO_STATUS_LEN,
            ),
            StatusKind::Stack => (Request::GetStack, 2 * usize::from(variant.stack_size)),
            StatusKind::CallStack => (
                Request::GetCallStack,
                2 * usize::from(variant.call_stack_size),
            ),
        };
        StatusQuery { request, length }
    }

    fn decode_status(
        &self,
        variant: &DeviceVariant,
        kind: StatusKind,
        buf: &[u8],
    ) -> Result<StatusReport, ProtocolError> {
        Ok(match kind {
            StatusKind::Variables => StatusReport::Variables(decode::extended_variables(buf)?),
            StatusKind::Servos => {
                StatusReport::Servos(decode::servo_statuses(buf, variant.servo_count)?)
            }
            StatusKind::Stack => StatusReport::Stack(decode::stack(buf, variant.stack_size)?),
            StatusKind::CallStack => {
                StatusReport::CallStack(decode::call_stack(buf, variant.call_stack_size)?)
            }
        })
    }

    fn refetch_after_reinitialize(&self) -> bool {
        true
    }
}

/// Constants and behaviour of one controller model, fixed for the session lifetime.
#[derive(Debug, Clone, Copy)]
pub struct DeviceVariant {
    pub product_id: u16,
    pub servo_count: u8,
    pub stack_size: u8,
    pub call_stack_size: u8,
    pub max_script_length: usize,
    /// Block index (16-byte blocks) of the subroutine table in script memory.
    pub subroutine_table_block_offset: u16,
    pub layout: &'static dyn VariantLayout,
}

impl DeviceVariant {
    pub fn from_product_id(product_id: u16) -> Result<Self, ProtocolError> {
        let servo_count = match product_id {
            0x0089 => 6,
            0x008A => 12,
            0x008B => 18,
            0x008C => 24,
            other => return Err(ProtocolError::UnrecognizedProduct(other)),
        };
        Ok(if servo_count == 6 {
            Self {
                product_id,
                servo_count,
                stack_size: 32,
                call_stack_size: 10,
                max_script_length: 1024,
                subroutine_table_block_offset: 64,
                layout: &COMPACT,
            }
        } else {
            Self {
                product_id,
                servo_count,
                stack_size: 126,
                call_stack_size: 126,
                max_script_length: 8192,
                subroutine_table_block_offset: 512,
                layout: &EXTENDED,
            }
        })
    }

    pub fn is_compact(&self) -> bool {
        self.layout.is_compact()
    }

    /// Only the 24-channel model has configurable pull-ups.
    pub fn has_pullups(&self) -> bool {
        self.servo_count > 18
    }

    pub fn channel_to_port(&self, channel: u8) -> Result<u8, ProtocolError> {
        channel_to_port(channel)
    }

    pub fn check_channel(&self, channel: u8) -> Result<(), crate::ValidationError> {
        if channel >= self.servo_count {
            return Err(crate::ValidationError::InvalidChannel {
                channel,
                servo_count: self.servo_count,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_ids_map_to_channel_counts() {
        let counts: Vec<u8> = PRODUCT_IDS
            .iter()
            .map(|&pid| DeviceVariant::from_product_id(pid).unwrap().servo_count)
            .collect();
        assert_eq!(counts, vec![6, 12, 18, 24]);
        assert!(matches!(
            DeviceVariant::from_product_id(0x0100),
            Err(ProtocolError::UnrecognizedProduct(0x0100))
        ));
    }

    #[test]
    fn compact_constants() {
        let v = DeviceVariant::from_product_id(0x0089).unwrap();
        assert!(v.is_compact());
        assert_eq!((v.stack_size, v.call_stack_size), (32, 10));
        assert_eq!(v.max_script_length, 1024);
        assert_eq!(v.subroutine_table_block_offset, 64);
        assert!(!v.has_pullups());
    }

    #[test]
    fn extended_constants() {
        for pid in [0x008A, 0x008B, 0x008C] {
            let v = DeviceVariant::from_product_id(pid).unwrap();
            assert!(!v.is_compact());
            assert_eq!((v.stack_size, v.call_stack_size), (126, 126));
            assert_eq!(v.max_script_length, 8192);
            assert_eq!(v.subroutine_table_block_offset, 512);
            assert_eq!(v.has_pullups(), pid == 0x008C);
        }
    }

    #[test]
    fn channel_to_port_skips_reserved_ports() {
        let ports: Vec<u8> = (0..6).map(|c| channel_to_port(c).unwrap()).collect();
        assert_eq!(ports, vec![0, 1, 2, 3, 6, 7]);
        for c in 6..=u8::MAX {
            assert_eq!(channel_to_port(c), Err(ProtocolError::InvalidChannel(c)));
        }
    }

    #[test]
    fn compact_output_sets_both_mask_bits_at_port() {
        let mut modes = vec![ChannelMode::Servo; 6];
        modes[5] = ChannelMode::Output;
        let raw = COMPACT.encode_modes(&modes).unwrap();
        assert_eq!(raw, vec![1 << 7, 1 << 7]);

        modes[1] = ChannelMode::Input;
        let raw = COMPACT.encode_modes(&modes).unwrap();
        assert_eq!(raw, vec![(1 << 7) | (1 << 1), 1 << 7]);
        assert_eq!(COMPACT.decode_modes(&raw, 6).unwrap(), modes);
    }

    #[test]
    fn compact_servo_multiplied_reads_back_as_servo() {
        let modes = vec![ChannelMode::ServoMultiplied; 6];
        let raw = COMPACT.encode_modes(&modes).unwrap();
        assert_eq!(raw, vec![0, 0]);
        assert_eq!(COMPACT.decode_modes(&raw, 6).unwrap(), vec![ChannelMode::Servo; 6]);
    }

    #[test]
    fn extended_packs_four_modes_per_byte() {
        let mut modes = vec![ChannelMode::Servo; 24];
        modes[0] = ChannelMode::Input;
        modes[5] = ChannelMode::Output;
        modes[23] = ChannelMode::ServoMultiplied;
        let raw = EXTENDED.encode_modes(&modes).unwrap();
        assert_eq!(raw, vec![0b11, 0b10 << 2, 0, 0, 0, 0b01 << 6]);
        assert_eq!(EXTENDED.decode_modes(&raw, 24).unwrap(), modes);
    }

    #[test]
    fn extended_twelve_channels_still_write_six_bytes() {
        let modes = vec![ChannelMode::Input; 12];
        let raw = EXTENDED.encode_modes(&modes).unwrap();
        assert_eq!(raw, vec![0xFF, 0xFF, 0xFF, 0, 0, 0]);
    }

    #[test]
    fn status_query_lengths() {
        let compact = DeviceVariant::from_product_id(0x0089).unwrap();
        let q = compact.layout.status_query(&compact, StatusKind::Stack);
        assert_eq!((q.request, q.length), (Request::GetVariables, 96 + 6 * 7));

        let ext = DeviceVariant::from_product_id(0x008B).unwrap();
        let q = ext.layout.status_query(&ext, StatusKind::Servos);
        assert_eq!((q.request, q.length), (Request::GetServoSettings, 18 * 7));
        let q = ext.layout.status_query(&ext, StatusKind::CallStack);
        assert_eq!((q.request, q.length), (Request::GetCallStack, 252));
    }
}
