//! Script memory image: byte code blocks, the subroutine table and the script checksum.

use crate::error::ValidationError;
use crate::types::{CompiledProgram, SubroutineCommand};
use crate::variant::DeviceVariant;

/// Terminator appended after the last instruction when there is room for it.
pub const QUIT: u8 = 0x00;

/// Payload size of one WRITE_SCRIPT transfer.
pub const BLOCK_LEN: usize = 16;

/// Unwritten script memory and unused table slots read as this byte.
pub const ERASED: u8 = 0xFF;

/// 128 two-byte slots, one per table opcode.
pub const SUBROUTINE_TABLE_LEN: usize = 256;

/// Lowest opcode that indexes the subroutine table.
pub const FIRST_TABLE_OPCODE: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptBlock {
    pub index: u16,
    pub data: [u8; BLOCK_LEN],
}

/// A program laid out for one device, validated and ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptImage {
    /// Byte code including the terminator, if one fits.
    pub byte_code: Vec<u8>,
    pub subroutine_table: [u8; SUBROUTINE_TABLE_LEN],
    table_block_offset: u16,
}

impl ScriptImage {
    pub fn build(
        program: &CompiledProgram,
        variant: &DeviceVariant,
    ) -> Result<Self, ValidationError> {
        let max = variant.max_script_length;
        let length = program.byte_code.len();
        if length > max {
            return Err(ValidationError::ScriptTooLong { length, max });
        }

        let mut subroutine_table = [ERASED; SUBROUTINE_TABLE_LEN];
        for (opcode, address) in table_entries(program)? {
            let slot = 2 * usize::from(opcode - FIRST_TABLE_OPCODE);
            subroutine_table[slot..slot + 2].copy_from_slice(&address.to_le_bytes());
        }

        let mut byte_code = program.byte_code.clone();
        if length < max {
            byte_code.push(QUIT);
        }

        Ok(Self {
            byte_code,
            subroutine_table,
            table_block_offset: variant.subroutine_table_block_offset,
        })
    }

    /// Byte code blocks from block 0, the last one padded with [`ERASED`].
    pub fn code_blocks(&self) -> Vec<ScriptBlock> {
        to_blocks(&self.byte_code, 0)
    }

    /// The sixteen subroutine table blocks at the variant's table offset.
    pub fn table_blocks(&self) -> Vec<ScriptBlock> {
        to_blocks(&self.subroutine_table, self.table_block_offset)
    }
}

fn to_blocks(bytes: &[u8], first: u16) -> Vec<ScriptBlock> {
    bytes
        .chunks(BLOCK_LEN)
        .zip(first..)
        .map(|(chunk, index)| {
            let mut data = [ERASED; BLOCK_LEN];
            data[..chunk.len()].copy_from_slice(chunk);
            ScriptBlock { index, data }
        })
        .collect()
}

/// `(opcode, address)` for every subroutine reached through the table.
fn table_entries(program: &CompiledProgram) -> Result<Vec<(u8, u16)>, ValidationError> {
    let mut entries = Vec::new();
    for (name, &address) in &program.subroutine_addresses {
        match program.subroutine_commands.get(name) {
            None => return Err(ValidationError::UnknownSubroutine(name.clone())),
            Some(SubroutineCommand::CallOnly) => {}
            Some(&SubroutineCommand::Opcode(opcode)) if opcode < FIRST_TABLE_OPCODE => {
                return Err(ValidationError::SubroutineOpcode {
                    name: name.clone(),
                    opcode,
                })
            }
            Some(&SubroutineCommand::Opcode(opcode)) => entries.push((opcode, address)),
        }
    }
    Ok(entries)
}

impl CompiledProgram {
    /// The checksum the firmware keeps in its script CRC parameter.
    ///
    /// CRC-16/ARC over the subroutine table (unused slots zero) followed by the byte code
    /// without the terminator.
    pub fn compute_checksum(&self) -> Result<u16, ValidationError> {
        let mut message = vec![0u8; SUBROUTINE_TABLE_LEN];
        for (opcode, address) in table_entries(self)? {
            let slot = 2 * usize::from(opcode - FIRST_TABLE_OPCODE);
            message[slot..slot + 2].copy_from_slice(&address.to_le_bytes());
        }
        message.extend_from_slice(&self.byte_code);
        Ok(crc16::State::<crc16::ARC>::calculate(&message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(byte_code: Vec<u8>, subs: &[(&str, u16, SubroutineCommand)]) -> CompiledProgram {
        CompiledProgram {
            byte_code,
            subroutine_addresses: subs.iter().map(|(n, a, _)| (n.to_string(), *a)).collect(),
            subroutine_commands: subs.iter().map(|(n, _, c)| (n.to_string(), *c)).collect(),
            checksum: 0,
        }
    }

    fn variant(pid: u16) -> DeviceVariant {
        DeviceVariant::from_product_id(pid).unwrap()
    }

    // Bit-at-a-time CRC with the firmware's reflected polynomial.
    fn reference_crc(message: &[u8]) -> u16 {
        let mut crc = 0u16;
        for &byte in message {
            crc ^= u16::from(byte);
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            }
        }
        crc
    }

    #[test]
    fn subroutine_table_slot_is_little_endian_address() {
        let p = program(vec![1, 2, 3], &[("foo", 300, SubroutineCommand::Opcode(130))]);
        let image = ScriptImage::build(&p, &variant(0x008A)).unwrap();
        assert_eq!(&image.subroutine_table[4..6], &[0x2C, 0x01]);
        assert!(image.subroutine_table[..4].iter().all(|&b| b == ERASED));
        assert!(image.subroutine_table[6..].iter().all(|&b| b == ERASED));

        let blocks = image.table_blocks();
        assert_eq!(blocks.len(), 16);
        assert_eq!(blocks[0].index, 512);
        assert_eq!(blocks[15].index, 527);
        assert_eq!(&blocks[0].data[4..6], &[0x2C, 0x01]);
    }

    #[test]
    fn compact_table_sits_at_block_64() {
        let image = ScriptImage::build(&CompiledProgram::default(), &variant(0x0089)).unwrap();
        let indices: Vec<u16> = image.table_blocks().iter().map(|b| b.index).collect();
        assert_eq!(indices, (64..80).collect::<Vec<_>>());
    }

    #[test]
    fn call_only_subroutines_take_no_slot() {
        let p = program(
            vec![],
            &[
                ("direct", 0x0102, SubroutineCommand::Opcode(255)),
                ("indirect", 0x0304, SubroutineCommand::CallOnly),
            ],
        );
        let image = ScriptImage::build(&p, &variant(0x008C)).unwrap();
        assert_eq!(&image.subroutine_table[254..], &[0x02, 0x01]);
        assert_eq!(image.subroutine_table.iter().filter(|&&b| b != ERASED).count(), 2);
    }

    #[test]
    fn bad_subroutine_entries_are_rejected() {
        let low = program(vec![], &[("low", 10, SubroutineCommand::Opcode(54))]);
        assert_eq!(
            ScriptImage::build(&low, &variant(0x008A)),
            Err(ValidationError::SubroutineOpcode {
                name: "low".into(),
                opcode: 54
            })
        );

        let mut orphan = program(vec![], &[]);
        orphan.subroutine_addresses.insert("orphan".into(), 7);
        assert_eq!(
            ScriptImage::build(&orphan, &variant(0x008A)),
            Err(ValidationError::UnknownSubroutine("orphan".into()))
        );
    }

    #[test]
    fn terminator_is_appended_only_when_it_fits() {
        let v = variant(0x0089);
        let max = v.max_script_length;

        let almost = program(vec![0x55; max - 1], &[]);
        let image = ScriptImage::build(&almost, &v).unwrap();
        assert_eq!(image.byte_code.len(), max);
        assert_eq!(image.byte_code[max - 1], QUIT);
        assert_eq!(image.byte_code[..max - 1].iter().filter(|&&b| b == QUIT).count(), 0);

        let full = program(vec![0x55; max], &[]);
        let image = ScriptImage::build(&full, &v).unwrap();
        assert_eq!(image.byte_code.len(), max);
        assert_eq!(image.byte_code[max - 1], 0x55);

        let over = program(vec![0x55; max + 1], &[]);
        assert_eq!(
            ScriptImage::build(&over, &v),
            Err(ValidationError::ScriptTooLong {
                length: max + 1,
                max
            })
        );
    }

    #[test]
    fn code_blocks_are_padded_with_erased_bytes() {
        let p = program((1..=17).collect(), &[]);
        let blocks = ScriptImage::build(&p, &variant(0x008A)).unwrap().code_blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[0].data, core::array::from_fn(|i| i as u8 + 1));
        assert_eq!(blocks[1].index, 1);
        assert_eq!(blocks[1].data[..2], [17, QUIT]);
        assert!(blocks[1].data[2..].iter().all(|&b| b == ERASED));
    }

    #[test]
    fn empty_program_is_a_single_quit_block() {
        let blocks = ScriptImage::build(&CompiledProgram::default(), &variant(0x008A))
            .unwrap()
            .code_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data[0], QUIT);
    }

    #[test]
    fn checksum_covers_table_then_code() {
        assert_eq!(CompiledProgram::default().compute_checksum().unwrap(), 0);

        let p = program(
            vec![0x10, 0x20, 0x30],
            &[
                ("foo", 300, SubroutineCommand::Opcode(130)),
                ("bar", 9, SubroutineCommand::CallOnly),
            ],
        );
        let mut message = vec![0u8; SUBROUTINE_TABLE_LEN];
        message[4] = 0x2C;
        message[5] = 0x01;
        message.extend_from_slice(&[0x10, 0x20, 0x30]);
        assert_eq!(p.compute_checksum().unwrap(), reference_crc(&message));
    }
}
