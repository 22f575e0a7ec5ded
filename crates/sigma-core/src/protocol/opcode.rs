//! Opcode definitions and protocol constants for the SigmaTCP wire format.
//!
//! The opcode set is closed: a byte outside the values below is rejected by
//! [`Opcode::try_from`] and treated by the server as an unknown command.

/// Size in bytes of the fixed frame header that precedes every payload.
pub const HEADER_SIZE: usize = 14;

/// Default TCP port the bridge listens on.
pub const DEFAULT_PORT: u16 = 8086;

/// Chip address written into every response header.
pub const RESPONSE_CHIP_ADDRESS: u8 = 1;

/// Longest EEPROM file path that fits the one-byte filename length field.
pub const MAX_FILENAME_LEN: usize = u8::MAX as usize;

/// Command byte at offset 0 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Write a block of register memory; no reply.
    Write = 0x09,
    /// Read a block of register memory.
    Read = 0x0A,
    /// Reply to [`Opcode::Read`], header followed by the data.
    ReadResponse = 0x0B,
    /// Apply a programming script stored on the server's filesystem.
    EepromFile = 0xF0,
    /// Compute the MD5 digest of the DSP program memory.
    Checksum = 0xF1,
    /// Reply to [`Opcode::Checksum`], header followed by a 16-byte digest.
    ChecksumResponse = 0xF2,
    /// Upload a programming script and apply it.
    EepromContent = 0xF3,
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x09 => Ok(Opcode::Write),
            0x0A => Ok(Opcode::Read),
            0x0B => Ok(Opcode::ReadResponse),
            0xF0 => Ok(Opcode::EepromFile),
            0xF1 => Ok(Opcode::Checksum),
            0xF2 => Ok(Opcode::ChecksumResponse),
            0xF3 => Ok(Opcode::EepromContent),
            _ => Err(()),
        }
    }
}
