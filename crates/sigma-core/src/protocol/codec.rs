//! Binary codec for SigmaTCP frames.
//!
//! Every frame starts with a 14-byte header.  The position of the length and
//! address fields depends on the opcode:
//!
//! ```text
//! READ / READ_RESPONSE / CHECKSUM_RESPONSE
//!   [op:1][total_len:4][chip:1][data_len:4][addr:2][pad:2]
//! WRITE / EEPROM_CONTENT
//!   [op:1][safeload:1][channel:1][total_len:4][chip:1][data_len:4][addr:2]
//! EEPROM_FILE
//!   [op:1][name_len:1][pad:12] then name bytes and one 0x00
//! CHECKSUM
//!   [op:1][pad:13]
//! ```
//!
//! All multi-byte integers are big-endian and unsigned.  `total_len` covers
//! header and payload.

use thiserror::Error;

use crate::protocol::opcode::{Opcode, HEADER_SIZE, MAX_FILENAME_LEN, RESPONSE_CHIP_ADDRESS};

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The bytes do not form a valid frame (too short, inconsistent lengths).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The command byte is not one of the known opcodes.
    #[error("unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    /// A valid opcode arrived in a direction where it has no meaning.
    #[error("unexpected opcode {0:?}")]
    UnexpectedOpcode(Opcode),

    /// The declared data length does not match the payload carried.
    #[error("payload length mismatch: header says {declared}, frame carries {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// An EEPROM file path does not fit the one-byte length field.
    #[error("path is {0} bytes, the protocol allows at most 255")]
    PathTooLong(usize),
}

/// Decoded header fields.  Fields the opcode's layout does not carry are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: Opcode,
    pub address: u16,
    pub data_length: u32,
    pub total_length: u32,
    pub filename_length: u8,
}

/// A complete request frame decoded into its typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Read { address: u16, length: usize },
    Write { address: u16, data: Vec<u8> },
    EepromFile { path: String },
    Checksum,
    EepromContent { data: Vec<u8> },
}

// ── Header layout ─────────────────────────────────────────────────────────────

mod layout {
    pub const FILENAME_LEN: usize = 1;

    pub const READ_TOTAL: usize = 1;
    pub const READ_CHIP: usize = 5;
    pub const READ_DATA_LEN: usize = 6;
    pub const READ_ADDR: usize = 10;

    pub const WRITE_TOTAL: usize = 3;
    pub const WRITE_CHIP: usize = 7;
    pub const WRITE_DATA_LEN: usize = 8;
    pub const WRITE_ADDR: usize = 12;
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a READ request for `length` bytes starting at cell `address`.
///
/// # Examples
///
/// ```rust
/// use sigma_core::protocol::{decode_header, encode_read_request, Opcode};
///
/// let bytes = encode_read_request(0x0040, 4);
/// let header = decode_header(&bytes).unwrap();
/// assert_eq!(header.opcode, Opcode::Read);
/// assert_eq!(header.address, 0x0040);
/// assert_eq!(header.data_length, 4);
/// ```
pub fn encode_read_request(address: u16, length: u32) -> Vec<u8> {
    let mut buf = header_for(Opcode::Read);
    put_u32(&mut buf, layout::READ_TOTAL, HEADER_SIZE as u32);
    put_u32(&mut buf, layout::READ_DATA_LEN, length);
    put_u16(&mut buf, layout::READ_ADDR, address);
    buf
}

/// Encodes a WRITE request carrying `payload` for cell `address`.
pub fn encode_write_request(address: u16, payload: &[u8]) -> Vec<u8> {
    encode_write_layout(Opcode::Write, address, payload)
}

/// Encodes an EEPROM_CONTENT request.  The payload is the programming script.
pub fn encode_eeprom_content_request(payload: &[u8]) -> Vec<u8> {
    encode_write_layout(Opcode::EepromContent, 0, payload)
}

/// Encodes an EEPROM_FILE request naming a script on the server's filesystem.
///
/// # Errors
///
/// Returns [`ProtocolError::PathTooLong`] when the path exceeds 255 bytes.
pub fn encode_eeprom_file_request(absolute_path: &str) -> Result<Vec<u8>, ProtocolError> {
    let name = absolute_path.as_bytes();
    if name.len() > MAX_FILENAME_LEN {
        return Err(ProtocolError::PathTooLong(name.len()));
    }
    let mut buf = header_for(Opcode::EepromFile);
    buf[layout::FILENAME_LEN] = name.len() as u8;
    buf.reserve(name.len() + 1);
    buf.extend_from_slice(name);
    buf.push(0x00);
    Ok(buf)
}

/// Encodes a header-only CHECKSUM request.
pub fn encode_checksum_request() -> Vec<u8> {
    header_for(Opcode::Checksum)
}

/// Encodes a response header.  The caller appends `data_length` payload bytes.
///
/// The total length field is set to header plus payload and the chip address
/// byte is always 1.
pub fn encode_response(opcode: Opcode, address: u16, data_length: u32) -> Vec<u8> {
    let mut buf = header_for(opcode);
    put_u32(&mut buf, layout::READ_TOTAL, HEADER_SIZE as u32 + data_length);
    buf[layout::READ_CHIP] = RESPONSE_CHIP_ADDRESS;
    put_u32(&mut buf, layout::READ_DATA_LEN, data_length);
    put_u16(&mut buf, layout::READ_ADDR, address);
    buf
}

/// Encodes the single-byte reply used by the EEPROM opcodes.
pub fn encode_status(success: bool) -> Vec<u8> {
    vec![u8::from(success)]
}

/// Interprets the single-byte reply of the EEPROM opcodes.
pub fn decode_success_byte(byte: u8) -> bool {
    byte == 1
}

/// Parses the 14-byte header at the start of `bytes`.
///
/// Pure parse: no length validation beyond the header itself.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] if fewer than 14 bytes are
/// available and [`ProtocolError::UnknownOpcode`] for an unknown command byte.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::MalformedFrame(format!(
            "header needs {HEADER_SIZE} bytes, got {}",
            bytes.len()
        )));
    }

    let opcode = Opcode::try_from(bytes[0]).map_err(|_| ProtocolError::UnknownOpcode(bytes[0]))?;

    let header = match opcode {
        Opcode::Read | Opcode::ReadResponse | Opcode::ChecksumResponse => FrameHeader {
            opcode,
            address: read_u16(bytes, layout::READ_ADDR),
            data_length: read_u32(bytes, layout::READ_DATA_LEN),
            total_length: read_u32(bytes, layout::READ_TOTAL),
            filename_length: 0,
        },
        Opcode::Write | Opcode::EepromContent => FrameHeader {
            opcode,
            address: read_u16(bytes, layout::WRITE_ADDR),
            data_length: read_u32(bytes, layout::WRITE_DATA_LEN),
            total_length: read_u32(bytes, layout::WRITE_TOTAL),
            filename_length: 0,
        },
        Opcode::EepromFile => FrameHeader {
            opcode,
            address: 0,
            data_length: 0,
            total_length: 0,
            filename_length: bytes[layout::FILENAME_LEN],
        },
        Opcode::Checksum => FrameHeader {
            opcode,
            address: 0,
            data_length: 0,
            total_length: 0,
            filename_length: 0,
        },
    };
    Ok(header)
}

/// Returns the number of bytes the complete frame described by `header`
/// occupies on the wire, header included.
///
/// A zero total length on READ or response opcodes means header only; on
/// WRITE and EEPROM_CONTENT it means header plus the declared data length.
/// A length that does not fit `usize` saturates to `usize::MAX`, so callers
/// bounding the frame size reject it.
pub fn frame_length(header: &FrameHeader) -> usize {
    let total = header.total_length as usize;
    match header.opcode {
        Opcode::Read | Opcode::ReadResponse | Opcode::ChecksumResponse => {
            if total == 0 {
                HEADER_SIZE
            } else {
                total
            }
        }
        Opcode::Write | Opcode::EepromContent => {
            if total == 0 {
                usize::try_from(header.data_length)
                    .ok()
                    .and_then(|len| len.checked_add(HEADER_SIZE))
                    .unwrap_or(usize::MAX)
            } else {
                total
            }
        }
        Opcode::EepromFile => HEADER_SIZE + header.filename_length as usize + 1,
        Opcode::Checksum => HEADER_SIZE,
    }
}

/// Decodes one complete request frame.
///
/// `frame` must hold at least [`frame_length`] bytes; any bytes beyond that
/// are ignored.
///
/// # Errors
///
/// - [`ProtocolError::MalformedFrame`] when the frame is truncated, its
///   length is below the header size, or the EEPROM path is not UTF-8.
/// - [`ProtocolError::PayloadLengthMismatch`] when a WRITE or EEPROM_CONTENT
///   payload disagrees with its declared data length.
/// - [`ProtocolError::UnexpectedOpcode`] for response opcodes.
pub fn decode_request(frame: &[u8]) -> Result<Request, ProtocolError> {
    let header = decode_header(frame)?;
    let len = frame_length(&header);
    if len < HEADER_SIZE {
        return Err(ProtocolError::MalformedFrame(format!(
            "declared frame length {len} is shorter than the header"
        )));
    }
    require_len(frame, len)?;

    match header.opcode {
        Opcode::Read => Ok(Request::Read {
            address: header.address,
            length: header.data_length as usize,
        }),
        Opcode::Write => {
            let data = checked_payload(&header, &frame[HEADER_SIZE..len])?;
            Ok(Request::Write {
                address: header.address,
                data,
            })
        }
        Opcode::EepromContent => {
            let data = checked_payload(&header, &frame[HEADER_SIZE..len])?;
            Ok(Request::EepromContent { data })
        }
        Opcode::EepromFile => {
            let end = HEADER_SIZE + header.filename_length as usize;
            let path = std::str::from_utf8(&frame[HEADER_SIZE..end])
                .map_err(|e| ProtocolError::MalformedFrame(format!("path is not UTF-8: {e}")))?;
            Ok(Request::EepromFile {
                path: path.to_string(),
            })
        }
        Opcode::Checksum => Ok(Request::Checksum),
        Opcode::ReadResponse | Opcode::ChecksumResponse => {
            Err(ProtocolError::UnexpectedOpcode(header.opcode))
        }
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn header_for(opcode: Opcode) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_SIZE];
    buf[0] = opcode as u8;
    buf
}

fn encode_write_layout(opcode: Opcode, address: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = header_for(opcode);
    put_u32(&mut buf, layout::WRITE_TOTAL, (HEADER_SIZE + payload.len()) as u32);
    put_u32(&mut buf, layout::WRITE_DATA_LEN, payload.len() as u32);
    put_u16(&mut buf, layout::WRITE_ADDR, address);
    buf.extend_from_slice(payload);
    buf
}

/// A zero data length means the frame carries no payload.
fn checked_payload(header: &FrameHeader, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let declared = header.data_length as usize;
    if payload.len() != declared {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared,
            available: payload.len(),
        });
    }
    Ok(payload.to_vec())
}

fn require_len(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedFrame(format!(
            "frame needs {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
