//! Protocol module containing opcode definitions and the binary frame codec.

pub mod codec;
pub mod opcode;

pub use codec::{
    decode_header, decode_request, decode_success_byte, encode_checksum_request,
    encode_eeprom_content_request, encode_eeprom_file_request, encode_read_request,
    encode_response, encode_status, encode_write_request, frame_length, FrameHeader,
    ProtocolError, Request,
};
pub use opcode::{Opcode, DEFAULT_PORT, HEADER_SIZE, RESPONSE_CHIP_ADDRESS};
