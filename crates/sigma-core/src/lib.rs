//! # sigma-core
//!
//! Shared library for the SigmaTCP bridge: the binary wire protocol spoken
//! between remote tooling and the bridge daemon, the DSP device profiles that
//! describe register addresses and fixed-point rules, and the programming
//! script model used to flash device images.
//!
//! This crate is used by both the server daemon and the client library.
//! It has no dependencies on sockets or bus hardware.
//!
//! # Architecture overview
//!
//! - **`protocol`** – Opcodes and the 14-byte frame header codec.  Every
//!   request and response on the wire is a header followed by an optional
//!   payload; all integers are big-endian.
//!
//! - **`device`** – The [`DeviceProfile`] trait (register map, program memory
//!   geometry, decimal encoding) with the ADAU145x implementation, plus the
//!   biquad coefficient type.
//!
//! - **`image`** – Ordered programming actions (`writeBytes` / `delay`) and
//!   the parser that reads them from the XML programming script format.

pub mod device;
pub mod image;
pub mod protocol;

pub use device::biquad::Biquad;
pub use device::{Adau145x, DeviceProfile, ProfileError, Register};
pub use image::{parse_image_script, ImageAction, ImageScriptError};
pub use protocol::codec::{decode_header, decode_request, FrameHeader, ProtocolError, Request};
pub use protocol::opcode::Opcode;
