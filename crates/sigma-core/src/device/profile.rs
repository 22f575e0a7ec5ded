//! Device profiles: the register map and fixed-point rules of a DSP family.
//!
//! The bridge itself is device-agnostic.  Everything that differs between DSP
//! families (where the core control registers live, how large program memory
//! is, how real numbers are stored) is answered by a [`DeviceProfile`].

use thiserror::Error;

use crate::device::register::{data_int, Register};

/// Errors raised by device profile operations.
#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    /// The value cannot be represented in the profile's fixed-point format.
    #[error("value {value} is outside the representable range [{min}, {max})")]
    OutOfRange { value: f64, min: f64, max: f64 },

    /// A decimal was decoded from the wrong number of bytes.
    #[error("decimal needs {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    /// No profile is registered under the given name.
    #[error("unknown device profile: {0}")]
    UnknownProfile(String),
}

/// Register map and number format of a DSP family.
pub trait DeviceProfile: Send + Sync {
    /// Short identifier, e.g. `"adau145x"`.
    fn name(&self) -> &'static str;

    /// Width in bytes of one fixed-point parameter.
    fn decimal_length(&self) -> usize;

    /// Encodes a real number into [`DeviceProfile::decimal_length`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::OutOfRange`] when the value does not fit.
    fn decimal_encode(&self, value: f64) -> Result<Vec<u8>, ProfileError>;

    /// Decodes a fixed-point parameter back into a real number.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::WrongLength`] for a slice of the wrong width.
    fn decimal_decode(&self, bytes: &[u8]) -> Result<f64, ProfileError>;

    fn hibernate_register(&self) -> Register;
    fn kill_core_register(&self) -> Register;
    fn start_core_register(&self) -> Register;
    fn reset_register(&self) -> Register;

    /// First cell of program memory.
    fn program_base_address(&self) -> u16;

    /// Size of program memory in words.
    fn program_length(&self) -> usize;

    /// Bytes per memory cell.
    fn word_length(&self) -> usize;
}

/// Looks up a built-in profile by its [`DeviceProfile::name`].
///
/// # Errors
///
/// Returns [`ProfileError::UnknownProfile`] for an unrecognised name.
pub fn profile_by_name(name: &str) -> Result<Box<dyn DeviceProfile>, ProfileError> {
    match name.to_ascii_lowercase().as_str() {
        "adau145x" | "adau1451" | "adau1452" => Ok(Box::new(Adau145x)),
        _ => Err(ProfileError::UnknownProfile(name.to_string())),
    }
}

// ── ADAU145x ──────────────────────────────────────────────────────────────────

/// Analog Devices ADAU1451/1452 SigmaDSP.
///
/// Parameters are signed 8.24 fixed point in four bytes.  Control registers
/// are two bytes wide; program and parameter memory use 32-bit words.
#[derive(Debug, Clone, Copy, Default)]
pub struct Adau145x;

impl Adau145x {
    pub const DECIMAL_LENGTH: usize = 4;
    pub const FRACTIONAL_BITS: u32 = 24;
    pub const WORD_LENGTH: usize = 4;
    pub const PROGRAM_ADDRESS: u16 = 0xC000;
    pub const PROGRAM_LENGTH: usize = 0x2000;

    pub const HIBERNATE: Register = Register::new(0xF400, 2);
    pub const START_CORE: Register = Register::new(0xF402, 2);
    pub const KILL_CORE: Register = Register::new(0xF403, 2);
    pub const SOFT_RESET: Register = Register::new(0xF890, 2);

    const SCALE: f64 = (1u32 << Self::FRACTIONAL_BITS) as f64;
    const MIN: f64 = -128.0;
    const MAX: f64 = 128.0;
}

impl DeviceProfile for Adau145x {
    fn name(&self) -> &'static str {
        "adau145x"
    }

    fn decimal_length(&self) -> usize {
        Self::DECIMAL_LENGTH
    }

    fn decimal_encode(&self, value: f64) -> Result<Vec<u8>, ProfileError> {
        if !value.is_finite() || !(Self::MIN..Self::MAX).contains(&value) {
            return Err(ProfileError::OutOfRange {
                value,
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        // In range, so the product fits i32 after flooring.
        let fixed = (value * Self::SCALE).floor() as i32;
        Ok(fixed.to_be_bytes().to_vec())
    }

    fn decimal_decode(&self, bytes: &[u8]) -> Result<f64, ProfileError> {
        if bytes.len() != Self::DECIMAL_LENGTH {
            return Err(ProfileError::WrongLength {
                expected: Self::DECIMAL_LENGTH,
                actual: bytes.len(),
            });
        }
        let fixed = data_int(bytes) as u32 as i32;
        Ok(f64::from(fixed) / Self::SCALE)
    }

    fn hibernate_register(&self) -> Register {
        Self::HIBERNATE
    }

    fn kill_core_register(&self) -> Register {
        Self::KILL_CORE
    }

    fn start_core_register(&self) -> Register {
        Self::START_CORE
    }

    fn reset_register(&self) -> Register {
        Self::SOFT_RESET
    }

    fn program_base_address(&self) -> u16 {
        Self::PROGRAM_ADDRESS
    }

    fn program_length(&self) -> usize {
        Self::PROGRAM_LENGTH
    }

    fn word_length(&self) -> usize {
        Self::WORD_LENGTH
    }
}
