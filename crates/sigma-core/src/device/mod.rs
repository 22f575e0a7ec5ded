//! DSP device model: register map, fixed-point rules and filter coefficients.
//!
//! # Sub-modules
//!
//! - **`profile`** – The [`DeviceProfile`] trait consulted by the server's
//!   checksum sequencer and the client's decimal helpers, and the ADAU145x
//!   implementation.
//!
//! - **`register`** – Register descriptors and big-endian integer packing.
//!
//! - **`biquad`** – Second-order IIR section coefficients as written to the
//!   DSP parameter memory.
//!
//! [`DeviceProfile`]: profile::DeviceProfile

pub mod biquad;
pub mod profile;
pub mod register;

pub use profile::{profile_by_name, Adau145x, DeviceProfile, ProfileError};
pub use register::{data_int, int_data, Register};
