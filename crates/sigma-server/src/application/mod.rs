//! Application layer for the bridge daemon.
//!
//! Use cases in this layer depend on the [`bus_transport::BusDriver`] trait
//! rather than on a concrete SPI device, so the whole request path can be
//! exercised against the simulated bus or a mock.
//!
//! # Sub-modules
//!
//! - **`bus_transport`** – The bus driver port and the adapter that splits
//!   oversized transfers under the hardware ceiling while holding the shared
//!   bus lock.
//!
//! - **`device_control`** – Core halt/resume around the program checksum and
//!   the programming-script interpreter, including EEPROM content staging.
//!
//! - **`dispatch`** – Maps decoded requests to bus or sequencer operations
//!   and builds the reply bytes.

pub mod bus_transport;
pub mod device_control;
pub mod dispatch;
