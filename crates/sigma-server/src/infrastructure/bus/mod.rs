//! Bus driver implementations.
//!
//! # Sub-modules
//!
//! - **`spidev`** – Linux `/dev/spidevX.Y` driver (Linux only).
//! - **`simulated`** – In-memory device used for hardware-free runs and tests.
//!
//! [`open_driver`] picks one according to the `[bus]` config section.

pub mod simulated;
#[cfg(target_os = "linux")]
pub mod spidev;

use tracing::info;

use crate::application::bus_transport::{BusDriver, BusError};
use crate::infrastructure::storage::config::{BusConfig, BusDriverKind};

/// Opens the driver selected by `config`.
///
/// `stride` is the device word length, used by the simulated bus to lay out
/// its memory.
///
/// # Errors
///
/// Returns [`BusError::Open`] if the device cannot be opened and
/// [`BusError::Unsupported`] for spidev on a non-Linux host.
pub fn open_driver(config: &BusConfig, stride: usize) -> Result<Box<dyn BusDriver>, BusError> {
    match config.driver {
        BusDriverKind::Simulated => {
            info!("using simulated bus ({stride}-byte cells)");
            Ok(Box::new(simulated::SimulatedBus::new(stride)))
        }
        BusDriverKind::Spidev => open_spidev(config),
    }
}

#[cfg(target_os = "linux")]
fn open_spidev(config: &BusConfig) -> Result<Box<dyn BusDriver>, BusError> {
    let bus = spidev::SpidevBus::open(&spidev::SpidevConfig {
        device: config.device.clone(),
        speed_hz: config.speed_hz,
        mode: config.mode,
    })?;
    Ok(Box::new(bus))
}

#[cfg(not(target_os = "linux"))]
fn open_spidev(_config: &BusConfig) -> Result<Box<dyn BusDriver>, BusError> {
    Err(BusError::Unsupported("spidev".to_string()))
}
