//! Linux spidev bus driver.
//!
//! Talks to `/dev/spidevX.Y` with the `SPI_IOC_MESSAGE` ioctl.  Each call to
//! [`BusDriver::transfer`] is one full-duplex transfer with chip select held
//! for its whole length, which is what the DSP's SPI slave port expects.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

use tracing::info;

use crate::application::bus_transport::{BusDriver, BusError};

/// spidev ioctl numbers.
mod ioctl {
    use nix::ioctl_write_ptr;

    const SPI_IOC_MAGIC: u8 = b'k';
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    /// `sizeof(struct spi_ioc_transfer)`.
    const SPI_IOC_TRANSFER_SIZE: u32 = 32;

    /// `SPI_IOC_MESSAGE(n)`, i.e. `_IOW(SPI_IOC_MAGIC, 0, char[n * 32])`.
    pub fn spi_ioc_message(n: u32) -> libc::c_ulong {
        ((1u32 << 30) | ((n * SPI_IOC_TRANSFER_SIZE) << 16) | ((SPI_IOC_MAGIC as u32) << 8))
            as libc::c_ulong
    }
}

/// Kernel `struct spi_ioc_transfer`.
#[repr(C)]
#[derive(Debug, Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    _pad: u8,
}

/// Settings for opening a spidev device.
#[derive(Debug, Clone)]
pub struct SpidevConfig {
    pub device: String,
    pub speed_hz: u32,
    pub mode: u8,
}

/// An open spidev device.
pub struct SpidevBus {
    file: File,
    speed_hz: u32,
}

impl SpidevBus {
    /// Opens and configures the device (mode, 8 bits per word, clock).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Open`] if the device cannot be opened or rejects
    /// one of the settings.
    pub fn open(config: &SpidevConfig) -> Result<Self, BusError> {
        let open_err = |source: std::io::Error| BusError::Open {
            path: config.device.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)
            .map_err(open_err)?;
        let fd = file.as_raw_fd();

        let mode = config.mode;
        let bits: u8 = 8;
        let speed = config.speed_hz;
        // SAFETY: fd is an open spidev descriptor and each pointer refers to a
        // live local of the type the ioctl expects.
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &mode)
                .map_err(|e| open_err(std::io::Error::from_raw_os_error(e as i32)))?;
            ioctl::spi_ioc_wr_bits_per_word(fd, &bits)
                .map_err(|e| open_err(std::io::Error::from_raw_os_error(e as i32)))?;
            ioctl::spi_ioc_wr_max_speed_hz(fd, &speed)
                .map_err(|e| open_err(std::io::Error::from_raw_os_error(e as i32)))?;
        }

        info!(
            "opened {} (mode={}, speed={} kHz)",
            config.device,
            mode,
            speed / 1000
        );
        Ok(Self {
            file,
            speed_hz: speed,
        })
    }
}

impl BusDriver for SpidevBus {
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>, BusError> {
        let mut rx = vec![0u8; tx.len()];
        if tx.is_empty() {
            return Ok(rx);
        }

        let transfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: tx.len() as u32,
            speed_hz: self.speed_hz,
            bits_per_word: 8,
            ..Default::default()
        };

        // SAFETY: both buffers outlive the call and are `len` bytes long.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                ioctl::spi_ioc_message(1),
                &transfer as *const SpiIocTransfer,
            )
        };
        if ret < 0 {
            return Err(BusError::Transfer(std::io::Error::last_os_error()));
        }
        Ok(rx)
    }
}
