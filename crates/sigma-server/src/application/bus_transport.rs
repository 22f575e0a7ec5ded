//! Bus transport: chunked register reads and writes over the DSP control bus.
//!
//! Every bus transaction is a single full-duplex transfer whose first three
//! bytes are a control byte (`0x00` write, `0x01` read) and the big-endian
//! cell address.  The hardware limits one transfer to `max_transfer_len`
//! bytes including that prefix, so longer requests are split into chunks that
//! each carry a whole number of memory cells:
//!
//! ```text
//! chunk_len   = floor((max_transfer_len - 3) / stride) * stride
//! chunk_addr  = base + bytes_so_far / stride
//! ```
//!
//! The physical bus is one exclusive resource shared by every connection.
//! [`BusTransport`] is a cheap, cloneable handle to it; each logical read or
//! write holds the lock across all of its chunks, and [`BusTransport::lock`]
//! hands out a [`BusSession`] for sequences that must not be interleaved with
//! other callers (checksum, programming scripts).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::trace;

/// Control byte plus two address bytes.
pub const BUS_PREFIX_LEN: usize = 3;

/// Control byte announcing a write transfer.
pub const CONTROL_WRITE: u8 = 0x00;

/// Control byte announcing a read transfer.
pub const CONTROL_READ: u8 = 0x01;

/// Default single-transfer ceiling of the Linux spidev driver.
pub const DEFAULT_MAX_TRANSFER_LEN: usize = 4096;

/// Errors raised by bus drivers and the transport.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus device could not be opened or configured.
    #[error("cannot open bus device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The driver reported a failed transfer.
    #[error("bus transfer failed: {0}")]
    Transfer(#[source] std::io::Error),

    /// The driver returned a different number of bytes than it clocked out.
    #[error("bus returned {actual} bytes for a {expected}-byte transfer")]
    ShortTransfer { expected: usize, actual: usize },

    /// A chunk address would not fit the 16-bit address field.
    #[error("transfer at cell {base:#06x} + {cells} runs past the 16-bit address space")]
    AddressOverflow { base: u16, cells: usize },

    /// Stride or ceiling values that cannot produce a valid transfer.
    #[error("invalid bus configuration: {0}")]
    InvalidConfig(String),

    /// The requested driver does not exist on this platform.
    #[error("bus driver '{0}' is not available on this platform")]
    Unsupported(String),
}

/// Raw full-duplex transfer primitive of a bus device.
#[cfg_attr(test, mockall::automock)]
pub trait BusDriver: Send {
    /// Clocks out `tx` and returns the bytes clocked in, one per byte sent.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the device rejects the transfer.
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>, BusError>;
}

// ── Transport handle ──────────────────────────────────────────────────────────

/// Shared, lock-guarded handle to the single physical bus.
#[derive(Clone)]
pub struct BusTransport {
    driver: Arc<Mutex<Box<dyn BusDriver>>>,
    max_transfer_len: usize,
    stride: usize,
}

impl BusTransport {
    /// Wraps `driver` with a transfer ceiling and the memory cell width.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidConfig`] when `stride` is zero or the
    /// ceiling cannot carry the prefix plus one cell.
    pub fn new(
        driver: Box<dyn BusDriver>,
        max_transfer_len: usize,
        stride: usize,
    ) -> Result<Self, BusError> {
        if stride == 0 {
            return Err(BusError::InvalidConfig(
                "word stride must be at least one byte".to_string(),
            ));
        }
        if max_transfer_len < BUS_PREFIX_LEN + stride {
            return Err(BusError::InvalidConfig(format!(
                "max transfer length {max_transfer_len} cannot carry a {stride}-byte cell"
            )));
        }
        Ok(Self {
            driver: Arc::new(Mutex::new(driver)),
            max_transfer_len,
            stride,
        })
    }

    /// Takes exclusive ownership of the bus until the session is dropped.
    ///
    /// A panic in another holder does not make the bus unusable; the lock is
    /// recovered and the next transfer starts from a clean prefix.
    pub fn lock(&self) -> BusSession<'_> {
        BusSession {
            driver: self.driver.lock().unwrap_or_else(PoisonError::into_inner),
            max_transfer_len: self.max_transfer_len,
            stride: self.stride,
        }
    }

    /// Reads `length` bytes starting at cell `address`.
    ///
    /// # Errors
    ///
    /// Propagates the first [`BusError`]; no transfer is retried.
    pub fn read(&self, address: u16, length: usize) -> Result<Vec<u8>, BusError> {
        self.lock().read(address, length)
    }

    /// Writes `data` starting at cell `address`.
    ///
    /// # Errors
    ///
    /// Propagates the first [`BusError`]; chunks already sent stay written.
    pub fn write(&self, address: u16, data: &[u8]) -> Result<(), BusError> {
        self.lock().write(address, data)
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Exclusive access to the bus for a sequence of transfers.
pub struct BusSession<'a> {
    driver: MutexGuard<'a, Box<dyn BusDriver>>,
    max_transfer_len: usize,
    stride: usize,
}

impl BusSession<'_> {
    /// See [`BusTransport::read`].
    pub fn read(&mut self, address: u16, length: usize) -> Result<Vec<u8>, BusError> {
        let mut out = Vec::with_capacity(length);
        for (offset, len) in self.plan(length) {
            let chunk_address = self.chunk_address(address, offset)?;
            let mut tx = Vec::with_capacity(BUS_PREFIX_LEN + len);
            tx.push(CONTROL_READ);
            tx.extend_from_slice(&chunk_address.to_be_bytes());
            tx.resize(BUS_PREFIX_LEN + len, 0);

            let rx = self.exchange(&tx)?;
            out.extend_from_slice(&rx[BUS_PREFIX_LEN..]);
        }
        Ok(out)
    }

    /// See [`BusTransport::write`].
    pub fn write(&mut self, address: u16, data: &[u8]) -> Result<(), BusError> {
        for (offset, len) in self.plan(data.len()) {
            let chunk_address = self.chunk_address(address, offset)?;
            let mut tx = Vec::with_capacity(BUS_PREFIX_LEN + len);
            tx.push(CONTROL_WRITE);
            tx.extend_from_slice(&chunk_address.to_be_bytes());
            tx.extend_from_slice(&data[offset..offset + len]);

            self.exchange(&tx)?;
        }
        Ok(())
    }

    /// Yields `(byte_offset, byte_len)` for each transfer of a `total`-byte
    /// request.  Zero bytes yields nothing.
    fn plan(&self, total: usize) -> impl Iterator<Item = (usize, usize)> {
        let step = if total + BUS_PREFIX_LEN <= self.max_transfer_len {
            total.max(1)
        } else {
            chunk_len(self.max_transfer_len, self.stride)
        };
        (0..total)
            .step_by(step)
            .map(move |offset| (offset, step.min(total - offset)))
    }

    fn chunk_address(&self, base: u16, offset: usize) -> Result<u16, BusError> {
        let cells = offset / self.stride;
        u16::try_from(usize::from(base) + cells).map_err(|_| BusError::AddressOverflow { base, cells })
    }

    fn exchange(&mut self, tx: &[u8]) -> Result<Vec<u8>, BusError> {
        let rx = self.driver.transfer(tx)?;
        if rx.len() != tx.len() {
            return Err(BusError::ShortTransfer {
                expected: tx.len(),
                actual: rx.len(),
            });
        }
        trace!(
            "bus {} {} bytes at {:#06x}",
            if tx[0] == CONTROL_READ { "read" } else { "write" },
            tx.len() - BUS_PREFIX_LEN,
            u16::from_be_bytes([tx[1], tx[2]])
        );
        Ok(rx)
    }
}

fn chunk_len(max_transfer_len: usize, stride: usize) -> usize {
    (max_transfer_len - BUS_PREFIX_LEN) / stride * stride
}

// ── Tests ─────────────────────────────────────────────────────────────────────
