//! In-memory simulated control bus.
//!
//! The simulated bus models the DSP's cell-addressed memory as a flat byte
//! array (`address * stride` is the byte offset) and answers the same
//! control-byte protocol as the real device.  Every successful transfer is
//! recorded so tests and diagnostics can inspect transfer boundaries.
//!
//! The driver is moved into the [`BusTransport`]; keep a [`SimulatedBusProbe`]
//! (from [`SimulatedBus::probe`]) to look at memory and the transfer log
//! afterwards, or to inject a failure.
//!
//! [`BusTransport`]: crate::application::bus_transport::BusTransport

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::application::bus_transport::{
    BusDriver, BusError, BUS_PREFIX_LEN, CONTROL_READ, CONTROL_WRITE,
};

#[derive(Debug)]
struct SimState {
    stride: usize,
    memory: Vec<u8>,
    transfers: Vec<Vec<u8>>,
    fail_countdown: Option<usize>,
}

/// Simulated bus device.
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

/// Observer and fault injector for a [`SimulatedBus`].
#[derive(Clone)]
pub struct SimulatedBusProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    /// Creates a zero-filled memory covering the full 16-bit cell space.
    pub fn new(stride: usize) -> Self {
        let stride = stride.max(1);
        Self {
            state: Arc::new(Mutex::new(SimState {
                stride,
                memory: vec![0; (usize::from(u16::MAX) + 1) * stride],
                transfers: Vec::new(),
                fail_countdown: None,
            })),
        }
    }

    pub fn probe(&self) -> SimulatedBusProbe {
        SimulatedBusProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl BusDriver for SimulatedBus {
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>, BusError> {
        let mut state = lock(&self.state);

        let countdown = state.fail_countdown;
        match countdown {
            Some(0) => {
                state.fail_countdown = None;
                return Err(fault("injected bus failure"));
            }
            Some(n) => state.fail_countdown = Some(n - 1),
            None => {}
        }

        if tx.len() < BUS_PREFIX_LEN {
            return Err(fault("transfer shorter than the address prefix"));
        }
        let address = u16::from_be_bytes([tx[1], tx[2]]);
        let start = usize::from(address) * state.stride;
        let payload = &tx[BUS_PREFIX_LEN..];
        let end = start + payload.len();
        if end > state.memory.len() {
            return Err(fault("transfer runs past the end of memory"));
        }

        let rx = match tx[0] {
            CONTROL_WRITE => {
                state.memory[start..end].copy_from_slice(payload);
                vec![0; tx.len()]
            }
            CONTROL_READ => {
                let mut rx = vec![0; BUS_PREFIX_LEN];
                rx.extend_from_slice(&state.memory[start..end]);
                rx
            }
            other => return Err(fault(&format!("unknown control byte {other:#04x}"))),
        };

        state.transfers.push(tx.to_vec());
        Ok(rx)
    }
}

impl SimulatedBusProbe {
    /// Copy of every successful transfer, oldest first.
    pub fn transfers(&self) -> Vec<Vec<u8>> {
        lock(&self.state).transfers.clone()
    }

    pub fn transfer_count(&self) -> usize {
        lock(&self.state).transfers.len()
    }

    /// Reads simulated memory without going through the bus.
    pub fn memory(&self, address: u16, len: usize) -> Vec<u8> {
        let state = lock(&self.state);
        let start = usize::from(address) * state.stride;
        let end = (start + len).min(state.memory.len());
        state.memory[start..end].to_vec()
    }

    /// Writes simulated memory without going through the bus.
    pub fn load(&self, address: u16, data: &[u8]) {
        let mut state = lock(&self.state);
        let start = usize::from(address) * state.stride;
        let end = (start + data.len()).min(state.memory.len());
        let n = end - start;
        state.memory[start..end].copy_from_slice(&data[..n]);
    }

    /// Lets `successes` more transfers through, then fails exactly one.
    pub fn fail_after(&self, successes: usize) {
        lock(&self.state).fail_countdown = Some(successes);
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fault(msg: &str) -> BusError {
    BusError::Transfer(std::io::Error::other(msg.to_string()))
}
