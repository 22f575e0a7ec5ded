//! Request dispatch.
//!
//! Turns one decoded [`Request`] into bus or sequencer calls and builds the
//! reply bytes.  Failures never escape: READ, WRITE and CHECKSUM failures are
//! logged and produce no reply, the EEPROM opcodes reply with a status byte.

use std::path::Path;

use sigma_core::protocol::{encode_response, encode_status, Opcode, Request};
use tracing::{debug, info, warn};

use crate::application::bus_transport::BusTransport;
use crate::application::device_control::{DeviceController, DIGEST_LEN};

/// Executes decoded requests against the shared bus.
pub struct RequestDispatcher {
    bus: BusTransport,
    device: DeviceController,
    max_read_len: usize,
}

impl RequestDispatcher {
    /// `max_read_len` bounds the byte count a single READ may ask for.
    pub fn new(bus: BusTransport, device: DeviceController, max_read_len: usize) -> Self {
        Self {
            bus,
            device,
            max_read_len,
        }
    }

    /// Runs `request` to completion and returns the reply, if any.
    ///
    /// Blocks on the bus lock; call from a blocking context.
    pub fn handle(&self, request: Request) -> Option<Vec<u8>> {
        match request {
            Request::Read { address, length } => self.read(address, length),
            Request::Write { address, data } => {
                debug!("write {} bytes at {address:#06x}", data.len());
                if let Err(e) = self.bus.write(address, &data) {
                    warn!("write at {address:#06x} failed: {e}");
                }
                None
            }
            Request::Checksum => match self.device.compute_program_checksum() {
                Ok(digest) => {
                    let mut reply = encode_response(Opcode::ChecksumResponse, 0, DIGEST_LEN as u32);
                    reply.extend_from_slice(&digest);
                    Some(reply)
                }
                Err(e) => {
                    warn!("checksum failed: {e}");
                    None
                }
            },
            Request::EepromFile { path } => {
                info!("applying programming script {path}");
                let ok = match self.device.apply_image_file(Path::new(&path)) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("programming script {path} failed: {e}");
                        false
                    }
                };
                Some(encode_status(ok))
            }
            Request::EepromContent { data } => {
                info!("received {} bytes of EEPROM content", data.len());
                Some(encode_status(self.device.push_eeprom_content(&data)))
            }
        }
    }

    fn read(&self, address: u16, length: usize) -> Option<Vec<u8>> {
        if length > self.max_read_len {
            warn!(
                "read of {length} bytes at {address:#06x} exceeds the {} byte limit",
                self.max_read_len
            );
            return None;
        }
        // Replies carry a 32-bit length; max_read_len keeps this in range.
        let wire_len = u32::try_from(length).ok()?;
        debug!("read {length} bytes at {address:#06x}");
        match self.bus.read(address, length) {
            Ok(data) => {
                let mut reply = encode_response(Opcode::ReadResponse, address, wire_len);
                reply.extend_from_slice(&data);
                Some(reply)
            }
            Err(e) => {
                warn!("read at {address:#06x} failed: {e}");
                None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bus_transport::{BusDriver, BusError, MockBusDriver};
    use crate::application::device_control::SequencerTiming;
    use crate::infrastructure::bus::simulated::{SimulatedBus, SimulatedBusProbe};
    use sigma_core::device::Adau145x;
    use sigma_core::protocol::{decode_header, HEADER_SIZE};
    use std::sync::Arc;

    fn dispatcher_over(driver: Box<dyn BusDriver>) -> (RequestDispatcher, tempfile::TempDir) {
        let bus = BusTransport::new(driver, 4096, 4).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let device = DeviceController::new(
            bus.clone(),
            Arc::new(Adau145x),
            SequencerTiming::immediate(),
            dir.path().join("dspprogram.xml"),
        )
        .with_staging_dir(dir.path());
        (RequestDispatcher::new(bus, device, 1 << 20), dir)
    }

    fn simulated() -> (RequestDispatcher, SimulatedBusProbe, tempfile::TempDir) {
        let sim = SimulatedBus::new(4);
        let probe = sim.probe();
        let (dispatcher, dir) = dispatcher_over(Box::new(sim));
        (dispatcher, probe, dir)
    }

    #[test]
    fn test_write_then_read_returns_read_response() {
        // Arrange
        let (dispatcher, _probe, _dir) = simulated();
        let data = vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

        // Act
        let write_reply = dispatcher.handle(Request::Write {
            address: 0x0100,
            data: data.clone(),
        });
        let read_reply = dispatcher
            .handle(Request::Read {
                address: 0x0100,
                length: 8,
            })
            .unwrap();

        // Assert
        assert!(write_reply.is_none(), "WRITE never replies");
        let header = decode_header(&read_reply).unwrap();
        assert_eq!(header.opcode, Opcode::ReadResponse);
        assert_eq!(header.address, 0x0100);
        assert_eq!(header.data_length, 8);
        assert_eq!(header.total_length as usize, HEADER_SIZE + 8);
        assert_eq!(read_reply[5], 1, "chip address");
        assert_eq!(&read_reply[HEADER_SIZE..], &data[..]);
    }

    #[test]
    fn test_zero_length_read_replies_with_header_only() {
        let (dispatcher, probe, _dir) = simulated();

        let reply = dispatcher
            .handle(Request::Read {
                address: 4,
                length: 0,
            })
            .unwrap();

        assert_eq!(reply.len(), HEADER_SIZE);
        assert_eq!(probe.transfer_count(), 0);
    }

    #[test]
    fn test_oversized_read_is_dropped() {
        let (dispatcher, probe, _dir) = simulated();

        let reply = dispatcher.handle(Request::Read {
            address: 0,
            length: (1 << 20) + 1,
        });

        assert!(reply.is_none());
        assert_eq!(probe.transfer_count(), 0);
    }

    #[test]
    fn test_checksum_reply_carries_sixteen_byte_digest() {
        let (dispatcher, _probe, _dir) = simulated();

        let reply = dispatcher.handle(Request::Checksum).unwrap();

        let header = decode_header(&reply).unwrap();
        assert_eq!(header.opcode, Opcode::ChecksumResponse);
        assert_eq!(header.data_length, 16);
        assert_eq!(reply.len(), HEADER_SIZE + 16);
    }

    #[test]
    fn test_bus_failure_on_read_gives_no_reply() {
        // Arrange
        let mut mock = MockBusDriver::new();
        mock.expect_transfer()
            .returning(|_| Err(BusError::Transfer(std::io::Error::other("spi gone"))));
        let (dispatcher, _dir) = dispatcher_over(Box::new(mock));

        // Act
        let reply = dispatcher.handle(Request::Read {
            address: 0,
            length: 4,
        });

        // Assert
        assert!(reply.is_none());
    }

    #[test]
    fn test_bus_failure_on_checksum_gives_no_reply() {
        let mut mock = MockBusDriver::new();
        mock.expect_transfer()
            .returning(|_| Err(BusError::Transfer(std::io::Error::other("spi gone"))));
        let (dispatcher, _dir) = dispatcher_over(Box::new(mock));

        assert!(dispatcher.handle(Request::Checksum).is_none());
    }

    #[test]
    fn test_eeprom_file_missing_replies_failure_byte() {
        let (dispatcher, _probe, dir) = simulated();
        let path = dir.path().join("absent.xml").to_string_lossy().into_owned();

        let reply = dispatcher.handle(Request::EepromFile { path });

        assert_eq!(reply, Some(vec![0]));
    }

    #[test]
    fn test_eeprom_file_applies_script_and_replies_success() {
        // Arrange
        let (dispatcher, probe, dir) = simulated();
        let script = dir.path().join("program.xml");
        std::fs::write(
            &script,
            r#"<ROM><page><action instr="writeXbytes" addr="32" ParamName="p">de ad be ef</action></page></ROM>"#,
        )
        .unwrap();

        // Act
        let reply = dispatcher.handle(Request::EepromFile {
            path: script.to_string_lossy().into_owned(),
        });

        // Assert
        assert_eq!(reply, Some(vec![1]));
        assert_eq!(probe.memory(32, 4), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_eeprom_content_malformed_replies_failure_byte() {
        let (dispatcher, _probe, _dir) = simulated();

        let reply = dispatcher.handle(Request::EepromContent {
            data: b"not a script".to_vec(),
        });

        assert_eq!(reply, Some(vec![0]));
    }
}
