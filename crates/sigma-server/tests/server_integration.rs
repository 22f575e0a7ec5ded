//! End-to-end tests: `sigma-client` talking to a live bridge whose bus is the
//! simulated DSP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use md5::{Digest, Md5};
use sigma_client::{SigmaClient, SigmaClientConfig};
use sigma_core::device::Adau145x;
use sigma_core::protocol::{decode_header, encode_response, Opcode, HEADER_SIZE};
use sigma_server::application::bus_transport::BusTransport;
use sigma_server::application::device_control::{DeviceController, SequencerTiming};
use sigma_server::application::dispatch::RequestDispatcher;
use sigma_server::infrastructure::bus::simulated::{SimulatedBus, SimulatedBusProbe};
use sigma_server::infrastructure::network::server::SigmaServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const STRIDE: usize = 4;

struct Bridge {
    addr: SocketAddr,
    probe: SimulatedBusProbe,
    running: Arc<AtomicBool>,
    dir: tempfile::TempDir,
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start_bridge() -> Bridge {
    let sim = SimulatedBus::new(STRIDE);
    let probe = sim.probe();
    let bus = BusTransport::new(Box::new(sim), 4096, STRIDE).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    std::fs::create_dir(&staging).unwrap();
    let device = DeviceController::new(
        bus.clone(),
        Arc::new(Adau145x),
        SequencerTiming::immediate(),
        dir.path().join("dspprogram.xml"),
    )
    .with_staging_dir(staging);
    let dispatcher = Arc::new(RequestDispatcher::new(bus, device, 1 << 20));

    let server = SigmaServer::bind("127.0.0.1:0", dispatcher, 1 << 20)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(server.run(Arc::clone(&running)));

    Bridge {
        addr,
        probe,
        running,
        dir,
    }
}

fn client_for(bridge: &Bridge) -> SigmaClient {
    let config = SigmaClientConfig {
        addr: bridge.addr.to_string(),
        ..SigmaClientConfig::default()
    };
    SigmaClient::new(config, Arc::new(Adau145x))
}

/// Write transfers seen on the bus: (cell address, payload).
fn bus_writes(probe: &SimulatedBusProbe) -> Vec<(u16, Vec<u8>)> {
    probe
        .transfers()
        .into_iter()
        .filter(|t| t[0] == 0x00)
        .map(|t| (u16::from_be_bytes([t[1], t[2]]), t[3..].to_vec()))
        .collect()
}

#[tokio::test]
async fn test_write_then_read_through_bridge() {
    // Arrange
    let bridge = start_bridge().await;
    let mut client = client_for(&bridge);

    // Act
    client.write_memory(0x0040, &[1, 2, 3, 4]).await.unwrap();
    let data = client.read_memory(0x0040, 4).await.unwrap();

    // Assert
    assert_eq!(data, vec![1, 2, 3, 4]);
    assert_eq!(bridge.probe.memory(0x0040, 4), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_large_write_is_split_under_bus_ceiling() {
    // Arrange
    let bridge = start_bridge().await;
    let mut client = client_for(&bridge);
    let data: Vec<u8> = (0..8200u32).map(|i| (i % 241) as u8).collect();

    // Act
    client.write_memory(0x0800, &data).await.unwrap();
    let back = client.read_memory(0x0800, data.len()).await.unwrap();

    // Assert
    assert_eq!(back, data);
    let chunks: Vec<(u16, usize)> = bus_writes(&bridge.probe)
        .iter()
        .map(|(a, d)| (*a, d.len()))
        .collect();
    assert_eq!(
        chunks,
        vec![(0x0800, 4092), (0x0800 + 1023, 4092), (0x0800 + 2046, 16)]
    );
}

#[tokio::test]
async fn test_concurrent_large_writes_never_interleave() {
    // Arrange
    let bridge = start_bridge().await;
    let mut first = client_for(&bridge);
    let mut second = client_for(&bridge);
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    // Act
    let a = async {
        for _ in 0..4 {
            first.write_memory(0x1000, &[0xAA; 8000]).await.unwrap();
        }
        first.read_memory(0x1000, 4).await.unwrap()
    };
    let b = async {
        for _ in 0..4 {
            second.write_memory(0x3000, &[0xBB; 8000]).await.unwrap();
        }
        second.read_memory(0x3000, 4).await.unwrap()
    };
    let (ra, rb) = tokio::join!(a, b);

    // Assert: each logical write is two adjacent transfers from one client
    assert_eq!(ra, vec![0xAA; 4]);
    assert_eq!(rb, vec![0xBB; 4]);
    let writes = bus_writes(&bridge.probe);
    assert_eq!(writes.len(), 16);
    for pair in writes.chunks(2) {
        let (head_addr, head) = &pair[0];
        let (tail_addr, tail) = &pair[1];
        assert_eq!(head.len(), 4092);
        assert_eq!(tail.len(), 8000 - 4092);
        assert_eq!(*tail_addr, head_addr + 1023);
        assert_eq!(head[0], tail[0], "chunks of different writes interleaved");
    }
}

#[tokio::test]
async fn test_checksum_matches_program_memory_digest() {
    // Arrange
    let bridge = start_bridge().await;
    let program: Vec<u8> = (0..0x8000u32).map(|i| (i * 7 % 256) as u8).collect();
    bridge.probe.load(0xC000, &program);
    let mut client = client_for(&bridge);

    // Act
    let digest = client.program_checksum().await.unwrap();

    // Assert: each 2048-byte block is hashed behind its response header
    let mut hasher = Md5::new();
    for (i, block) in program.chunks(2048).enumerate() {
        let mut header = encode_response(Opcode::ReadResponse, 0xC000 + (i as u16) * 512, 2048);
        header[1..5].copy_from_slice(&14u32.to_be_bytes());
        hasher.update(&header);
        hasher.update(block);
    }
    let expected: [u8; 16] = hasher.finalize().into();
    assert_eq!(digest, expected);
}

#[tokio::test]
async fn test_eeprom_content_is_applied_and_saved() {
    // Arrange
    let bridge = start_bridge().await;
    let mut client = client_for(&bridge);
    let script = br#"<ROM><page>
        <action instr="writeXbytes" addr="80" ParamName="IC 1.Param">01 02 03 04</action>
        <action instr="delay"/>
        <action instr="writeXbytes" addr="81" ParamName="IC 1.Param2">05 06 07 08</action>
    </page></ROM>"#;

    // Act
    let ok = client.push_eeprom_content(script).await.unwrap();

    // Assert
    assert!(ok);
    assert_eq!(bridge.probe.memory(80, 8), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    let saved = std::fs::read(bridge.dir.path().join("dspprogram.xml")).unwrap();
    assert_eq!(saved, script.to_vec());
    let leftovers = std::fs::read_dir(bridge.dir.path().join("staging"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_malformed_eeprom_content_reports_failure() {
    let bridge = start_bridge().await;
    let mut client = client_for(&bridge);

    let ok = client.push_eeprom_content(b"<ROM><page>").await.unwrap();

    assert!(!ok);
    assert!(!bridge.dir.path().join("dspprogram.xml").exists());
}

#[tokio::test]
async fn test_eeprom_file_is_applied() {
    // Arrange
    let bridge = start_bridge().await;
    let path = bridge.dir.path().join("program.xml");
    std::fs::write(
        &path,
        r#"<ROM><page><action instr="writeXbytes" addr="100" ParamName="p">ca fe</action></page></ROM>"#,
    )
    .unwrap();
    let mut client = client_for(&bridge);

    // Act
    let ok = client.push_eeprom_file(&path).await.unwrap();

    // Assert
    assert!(ok);
    assert_eq!(bridge.probe.memory(100, 2), vec![0xCA, 0xFE]);
}

#[tokio::test]
async fn test_literal_read_frame_gets_header_only_reply() {
    // Arrange
    let bridge = start_bridge().await;
    let mut stream = TcpStream::connect(bridge.addr).await.unwrap();

    // Act
    stream
        .write_all(&[Opcode::Read as u8, 0, 0, 0, 14, 0, 0, 0, 0, 0, 4, 0, 0, 0])
        .await
        .unwrap();
    let mut reply = [0u8; HEADER_SIZE];
    stream.read_exact(&mut reply).await.unwrap();

    // Assert
    let header = decode_header(&reply).unwrap();
    assert_eq!(header.opcode, Opcode::ReadResponse);
    assert_eq!(header.address, 0x0400);
    assert_eq!(header.data_length, 0);
    assert_eq!(header.total_length as usize, HEADER_SIZE);
}

#[tokio::test]
async fn test_decimal_parameters_through_bridge() {
    let bridge = start_bridge().await;
    let mut client = client_for(&bridge);

    client.write_decimal(0x0010, 1.5).await.unwrap();
    let value = client.read_decimal(0x0010).await.unwrap();

    assert_eq!(value, 1.5);
    assert_eq!(bridge.probe.memory(0x0010, 4), vec![0x01, 0x80, 0x00, 0x00]);
}
