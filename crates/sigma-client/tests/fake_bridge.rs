//! Client operations against an in-process fake bridge.
//!
//! The fake decodes requests with `sigma-core`, keeps a word-addressed
//! memory image and records every write, which is enough to check what the
//! client puts on the wire and how it reads the replies.

use std::sync::{Arc, Mutex};

use sigma_client::{ClientError, SigmaClient, SigmaClientConfig};
use sigma_core::device::{Adau145x, DeviceProfile};
use sigma_core::protocol::{
    decode_header, decode_request, encode_response, encode_status, frame_length, Opcode, Request,
    HEADER_SIZE,
};
use sigma_core::Biquad;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const STRIDE: usize = 4;
const DIGEST: [u8; 16] = [7; 16];

#[derive(Default)]
struct FakeState {
    memory: Vec<u8>,
    writes: Vec<(u16, Vec<u8>)>,
    eeprom_files: Vec<String>,
    eeprom_content: Vec<Vec<u8>>,
}

type Shared = Arc<Mutex<FakeState>>;

async fn start_fake() -> (String, Shared) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let state: Shared = Arc::new(Mutex::new(FakeState {
        memory: vec![0; 0x1_0000 * STRIDE],
        ..FakeState::default()
    }));
    let shared = Arc::clone(&state);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, Arc::clone(&shared)));
        }
    });
    (addr, state)
}

async fn serve(mut stream: TcpStream, state: Shared) {
    loop {
        let mut frame = vec![0u8; HEADER_SIZE];
        if stream.read_exact(&mut frame).await.is_err() {
            return;
        }
        let header = decode_header(&frame).unwrap();
        frame.resize(frame_length(&header), 0);
        if stream.read_exact(&mut frame[HEADER_SIZE..]).await.is_err() {
            return;
        }

        let reply = answer(decode_request(&frame).unwrap(), &state);
        if let Some(reply) = reply {
            stream.write_all(&reply).await.unwrap();
        }
    }
}

fn answer(request: Request, state: &Shared) -> Option<Vec<u8>> {
    let mut state = state.lock().unwrap();
    match request {
        Request::Read { address, length } => {
            let start = usize::from(address) * STRIDE;
            let mut reply = encode_response(Opcode::ReadResponse, address, length as u32);
            reply.extend_from_slice(&state.memory[start..start + length]);
            Some(reply)
        }
        Request::Write { address, data } => {
            let start = usize::from(address) * STRIDE;
            state.memory[start..start + data.len()].copy_from_slice(&data);
            state.writes.push((address, data));
            None
        }
        Request::Checksum => {
            let mut reply = encode_response(Opcode::ChecksumResponse, 0, 16);
            reply.extend_from_slice(&DIGEST);
            Some(reply)
        }
        Request::EepromFile { path } => {
            state.eeprom_files.push(path);
            Some(encode_status(true))
        }
        Request::EepromContent { data } => {
            let ok = data.starts_with(b"<ROM>");
            state.eeprom_content.push(data);
            Some(encode_status(ok))
        }
    }
}

/// Writes are not acknowledged; a read behind them on the same connection
/// returns only after the fake has processed them.
async fn flush(client: &mut SigmaClient) {
    client.read_memory(0, 4).await.unwrap();
}

fn client_for(addr: &str) -> SigmaClient {
    let config = SigmaClientConfig {
        addr: addr.to_string(),
        ..SigmaClientConfig::default()
    };
    SigmaClient::new(config, Arc::new(Adau145x))
}

#[tokio::test]
async fn test_write_then_read_memory_round_trips() {
    // Arrange
    let (addr, _state) = start_fake().await;
    let mut client = client_for(&addr);

    // Act
    client
        .write_memory(0x0100, &[1, 2, 3, 4, 5, 6, 7, 8])
        .await
        .unwrap();
    let data = client.read_memory(0x0100, 8).await.unwrap();

    // Assert
    assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert!(client.is_connected(), "auto-connected on first use");
}

#[tokio::test]
async fn test_decimal_round_trip_through_fixed_point() {
    let (addr, _state) = start_fake().await;
    let mut client = client_for(&addr);

    client.write_decimal(0x0020, -0.25).await.unwrap();
    let value = client.read_decimal(0x0020).await.unwrap();

    assert_eq!(value, -0.25);
}

#[tokio::test]
async fn test_read_data_defaults_to_one_parameter() {
    let (addr, state) = start_fake().await;
    state.lock().unwrap().memory[0x10 * STRIDE..0x10 * STRIDE + 6]
        .copy_from_slice(&[0xA, 0xB, 0xC, 0xD, 0xE, 0xF]);
    let mut client = client_for(&addr);

    let default_len = client.read_data(0x10, None).await.unwrap();
    let explicit = client.read_data(0x10, Some(6)).await.unwrap();

    assert_eq!(default_len, vec![0xA, 0xB, 0xC, 0xD]);
    assert_eq!(explicit.len(), 6);
}

#[tokio::test]
async fn test_write_decibel_writes_linear_gain() {
    let (addr, state) = start_fake().await;
    let mut client = client_for(&addr);

    client.write_decibel(0x0030, -6.0).await.unwrap();
    flush(&mut client).await;

    let writes = state.lock().unwrap().writes.clone();
    let expected = Adau145x.decimal_encode(10f64.powf(-6.0 / 20.0)).unwrap();
    assert_eq!(writes, vec![(0x0030, expected)]);
}

#[tokio::test]
async fn test_write_biquad_fills_five_descending_addresses() {
    // Arrange
    let (addr, state) = start_fake().await;
    let mut client = client_for(&addr);
    let filter = Biquad::new(2.0, -0.5, 0.25, 1.0, 0.5, 0.125);

    // Act
    client.write_biquad(0x0200, &filter).await.unwrap();
    flush(&mut client).await;

    // Assert
    let writes = state.lock().unwrap().writes.clone();
    let addresses: Vec<u16> = writes.iter().map(|(a, _)| *a).collect();
    assert_eq!(addresses, vec![0x0204, 0x0203, 0x0202, 0x0201, 0x0200]);
    let values: Vec<f64> = writes
        .iter()
        .map(|(_, d)| Adau145x.decimal_decode(d).unwrap())
        .collect();
    // normalized by a0 = 2: [-a1, -a2, b0, b1, b2]
    assert_eq!(values, vec![0.25, -0.125, 0.5, 0.25, 0.0625]);
}

#[tokio::test]
async fn test_program_checksum_returns_digest() {
    let (addr, _state) = start_fake().await;
    let mut client = client_for(&addr);

    let digest = client.program_checksum().await.unwrap();

    assert_eq!(digest, DIGEST);
}

#[tokio::test]
async fn test_push_eeprom_file_sends_absolute_path() {
    // Arrange
    let (addr, state) = start_fake().await;
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("program.xml");
    std::fs::write(&script, "<ROM/>").unwrap();
    let mut client = client_for(&addr);

    // Act
    let ok = client.push_eeprom_file(&script).await.unwrap();

    // Assert
    assert!(ok);
    let sent = state.lock().unwrap().eeprom_files.clone();
    let expected = std::fs::canonicalize(&script).unwrap();
    assert_eq!(sent, vec![expected.to_string_lossy().into_owned()]);
}

#[tokio::test]
async fn test_push_eeprom_content_reports_bridge_verdict() {
    let (addr, state) = start_fake().await;
    let mut client = client_for(&addr);

    let accepted = client.push_eeprom_content(b"<ROM></ROM>").await.unwrap();
    let rejected = client.push_eeprom_content(b"garbage").await.unwrap();

    assert!(accepted);
    assert!(!rejected);
    assert_eq!(state.lock().unwrap().eeprom_content.len(), 2);
}

#[tokio::test]
async fn test_hibernate_writes_register() {
    let (addr, state) = start_fake().await;
    let mut client = client_for(&addr);

    client.hibernate(true).await.unwrap();
    client.hibernate(false).await.unwrap();
    flush(&mut client).await;

    let writes = state.lock().unwrap().writes.clone();
    assert_eq!(writes, vec![(0xF400, vec![0, 1]), (0xF400, vec![0, 0])]);
}

#[tokio::test]
async fn test_reset_pulses_reset_register() {
    let (addr, state) = start_fake().await;
    let mut client = client_for(&addr);

    client.reset().await.unwrap();
    flush(&mut client).await;

    let writes = state.lock().unwrap().writes.clone();
    assert_eq!(writes, vec![(0xF890, vec![0, 0]), (0xF890, vec![0, 1])]);
}

#[tokio::test]
async fn test_closed_connection_disconnects_client() {
    // Arrange: a bridge that accepts and immediately hangs up
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    let mut client = client_for(&addr);

    // Act
    let result = client.read_memory(0, 4).await;

    // Assert
    assert!(matches!(result, Err(ClientError::Io(_))));
    assert!(!client.is_connected());
}
