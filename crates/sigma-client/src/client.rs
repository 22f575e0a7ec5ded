//! SigmaTCP client transport.
//!
//! A [`SigmaClient`] is either disconnected or holds one TCP stream to the
//! bridge.  Every operation makes sure a connection exists first, connecting
//! on demand when `autoconnect` is set.  Any I/O failure on the stream drops
//! the connection; the next operation reconnects (or fails with
//! [`ClientError::NotConnected`]).  Nothing is retried automatically.
//!
//! Requests are answered strictly in order, so a read-type operation simply
//! waits for exactly the number of bytes its response occupies.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sigma_core::device::DeviceProfile;
use sigma_core::protocol::{
    decode_success_byte, encode_checksum_request, encode_eeprom_content_request,
    encode_eeprom_file_request, encode_read_request, encode_write_request, Opcode, DEFAULT_PORT,
    HEADER_SIZE,
};
use sigma_core::Biquad;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Length of the program checksum returned by the bridge.
pub const CHECKSUM_LEN: usize = 16;

/// Pause between the two writes of [`SigmaClient::reset`].
const RESET_PULSE: Duration = Duration::from_millis(500);

/// Connection settings for a [`SigmaClient`].
#[derive(Debug, Clone)]
pub struct SigmaClientConfig {
    /// `host:port` of the bridge.
    pub addr: String,
    /// Connect on first use instead of failing with `NotConnected`.
    pub autoconnect: bool,
    pub connect_timeout: Duration,
}

impl SigmaClientConfig {
    /// Settings for `host` on the default SigmaTCP port.
    pub fn for_host(host: &str) -> Self {
        Self {
            addr: format!("{host}:{DEFAULT_PORT}"),
            ..Self::default()
        }
    }
}

impl Default for SigmaClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            autoconnect: true,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Client for one remote DSP behind a SigmaTCP bridge.
pub struct SigmaClient {
    config: SigmaClientConfig,
    profile: Arc<dyn DeviceProfile>,
    stream: Option<TcpStream>,
}

impl SigmaClient {
    /// Creates a disconnected client.  `profile` describes the remote DSP.
    pub fn new(config: SigmaClientConfig, profile: Arc<dyn DeviceProfile>) -> Self {
        Self {
            config,
            profile,
            stream: None,
        }
    }

    pub fn profile(&self) -> &dyn DeviceProfile {
        self.profile.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    // ── Connection state ──────────────────────────────────────────────────

    /// Connects to the bridge.  Does nothing if already connected.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectFailed`] or [`ClientError::ConnectTimeout`].
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = self.config.addr.clone();
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ClientError::ConnectFailed { addr, source }),
            Err(_) => return Err(ClientError::ConnectTimeout { addr }),
        };
        stream.set_nodelay(true).ok();
        info!("connected to SigmaTCP bridge at {addr}");
        self.stream = Some(stream);
        Ok(())
    }

    /// Closes the connection, if any.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("disconnected from {}", self.config.addr);
        }
    }

    async fn ensure_connected(&mut self) -> Result<(), ClientError> {
        if self.stream.is_some() {
            Ok(())
        } else if self.config.autoconnect {
            self.connect().await
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Drops the connection when `result` is an I/O failure.
    fn check<T>(&mut self, result: std::io::Result<T>) -> Result<T, ClientError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("connection to {} failed: {e}", self.config.addr);
                self.stream = None;
                Err(ClientError::Io(e))
            }
        }
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        self.ensure_connected().await?;
        let result = match self.stream.as_mut() {
            Some(stream) => stream.write_all(frame).await,
            None => return Err(ClientError::NotConnected),
        };
        self.check(result)
    }

    async fn receive(&mut self, len: usize) -> Result<Vec<u8>, ClientError> {
        let mut buf = vec![0u8; len];
        let result = match self.stream.as_mut() {
            Some(stream) => stream.read_exact(&mut buf).await.map(|_| ()),
            None => return Err(ClientError::NotConnected),
        };
        self.check(result)?;
        Ok(buf)
    }

    /// Receives a `payload_len`-byte response of kind `opcode` and returns
    /// its payload.  A response of another kind means the stream is out of
    /// step, so the connection is dropped.
    async fn receive_response(
        &mut self,
        opcode: Opcode,
        payload_len: usize,
    ) -> Result<Vec<u8>, ClientError> {
        let mut reply = self.receive(HEADER_SIZE + payload_len).await?;
        if reply[0] != opcode as u8 {
            self.disconnect();
            return Err(ClientError::UnexpectedResponse(reply[0]));
        }
        Ok(reply.split_off(HEADER_SIZE))
    }

    // ── Memory access ─────────────────────────────────────────────────────

    /// Reads `length` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Connection errors, or [`ClientError::UnexpectedResponse`].
    pub async fn read_memory(&mut self, address: u16, length: usize) -> Result<Vec<u8>, ClientError> {
        let wire_len = u32::try_from(length).map_err(|_| ClientError::RequestTooLarge(length))?;
        self.send(&encode_read_request(address, wire_len)).await?;
        self.receive_response(Opcode::ReadResponse, length).await
    }

    /// Writes `data` starting at `address`.  The bridge does not acknowledge
    /// writes.
    pub async fn write_memory(&mut self, address: u16, data: &[u8]) -> Result<(), ClientError> {
        self.send(&encode_write_request(address, data)).await
    }

    /// Reads `length` bytes, or one fixed-point parameter when `None`.
    pub async fn read_data(
        &mut self,
        address: u16,
        length: Option<usize>,
    ) -> Result<Vec<u8>, ClientError> {
        let length = length.unwrap_or_else(|| self.profile.decimal_length());
        self.read_memory(address, length).await
    }

    // ── Parameters ────────────────────────────────────────────────────────

    /// Reads the fixed-point parameter at `address` as a real number.
    pub async fn read_decimal(&mut self, address: u16) -> Result<f64, ClientError> {
        let data = self.read_memory(address, self.profile.decimal_length()).await?;
        Ok(self.profile.decimal_decode(&data)?)
    }

    /// Writes `value` as a fixed-point parameter.
    ///
    /// # Errors
    ///
    /// [`ClientError::Profile`] when the value is out of range; nothing is
    /// sent in that case.
    pub async fn write_decimal(&mut self, address: u16, value: f64) -> Result<(), ClientError> {
        let data = self.profile.decimal_encode(value)?;
        self.write_memory(address, &data).await
    }

    /// Writes a gain given in decibels as a linear factor.
    pub async fn write_decibel(&mut self, address: u16, db: f64) -> Result<(), ClientError> {
        self.write_decimal(address, 10f64.powf(db / 20.0)).await
    }

    /// Writes the five coefficients of `filter` to the biquad block at
    /// `start`.  The DSP stores them in reverse order, so `-a1` lands at
    /// `start + 4` and `b2` at `start`.
    pub async fn write_biquad(&mut self, start: u16, filter: &Biquad) -> Result<(), ClientError> {
        let top = start
            .checked_add(4)
            .ok_or(ClientError::RequestTooLarge(usize::from(start) + 4))?;
        for (offset, coefficient) in (0u16..).zip(filter.dsp_coefficients()) {
            self.write_decimal(top - offset, coefficient).await?;
        }
        Ok(())
    }

    // ── Device control ────────────────────────────────────────────────────

    /// Asks the bridge for the MD5 digest of the DSP program memory.
    pub async fn program_checksum(&mut self) -> Result<[u8; CHECKSUM_LEN], ClientError> {
        self.send(&encode_checksum_request()).await?;
        let payload = self
            .receive_response(Opcode::ChecksumResponse, CHECKSUM_LEN)
            .await?;
        let mut digest = [0u8; CHECKSUM_LEN];
        digest.copy_from_slice(&payload);
        Ok(digest)
    }

    /// Tells the bridge to apply the programming script at `path`.
    ///
    /// The path is resolved locally and sent as an absolute path; it must
    /// also be valid on the bridge host.  Returns the bridge's verdict.
    ///
    /// # Errors
    ///
    /// [`ClientError::Io`] if the file does not exist locally (no request is
    /// sent), [`ClientError::Protocol`] if the absolute path is longer than
    /// 255 bytes, or a connection error.
    pub async fn push_eeprom_file(&mut self, path: impl AsRef<Path>) -> Result<bool, ClientError> {
        let absolute = tokio::fs::canonicalize(path.as_ref()).await?;
        let absolute = absolute.to_str().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path is not valid UTF-8")
        })?;
        let frame = encode_eeprom_file_request(absolute)?;
        self.send(&frame).await?;
        let status = self.receive(1).await?;
        Ok(decode_success_byte(status[0]))
    }

    /// Uploads a programming script, to be applied and stored as the
    /// bridge's program file.  Returns the bridge's verdict.
    pub async fn push_eeprom_content(&mut self, script: &[u8]) -> Result<bool, ClientError> {
        self.send(&encode_eeprom_content_request(script)).await?;
        let status = self.receive(1).await?;
        Ok(decode_success_byte(status[0]))
    }

    /// Pulses the soft-reset register: 0, wait half a second, 1.
    pub async fn reset(&mut self) -> Result<(), ClientError> {
        let reg = self.profile.reset_register();
        self.write_memory(reg.address, &reg.encode(0)).await?;
        tokio::time::sleep(RESET_PULSE).await;
        self.write_memory(reg.address, &reg.encode(1)).await
    }

    /// Puts the DSP into (`true`) or out of (`false`) hibernation.
    pub async fn hibernate(&mut self, on: bool) -> Result<(), ClientError> {
        let reg = self.profile.hibernate_register();
        self.write_memory(reg.address, &reg.encode(u64::from(on))).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
