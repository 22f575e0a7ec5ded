//! TOML-based configuration for the bridge daemon.
//!
//! The daemon reads a single file (default `/etc/sigmatcp.toml`).  Every field
//! has a default, so a missing file or a file listing only a few keys is
//! valid:
//!
//! ```toml
//! [network]
//! port = 8086
//!
//! [bus]
//! driver = "spidev"
//! device = "/dev/spidev0.0"
//!
//! [timing]
//! erase_settle_ms = 10000
//! ```
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take the return value
//! of `some_fn()` when absent from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sigma_core::protocol::DEFAULT_PORT;

use crate::application::bus_transport::DEFAULT_MAX_TRANSFER_LEN;
use crate::application::device_control::SequencerTiming;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is not usable.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings and per-connection limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest frame (header + payload) a connection may send.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Largest READ a client may request.
    #[serde(default = "default_max_read_len")]
    pub max_read_len: usize,
}

/// Which bus driver backs the transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusDriverKind {
    /// Linux `/dev/spidevX.Y`.
    Spidev,
    /// In-memory simulation, for running without hardware.
    Simulated,
}

/// Control bus settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusConfig {
    #[serde(default = "default_driver")]
    pub driver: BusDriverKind,
    #[serde(default = "default_spi_device")]
    pub device: String,
    #[serde(default = "default_speed_hz")]
    pub speed_hz: u32,
    /// SPI mode, 0 to 3.
    #[serde(default)]
    pub mode: u8,
    /// Single-transfer ceiling including the 3-byte prefix.
    #[serde(default = "default_max_transfer_len")]
    pub max_transfer_len: usize,
}

/// DSP and persisted-program settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Device profile name, see `sigma_core::device::profile_by_name`.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Where the last applied EEPROM programming script is kept.
    #[serde(default = "default_program_file")]
    pub program_file: PathBuf,
    /// Directory for staging uploaded scripts; the system temp dir if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
}

/// Sequencer delays in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_erase_settle_ms")]
    pub erase_settle_ms: u64,
    #[serde(default = "default_delay_step_ms")]
    pub delay_step_ms: u64,
    #[serde(default = "default_halt_settle_ms")]
    pub halt_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_max_frame_len() -> usize {
    1024 * 1024
}
fn default_max_read_len() -> usize {
    1024 * 1024
}
fn default_driver() -> BusDriverKind {
    BusDriverKind::Spidev
}
fn default_spi_device() -> String {
    "/dev/spidev0.0".to_string()
}
fn default_speed_hz() -> u32 {
    1_000_000
}
fn default_max_transfer_len() -> usize {
    DEFAULT_MAX_TRANSFER_LEN
}
fn default_profile() -> String {
    "adau145x".to_string()
}
fn default_program_file() -> PathBuf {
    PathBuf::from("/etc/dspprogram.xml")
}
fn default_erase_settle_ms() -> u64 {
    10_000
}
fn default_delay_step_ms() -> u64 {
    1_000
}
fn default_halt_settle_ms() -> u64 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_frame_len: default_max_frame_len(),
            max_read_len: default_max_read_len(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            device: default_spi_device(),
            speed_hz: default_speed_hz(),
            mode: 0,
            max_transfer_len: default_max_transfer_len(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            program_file: default_program_file(),
            staging_dir: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            erase_settle_ms: default_erase_settle_ms(),
            delay_step_ms: default_delay_step_ms(),
            halt_settle_ms: default_halt_settle_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TimingConfig {
    pub fn to_timing(&self) -> SequencerTiming {
        SequencerTiming {
            erase_settle: Duration::from_millis(self.erase_settle_ms),
            delay_step: Duration::from_millis(self.delay_step_ms),
            halt_settle: Duration::from_millis(self.halt_settle_ms),
        }
    }
}

impl ServerConfig {
    /// Checks values serde cannot constrain.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.mode > 3 {
            return Err(ConfigError::Invalid(format!(
                "bus.mode must be 0-3, got {}",
                self.bus.mode
            )));
        }
        if self.bus.speed_hz == 0 {
            return Err(ConfigError::Invalid("bus.speed_hz must be positive".into()));
        }
        if self.network.max_frame_len < sigma_core::protocol::HEADER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "network.max_frame_len must be at least {} bytes",
                sigma_core::protocol::HEADER_SIZE
            )));
        }
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Parses TOML text into a validated [`ServerConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] on malformed TOML or
/// [`ConfigError::Invalid`] on out-of-range values.
pub fn parse_config(text: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Loads the config from `path`, falling back to defaults when the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for read failures other than "not found",
/// or a parse/validation error.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Renders `config` as TOML, e.g. to print a starting-point config file.
///
/// # Errors
///
/// Returns [`ConfigError::Serialize`] if serialization fails.
pub fn render_config(config: &ServerConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = ServerConfig::default();

        assert_eq!(cfg.network.port, 8086);
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
        assert_eq!(cfg.bus.driver, BusDriverKind::Spidev);
        assert_eq!(cfg.bus.device, "/dev/spidev0.0");
        assert_eq!(cfg.bus.max_transfer_len, 4096);
        assert_eq!(cfg.device.program_file, PathBuf::from("/etc/dspprogram.xml"));
        assert_eq!(cfg.timing.erase_settle_ms, 10_000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_fills_missing_fields_with_defaults() {
        // Arrange
        let text = r#"
            [bus]
            driver = "simulated"

            [timing]
            delay_step_ms = 5
        "#;

        // Act
        let cfg = parse_config(text).unwrap();

        // Assert
        assert_eq!(cfg.bus.driver, BusDriverKind::Simulated);
        assert_eq!(cfg.bus.speed_hz, 1_000_000);
        assert_eq!(cfg.timing.delay_step_ms, 5);
        assert_eq!(cfg.timing.erase_settle_ms, 10_000);
        assert_eq!(cfg.network.port, 8086);
    }

    #[test]
    fn test_empty_toml_is_the_default_config() {
        assert_eq!(parse_config("").unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_unknown_driver_is_a_parse_error() {
        let result = parse_config("[bus]\ndriver = \"i2c\"\n");

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_spi_mode_is_rejected() {
        let result = parse_config("[bus]\nmode = 4\n");

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_config_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();

        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigmatcp.toml");
        std::fs::write(&path, "[network]\nport = 9000\n").unwrap();

        let cfg = load_config(&path).unwrap();

        assert_eq!(cfg.network.port, 9000);
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let mut cfg = ServerConfig::default();
        cfg.device.staging_dir = Some(PathBuf::from("/var/tmp"));

        let text = render_config(&cfg).unwrap();

        assert_eq!(parse_config(&text).unwrap(), cfg);
    }

    #[test]
    fn test_timing_conversion_uses_milliseconds() {
        let timing = TimingConfig {
            erase_settle_ms: 10,
            delay_step_ms: 20,
            halt_settle_ms: 0,
        }
        .to_timing();

        assert_eq!(timing.erase_settle, Duration::from_millis(10));
        assert_eq!(timing.delay_step, Duration::from_millis(20));
        assert_eq!(timing.halt_settle, Duration::ZERO);
    }
}
