//! Device control sequencer.
//!
//! Owns the multi-step operations that need more than a single register
//! access:
//!
//! - **Program checksum**: halt the DSP core, hash program memory block by
//!   block, restart the core.  Restart runs from a drop guard, so it is issued
//!   exactly once per halt even when a read fails part way through.
//! - **Programming scripts**: apply [`ImageAction`]s strictly in order, with
//!   settle time after flash erases and for explicit delays.
//! - **EEPROM content**: stage uploaded script bytes in a scoped temporary
//!   file, apply them, and keep a copy as the persistent program file.
//!
//! Each operation holds the bus lock for its whole duration, so no other
//! connection can touch the bus while the core is halted or a script runs.
//! All of them block; async callers run them on the blocking thread pool.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use sigma_core::device::{DeviceProfile, Register};
use sigma_core::image::{parse_image_script, ImageAction, ImageScriptError};
use sigma_core::protocol::{Opcode, HEADER_SIZE, RESPONSE_CHIP_ADDRESS};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::bus_transport::{BusError, BusSession, BusTransport};

/// Bytes read per bus request while hashing program memory.
pub const CHECKSUM_BLOCK_LEN: usize = 2048;

/// Length of the program-memory digest.
pub const DIGEST_LEN: usize = 16;

/// Waits used by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerTiming {
    /// Pause after a write whose parameter name marks a flash erase.
    pub erase_settle: Duration,
    /// Pause for each `delay` action.
    pub delay_step: Duration,
    /// Pause between hibernating and killing the core.
    pub halt_settle: Duration,
}

impl Default for SequencerTiming {
    fn default() -> Self {
        Self {
            erase_settle: Duration::from_secs(10),
            delay_step: Duration::from_secs(1),
            halt_settle: Duration::from_millis(1),
        }
    }
}

impl SequencerTiming {
    /// No waits at all; for the simulated bus.
    pub fn immediate() -> Self {
        Self {
            erase_settle: Duration::ZERO,
            delay_step: Duration::ZERO,
            halt_settle: Duration::ZERO,
        }
    }
}

/// Errors from sequencer operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A bus transfer failed during the halt/read/restart sequence.
    #[error("checksum sequence failed: {0}")]
    ChecksumSequence(#[source] BusError),

    /// A bus transfer failed while applying a programming script.
    #[error("programming script aborted: {0}")]
    Bus(#[from] BusError),

    #[error(transparent)]
    ImageScript(#[from] ImageScriptError),

    /// Uploaded content could not be written to a staging file.
    #[error("cannot stage EEPROM content: {0}")]
    Staging(#[source] std::io::Error),

    /// The applied script could not be copied to the program file.
    #[error("cannot persist program file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runs device-level sequences against the shared bus.
pub struct DeviceController {
    bus: BusTransport,
    profile: Arc<dyn DeviceProfile>,
    timing: SequencerTiming,
    program_file: PathBuf,
    staging_dir: Option<PathBuf>,
}

impl DeviceController {
    pub fn new(
        bus: BusTransport,
        profile: Arc<dyn DeviceProfile>,
        timing: SequencerTiming,
        program_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bus,
            profile,
            timing,
            program_file: program_file.into(),
            staging_dir: None,
        }
    }

    /// Stages uploaded EEPROM content in `dir` instead of the system temp dir.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn program_file(&self) -> &Path {
        &self.program_file
    }

    /// Computes the MD5 digest of the DSP program memory.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::ChecksumSequence`] if any transfer fails.  The
    /// core restart has already been issued when the error is returned.
    pub fn compute_program_checksum(&self) -> Result<[u8; DIGEST_LEN], DeviceError> {
        let word = self.profile.word_length().max(1);
        let total = self.profile.program_length() * word;
        debug!("hashing {total} bytes of program memory");

        let mut session = self.bus.lock();
        let mut halted = CoreHalt::engage(&mut session, self.profile.as_ref(), self.timing.halt_settle)
            .map_err(DeviceError::ChecksumSequence)?;

        let mut hasher = Md5::new();
        let mut address = self.profile.program_base_address();
        let mut covered = 0;
        while covered < total {
            let block = CHECKSUM_BLOCK_LEN.min(total - covered);
            let data = halted
                .session
                .read(address, block)
                .map_err(DeviceError::ChecksumSequence)?;
            hasher.update(block_record_header(address, block));
            hasher.update(&data);
            covered += block;
            if covered < total {
                address = advance(address, block / word).map_err(DeviceError::ChecksumSequence)?;
            }
        }
        drop(halted);

        Ok(hasher.finalize().into())
    }

    /// Applies `actions` in order while holding the bus.
    ///
    /// # Errors
    ///
    /// Stops at the first failed write and returns [`DeviceError::Bus`].
    pub fn apply_image_script(&self, actions: &[ImageAction]) -> Result<(), DeviceError> {
        let mut session = self.bus.lock();
        for (index, action) in actions.iter().enumerate() {
            match action {
                ImageAction::WriteBytes {
                    address,
                    param_name,
                    data,
                } => {
                    debug!(
                        "action #{index}: write {} bytes to {address:#06x} ({param_name})",
                        data.len()
                    );
                    session.write(*address, data)?;
                    if action.is_erase() {
                        info!("waiting {:?} for flash erase", self.timing.erase_settle);
                        thread::sleep(self.timing.erase_settle);
                    }
                }
                ImageAction::Delay => {
                    debug!("action #{index}: delay");
                    thread::sleep(self.timing.delay_step);
                }
            }
        }
        Ok(())
    }

    /// Loads, parses and applies the programming script at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::ImageScript`] if the file is missing or not a
    /// valid script, or [`DeviceError::Bus`] if applying it fails.
    pub fn apply_image_file(&self, path: &Path) -> Result<(), DeviceError> {
        let text = fs::read_to_string(path).map_err(|source| ImageScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let actions = parse_image_script(&text)?;
        info!("applying {} actions from {}", actions.len(), path.display());
        self.apply_image_script(&actions)
    }

    /// Applies uploaded script bytes and keeps them as the program file.
    ///
    /// Returns `false` on any failure.  The staging file is removed on every
    /// path.
    pub fn push_eeprom_content(&self, content: &[u8]) -> bool {
        match self.stage_and_apply(content) {
            Ok(()) => {
                info!("EEPROM content applied, saved to {}", self.program_file.display());
                true
            }
            Err(e) => {
                warn!("EEPROM content rejected: {e}");
                false
            }
        }
    }

    fn stage_and_apply(&self, content: &[u8]) -> Result<(), DeviceError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sigmatcp-").suffix(".xml");
        let mut staged = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(DeviceError::Staging)?;

        staged
            .write_all(content)
            .and_then(|()| staged.flush())
            .map_err(DeviceError::Staging)?;

        self.apply_image_file(staged.path())?;

        fs::copy(staged.path(), &self.program_file).map_err(|source| DeviceError::Persist {
            path: self.program_file.clone(),
            source,
        })?;
        Ok(())
    }
}

// ── Core halt guard ───────────────────────────────────────────────────────────

/// Halted DSP core.  Dropping the guard issues the start-core sequence.
struct CoreHalt<'s, 'b> {
    session: &'s mut BusSession<'b>,
    start_core: Register,
}

impl<'s, 'b> CoreHalt<'s, 'b> {
    /// Hibernates and kills the core.  If any of those writes fails, the
    /// guard is dropped on the way out and the restart still runs.
    fn engage(
        session: &'s mut BusSession<'b>,
        profile: &dyn DeviceProfile,
        settle: Duration,
    ) -> Result<Self, BusError> {
        let mut guard = CoreHalt {
            session,
            start_core: profile.start_core_register(),
        };
        let hibernate = profile.hibernate_register();
        let kill = profile.kill_core_register();

        debug!("halting DSP core");
        guard.session.write(hibernate.address, &hibernate.encode(1))?;
        thread::sleep(settle);
        guard.session.write(kill.address, &kill.encode(0))?;
        guard.session.write(kill.address, &kill.encode(1))?;
        Ok(guard)
    }
}

impl Drop for CoreHalt<'_, '_> {
    fn drop(&mut self) {
        debug!("restarting DSP core");
        let reg = self.start_core;
        for value in [0, 1] {
            if let Err(e) = self.session.write(reg.address, &reg.encode(value)) {
                warn!("start-core write {value} failed: {e}");
            }
        }
    }
}

/// READ_RESPONSE-style record header hashed ahead of each block.  The total
/// length field carries the header size alone, as existing checksum
/// consumers expect.
fn block_record_header(address: u16, len: usize) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = Opcode::ReadResponse as u8;
    header[1..5].copy_from_slice(&(HEADER_SIZE as u32).to_be_bytes());
    header[5] = RESPONSE_CHIP_ADDRESS;
    header[6..10].copy_from_slice(&(len as u32).to_be_bytes());
    header[10..12].copy_from_slice(&address.to_be_bytes());
    header
}

fn advance(address: u16, cells: usize) -> Result<u16, BusError> {
    u16::try_from(usize::from(address) + cells).map_err(|_| BusError::AddressOverflow {
        base: address,
        cells,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
