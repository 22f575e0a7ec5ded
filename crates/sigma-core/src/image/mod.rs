//! Device programming scripts.
//!
//! A programming script is an ordered list of [`ImageAction`]s that, applied
//! in sequence over the control bus, flashes a DSP image (typically the
//! self-boot EEPROM).  Order is significant and never changed after parsing.
//!
//! Scripts are stored in the SigmaStudio XML export format:
//!
//! ```xml
//! <ROM>
//!   <page modetype="Mode 0">
//!     <action instr="writeXbytes" addr="62464" ParamName="g_Erase">00 01</action>
//!     <action instr="delay" />
//!   </page>
//! </ROM>
//! ```

pub mod parser;

use std::path::PathBuf;

use thiserror::Error;

pub use parser::parse_image_script;

/// Parameter-name marker for actions that erase flash and need settle time.
pub const ERASE_MARKER: &str = "g_Erase";

/// One step of a programming script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageAction {
    /// Write `data` to the bus starting at cell `address`.
    WriteBytes {
        address: u16,
        param_name: String,
        data: Vec<u8>,
    },
    /// Pause before the next action.
    Delay,
}

impl ImageAction {
    /// Returns `true` for writes whose parameter name marks a flash erase.
    pub fn is_erase(&self) -> bool {
        match self {
            ImageAction::WriteBytes { param_name, .. } => param_name.contains(ERASE_MARKER),
            ImageAction::Delay => false,
        }
    }
}

/// Errors produced while loading or parsing a programming script.
#[derive(Debug, Error)]
pub enum ImageScriptError {
    /// The script file could not be read.
    #[error("cannot read programming script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The text is not well-formed XML.
    #[error("programming script is not valid XML: {0}")]
    Xml(String),

    /// A required element is absent.
    #[error("programming script has no <{0}> element")]
    MissingElement(&'static str),

    /// An action lacks a required attribute.
    #[error("action #{index} is missing attribute '{attribute}'")]
    MissingAttribute { index: usize, attribute: &'static str },

    /// The `addr` attribute is not a decimal 16-bit cell address.
    #[error("action #{index} has invalid address '{value}'")]
    InvalidAddress { index: usize, value: String },

    /// A data token is not a hexadecimal byte.
    #[error("action #{index} has invalid data byte '{token}'")]
    InvalidByte { index: usize, token: String },
}
