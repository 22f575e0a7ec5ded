//! XML programming-script parser.

use roxmltree::{Document, Node};
use tracing::debug;

use crate::image::{ImageAction, ImageScriptError};

const INSTR_WRITE: &str = "writeXbytes";
const INSTR_DELAY: &str = "delay";

/// Parses a SigmaStudio XML programming script into ordered actions.
///
/// Every `<page>` under `<ROM>` is visited in document order.  Actions with an
/// `instr` other than `writeXbytes` or `delay` are skipped.
///
/// # Errors
///
/// Returns [`ImageScriptError`] when the XML is malformed, the `<ROM>` root is
/// missing, or an action carries an invalid address or data byte.
///
/// # Examples
///
/// ```rust
/// use sigma_core::image::{parse_image_script, ImageAction};
///
/// let xml = r#"<ROM><page><action instr="writeXbytes" addr="16" ParamName="p">0A ff</action></page></ROM>"#;
/// let actions = parse_image_script(xml).unwrap();
/// assert_eq!(
///     actions,
///     vec![ImageAction::WriteBytes { address: 16, param_name: "p".into(), data: vec![0x0A, 0xFF] }]
/// );
/// ```
pub fn parse_image_script(text: &str) -> Result<Vec<ImageAction>, ImageScriptError> {
    let doc = Document::parse(text).map_err(|e| ImageScriptError::Xml(e.to_string()))?;

    let root = doc.root_element();
    if !root.has_tag_name("ROM") {
        return Err(ImageScriptError::MissingElement("ROM"));
    }

    let mut actions = Vec::new();
    let mut index = 0usize;
    for page in root.children().filter(|n| n.has_tag_name("page")) {
        for node in page.children().filter(|n| n.has_tag_name("action")) {
            if let Some(action) = parse_action(node, index)? {
                actions.push(action);
            }
            index += 1;
        }
    }

    debug!("parsed {} programming actions", actions.len());
    Ok(actions)
}

fn parse_action(node: Node<'_, '_>, index: usize) -> Result<Option<ImageAction>, ImageScriptError> {
    let instr = node
        .attribute("instr")
        .ok_or(ImageScriptError::MissingAttribute {
            index,
            attribute: "instr",
        })?;

    match instr {
        INSTR_WRITE => {
            let raw_addr = node.attribute("addr").ok_or(ImageScriptError::MissingAttribute {
                index,
                attribute: "addr",
            })?;
            let address = raw_addr
                .trim()
                .parse::<u16>()
                .map_err(|_| ImageScriptError::InvalidAddress {
                    index,
                    value: raw_addr.to_string(),
                })?;
            let param_name = node.attribute("ParamName").unwrap_or_default().to_string();
            let data = parse_hex_bytes(node.text().unwrap_or_default(), index)?;
            Ok(Some(ImageAction::WriteBytes {
                address,
                param_name,
                data,
            }))
        }
        INSTR_DELAY => Ok(Some(ImageAction::Delay)),
        other => {
            debug!("skipping action #{index} with unsupported instr '{other}'");
            Ok(None)
        }
    }
}

fn parse_hex_bytes(text: &str, index: usize) -> Result<Vec<u8>, ImageScriptError> {
    text.split_whitespace()
        .map(|token| {
            u8::from_str_radix(token, 16).map_err(|_| ImageScriptError::InvalidByte {
                index,
                token: token.to_string(),
            })
        })
        .collect()
}
