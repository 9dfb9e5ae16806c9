//! ASCII armor around binary age envelopes

use std::io::{Read, Write};

use age::armor::{ArmoredReader, ArmoredWriter, Format};

use crate::error::{KeystoreError, Result};

pub const BEGIN: &str = "-----BEGIN AGE ENCRYPTED FILE-----";
pub const END: &str = "-----END AGE ENCRYPTED FILE-----";
/// First line of a binary envelope
pub const INTRO: &[u8] = b"age-encryption.org/v1\n";

pub fn encode(bytes: &[u8]) -> Result<String> {
    let mut writer = ArmoredWriter::wrap_output(Vec::new(), Format::AsciiArmor)?;
    writer.write_all(bytes)?;
    let armored = writer.finish()?;
    String::from_utf8(armored).map_err(|_| KeystoreError::crypto("armor output is not UTF-8"))
}

pub fn is_armored(text: &str) -> bool {
    text.trim_start().starts_with(BEGIN)
}

/// Armored text or a raw binary envelope
pub(crate) fn is_envelope(bytes: &[u8]) -> bool {
    bytes.starts_with(INTRO) || std::str::from_utf8(bytes).map_or(false, is_armored)
}

pub fn decode(armor: &str) -> Result<Vec<u8>> {
    let trimmed = armor.trim();
    if !trimmed.starts_with(BEGIN) {
        return Err(KeystoreError::parse("missing armor BEGIN line"));
    }

    // Records copied between systems may have picked up CRLF on some lines only
    let mut canonical = trimmed.replace("\r\n", "\n");
    canonical.push('\n');

    let mut bytes = Vec::new();
    ArmoredReader::new(canonical.as_bytes())
        .read_to_end(&mut bytes)
        .map_err(|e| KeystoreError::parse(format!("invalid armor: {}", e)))?;
    Ok(bytes)
}

/// Binary envelope from armored or binary input
pub(crate) fn decode_input(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.starts_with(INTRO) {
        return Ok(bytes.to_vec());
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|_| KeystoreError::parse("envelope is neither armored nor binary"))?;
    decode(text)
}
