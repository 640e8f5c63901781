//! Frame checksum verification for Satlantic sample lines.
//!
//! The last comma-separated field of a frame is the two's complement of the
//! byte sum of everything before it (trailing comma included), so a valid
//! frame sums to zero modulo 256 once the checksum value is added back.

use super::{DataIntegrityError, Result};

/// A line whose checksum has been verified. Surrounding whitespace and line
/// terminators are stripped, the content is otherwise untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanLine<'a>(&'a str);

impl<'a> CleanLine<'a> {
    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

impl std::fmt::Display for CleanLine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Checksum the instrument would append to `payload` (payload includes the
/// comma that precedes the checksum field).
pub fn frame_checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

pub fn validate(raw_line: &str) -> Result<CleanLine<'_>> {
    let line = raw_line.trim();
    let split = line
        .rfind(',')
        .ok_or_else(|| DataIntegrityError::MalformedChecksum(line.to_string()))?;

    let (payload, field) = line.split_at(split + 1);
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DataIntegrityError::MalformedChecksum(line.to_string()));
    }
    let actual: u32 = field
        .parse()
        .map_err(|_| DataIntegrityError::MalformedChecksum(line.to_string()))?;

    let expected = frame_checksum(payload.as_bytes());
    if actual != u32::from(expected) {
        log::debug!("Checksum mismatch: expected {} got {} for '{}'", expected, actual, line);
        return Err(DataIntegrityError::ChecksumMismatch {
            line: line.to_string(),
            expected,
            actual,
        });
    }

    Ok(CleanLine(line))
}
