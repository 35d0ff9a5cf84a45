//! Byte escaping for field content.
//!
//! Lines are `:`-delimited and newline-terminated, so any control byte and the
//! separator itself travel as `%` followed by the byte plus 64 (`\n` becomes `%J`,
//! `:` becomes `%z`).
//!
//! A literal `%` is written as `%%`. Without that, the receiving side would read the
//! byte after it as an escaped character. The engine writes `%` the same way, so
//! `decode` maps `%%` back to `%`.
//!
//! Only ASCII follows `%` on the wire: the escaped byte must be in `0x40..=0x7f`.

use crate::error::ProtocolError;

pub const ESCAPE: u8 = b'%';
pub const SEPARATOR: u8 = b':';

const OFFSET: u8 = 64;
const ESCAPED: std::ops::RangeInclusive<u8> = OFFSET..=0x7f;

fn needs_escape(b: u8) -> bool {
    b < 0x20 || b == SEPARATOR
}

/// Escape raw bytes for the wire. Never fails; output is at least as long as input.
pub fn encode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for &b in raw {
        if b == ESCAPE {
            out.extend_from_slice(&[ESCAPE, ESCAPE]);
        } else if needs_escape(b) {
            out.extend_from_slice(&[ESCAPE, b + OFFSET]);
        } else {
            out.push(b);
        }
    }
    out
}

/// Reverse [`encode`].
///
/// A trailing `%` with nothing after it, or a `%` followed by a byte outside
/// `0x40..=0x7f` (other than `%`), is a protocol error.
pub fn decode(wire: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(wire.len());
    let mut bytes = wire.iter().copied();
    while let Some(b) = bytes.next() {
        if b != ESCAPE {
            out.push(b);
            continue;
        }
        match bytes.next() {
            None => return Err(ProtocolError::TrailingEscape),
            Some(ESCAPE) => out.push(ESCAPE),
            Some(c) if ESCAPED.contains(&c) => out.push(c - OFFSET),
            Some(c) => return Err(ProtocolError::InvalidEscape { byte: c }),
        }
    }
    Ok(out)
}

/// Escape a text value. The result is ASCII-safe wherever the input was.
pub fn encode_str(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match u8::try_from(c) {
            Ok(ESCAPE) => out.push_str("%%"),
            Ok(b) if needs_escape(b) => {
                out.push(ESCAPE as char);
                out.push((b + OFFSET) as char);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Decode one field into text, naming `field` if the result is not UTF-8.
pub fn decode_str(wire: &str, field: &'static str) -> Result<String, ProtocolError> {
    let raw = decode(wire.as_bytes())?;
    String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8 { field })
}
