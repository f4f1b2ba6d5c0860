use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base32 character {ch:?} at position {position}")]
    InvalidCharacter { ch: char, position: usize },
    #[error("decoded key exceeds {capacity} bytes")]
    CapacityExceeded { capacity: usize },
}

fn symbol_value(c: char) -> Option<u32> {
    match c {
        'A'..='Z' => Some(c as u32 - 'A' as u32),
        '2'..='7' => Some(c as u32 - '2' as u32 + 26),
        _ => None,
    }
}

/// Decode an RFC 4648 Base32 string into at most `capacity` bytes.
///
/// Case-insensitive. `=`, space, `\n` and `\r` are skipped anywhere in the
/// input. Trailing bits that do not complete a byte are dropped.
pub fn decode(encoded: &str, capacity: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for (position, ch) in encoded.chars().enumerate() {
        if matches!(ch, '=' | ' ' | '\n' | '\r') {
            continue;
        }
        let value = symbol_value(ch.to_ascii_uppercase())
            .ok_or(DecodeError::InvalidCharacter { ch, position })?;

        buffer = ((buffer << 5) | value) & 0xFFFF;
        bits += 5;

        if bits >= 8 {
            if out.len() >= capacity {
                return Err(DecodeError::CapacityExceeded { capacity });
            }
            out.push((buffer >> (bits - 8)) as u8);
            bits -= 8;
        }
    }

    Ok(out)
}
