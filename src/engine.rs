//! RFC 4226 (HOTP) and RFC 6238 (TOTP) code generation.
//!
//! Only HMAC-SHA1 is supported, which is what every provisioning URI this
//! service accepts implies.

use crate::base32::{self, DecodeError};
use crate::clock::{Clock, ClockError};
use crate::service::{MAX_KEY_LEN, SUPPORTED_DIGITS};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("secret is not valid base32: {0}")]
    InvalidSecret(#[from] DecodeError),
    #[error("secret decodes to an empty key")]
    EmptyKey,
    #[error("unsupported digit count {0}, expected 6, 7 or 8")]
    UnsupportedDigits(u8),
    #[error("time step must be at least one second")]
    ZeroPeriod,
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error("hmac-sha1 failed: {0}")]
    Hmac(String),
}

/// HOTP value for a raw key and counter, as an integer below `10^digits`.
pub fn hotp(key: &[u8], counter: u64, digits: u8) -> Result<u32, EngineError> {
    if !SUPPORTED_DIGITS.contains(&digits) {
        return Err(EngineError::UnsupportedDigits(digits));
    }

    let mut mac =
        Hmac::<Sha1>::new_from_slice(key).map_err(|e| EngineError::Hmac(e.to_string()))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation, RFC 4226 §5.3.
    let offset = (digest[19] & 0x0F) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7F,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    Ok(binary % 10u32.pow(digits as u32))
}

/// TOTP value for a Base32 secret at an explicit unix timestamp.
pub fn generate_code_at(
    secret_b32: &str,
    period: u32,
    digits: u8,
    unix_time: u64,
) -> Result<u32, EngineError> {
    if !SUPPORTED_DIGITS.contains(&digits) {
        return Err(EngineError::UnsupportedDigits(digits));
    }
    if period == 0 {
        return Err(EngineError::ZeroPeriod);
    }

    let key = Zeroizing::new(base32::decode(secret_b32, MAX_KEY_LEN)?);
    if key.is_empty() {
        return Err(EngineError::EmptyKey);
    }

    let counter = unix_time / period as u64;
    log::debug!("totp counter {counter} (period {period}s)");
    hotp(&key, counter, digits)
}

/// TOTP value for a Base32 secret at the clock's current time.
pub fn generate_code(
    secret_b32: &str,
    period: u32,
    digits: u8,
    clock: &dyn Clock,
) -> Result<u32, EngineError> {
    generate_code_at(secret_b32, period, digits, clock.unix_time()?)
}

/// Seconds left in the current time step, in `1..=period`.
pub fn remaining_seconds_at(unix_time: u64, period: u32) -> Result<u32, EngineError> {
    if period == 0 {
        return Err(EngineError::ZeroPeriod);
    }
    let period = period as u64;
    Ok((period - unix_time % period) as u32)
}

pub fn remaining_seconds(period: u32, clock: &dyn Clock) -> Result<u32, EngineError> {
    remaining_seconds_at(clock.unix_time()?, period)
}

/// Zero-pad a code to its configured width.
pub fn format_code(code: u32, digits: u8) -> String {
    format!("{:0>width$}", code, width = digits as usize)
}
