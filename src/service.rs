use crate::base32::{self, DecodeError};
use serde::Serialize;
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;
use zeroize::Zeroizing;

pub const MAX_TEXT_LEN: usize = 64;
pub const MAX_SECRET_LEN: usize = 128;
/// Upper bound for a decoded key; a 128 char secret decodes to 80 bytes.
pub const MAX_KEY_LEN: usize = 128;

pub const DEFAULT_DIGITS: u8 = 6;
pub const SUPPORTED_DIGITS: RangeInclusive<u8> = 6..=8;
pub const DEFAULT_PERIOD: u32 = 30;
pub const MAX_PERIOD: u32 = 120;

pub fn valid_period(period: u32) -> bool {
    period > 0 && period <= MAX_PERIOD
}

/// Display text capped at `N` bytes. Longer input is cut at the last
/// char boundary that fits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BoundedText<const N: usize>(String);

impl<const N: usize> BoundedText<N> {
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(N);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self(text[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> fmt::Display for BoundedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Text = BoundedText<MAX_TEXT_LEN>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret is empty")]
    Empty,
    #[error("secret is {len} characters long, at most {max} are allowed")]
    TooLong { len: usize, max: usize },
    #[error("secret is not valid base32: {0}")]
    Encoding(#[from] DecodeError),
    #[error("secret decodes to an empty key")]
    NoKeyBytes,
}

/// Base32 shared key, kept in its encoded form.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(encoded: &str) -> Result<Self, SecretError> {
        if encoded.is_empty() {
            return Err(SecretError::Empty);
        }
        if encoded.len() > MAX_SECRET_LEN {
            return Err(SecretError::TooLong {
                len: encoded.len(),
                max: MAX_SECRET_LEN,
            });
        }
        let secret = Self(encoded.to_string());
        if secret.decode()?.is_empty() {
            return Err(SecretError::NoKeyBytes);
        }
        Ok(secret)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw key bytes, wiped when dropped.
    pub fn decode(&self) -> Result<Zeroizing<Vec<u8>>, DecodeError> {
        base32::decode(&self.0, MAX_KEY_LEN).map(Zeroizing::new)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("unsupported digit count {0}, expected 6, 7 or 8")]
    Digits(u8),
    #[error("period {0}s is outside 1..=120")]
    Period(u32),
}

/// One OTP-generating credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    service_name: Text,
    account: Text,
    issuer: Text,
    secret: Secret,
    digits: u8,
    period: u32,
}

impl ServiceDescriptor {
    pub fn new(
        service_name: &str,
        account: &str,
        issuer: &str,
        secret: Secret,
        digits: u8,
        period: u32,
    ) -> Result<Self, DescriptorError> {
        if !SUPPORTED_DIGITS.contains(&digits) {
            return Err(DescriptorError::Digits(digits));
        }
        if !valid_period(period) {
            return Err(DescriptorError::Period(period));
        }
        Ok(Self {
            service_name: Text::new(service_name),
            account: Text::new(account),
            issuer: Text::new(issuer),
            secret,
            digits,
            period,
        })
    }

    pub fn service_name(&self) -> &str {
        self.service_name.as_str()
    }

    pub fn account(&self) -> &str {
        self.account.as_str()
    }

    pub fn issuer(&self) -> &str {
        self.issuer.as_str()
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn digits(&self) -> u8 {
        self.digits
    }

    pub fn period(&self) -> u32 {
        self.period
    }
}

#[cfg(test)]
pub fn sample(name: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(
        name,
        &format!("{name}@example.com"),
        name,
        Secret::new("JBSWY3DPEHPK3PXP").unwrap(),
        DEFAULT_DIGITS,
        DEFAULT_PERIOD,
    )
    .unwrap()
}
