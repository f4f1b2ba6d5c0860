//! `otpauth://totp/` provisioning URI parsing.
//!
//! Accepted shape:
//! `otpauth://totp/[ISSUER:]ACCOUNT?secret=BASE32[&issuer=..][&digits=..][&period=..]`

use crate::service::{
    DEFAULT_DIGITS, DEFAULT_PERIOD, DescriptorError, SUPPORTED_DIGITS, Secret, ServiceDescriptor,
    valid_period,
};
use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::form_urlencoded;

pub const URI_PREFIX: &str = "otpauth://totp/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("URI must start with 'otpauth://totp/'")]
    InvalidPrefix,
    #[error("URI has no query string")]
    MissingQuery,
    #[error("secret parameter is required")]
    MissingSecret,
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// `%XX` escapes and `+` as space.
fn url_decode(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

#[derive(Default)]
struct Query {
    secret: Option<String>,
    issuer: Option<String>,
    digits: Option<String>,
    period: Option<String>,
}

impl Query {
    // First occurrence of a key wins.
    fn parse(raw: &str) -> Self {
        let mut query = Query::default();
        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            let slot = match key.as_ref() {
                "secret" => &mut query.secret,
                "issuer" => &mut query.issuer,
                "digits" => &mut query.digits,
                "period" => &mut query.period,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        query
    }
}

fn parse_digits(raw: &str) -> u8 {
    match raw.trim().parse::<u8>() {
        Ok(digits) if SUPPORTED_DIGITS.contains(&digits) => digits,
        _ => {
            log::warn!("invalid digits value {raw:?}, using default {DEFAULT_DIGITS}");
            DEFAULT_DIGITS
        }
    }
}

fn parse_period(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(period) if valid_period(period) => period,
        _ => {
            log::warn!("invalid period value {raw:?}, using default {DEFAULT_PERIOD}");
            DEFAULT_PERIOD
        }
    }
}

/// Parse a provisioning URI into a validated descriptor.
///
/// Out of range `digits` or `period` fall back to their defaults with a
/// warning instead of failing. The secret is checked to be decodable but
/// is stored as given.
pub fn parse_uri(uri: &str) -> Result<ServiceDescriptor, ParseError> {
    let rest = uri
        .strip_prefix(URI_PREFIX)
        .ok_or(ParseError::InvalidPrefix)?;
    let (raw_label, raw_query) = rest.split_once('?').ok_or(ParseError::MissingQuery)?;

    let label = url_decode(raw_label);
    let (service_name, account) = match label.split_once(':') {
        Some((issuer, account)) => (issuer.to_string(), account.to_string()),
        None => (label.clone(), label.clone()),
    };

    let query = Query::parse(raw_query);
    let secret = query.secret.ok_or(ParseError::MissingSecret)?;
    let secret = Secret::new(&secret).map_err(DescriptorError::from)?;
    let issuer = query.issuer.unwrap_or_else(|| service_name.clone());
    let digits = query.digits.as_deref().map_or(DEFAULT_DIGITS, parse_digits);
    let period = query.period.as_deref().map_or(DEFAULT_PERIOD, parse_period);

    let descriptor =
        ServiceDescriptor::new(&service_name, &account, &issuer, secret, digits, period)?;
    log::info!(
        "parsed uri: issuer {}, account {}, digits {}, period {}",
        descriptor.issuer(),
        descriptor.account(),
        descriptor.digits(),
        descriptor.period()
    );
    Ok(descriptor)
}
