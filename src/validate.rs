//! Sanitizing of caller-supplied identifiers.
//!
//! Absent values fall back to [`DEFAULT_SOURCE_ADDRESS`] / [`DEFAULT_APPLICATION_NAME`]
//! and are then validated like any supplied value.

use regex::Regex;
use std::sync::LazyLock;

pub const DEFAULT_SOURCE_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_APPLICATION_NAME: &str = "default";

/// Longest accepted source address, sized for textual IPv6 even though only IPv4 passes.
pub const MAX_SOURCE_ADDRESS_LEN: usize = 45;
pub const MAX_APPLICATION_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid source address")]
    SourceAddress,
    #[error("invalid application name")]
    ApplicationName,
}

/// Validate the caller address as dotted-decimal IPv4 with every octet in 0..=255.
pub fn source_address(raw: Option<&str>) -> Result<String, ValidationError> {
    static IPV4_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([0-9]{1,3}\.){3}[0-9]{1,3}$").unwrap());

    let value = raw.unwrap_or(DEFAULT_SOURCE_ADDRESS);
    if value.len() > MAX_SOURCE_ADDRESS_LEN || !IPV4_RE.is_match(value) {
        return Err(ValidationError::SourceAddress);
    }
    // The pattern only bounds digit counts; "999.1.1.1" must still fail.
    if value.split('.').any(|octet| octet.parse::<u8>().is_err()) {
        return Err(ValidationError::SourceAddress);
    }
    Ok(value.to_owned())
}

/// Validate the caller-chosen application identifier.
pub fn application_name(raw: Option<&str>) -> Result<String, ValidationError> {
    static APP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

    let value = raw.unwrap_or(DEFAULT_APPLICATION_NAME);
    if value.len() > MAX_APPLICATION_NAME_LEN || !APP_RE.is_match(value) {
        return Err(ValidationError::ApplicationName);
    }
    Ok(value.to_owned())
}
