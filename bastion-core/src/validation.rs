//! Request field validation shared by the services.

use crate::error::ValidationError;
use std::net::IpAddr;

/// Parses an IP address, rejecting empty or malformed values.
pub fn validate_ip_address(ip_address: &str) -> Result<IpAddr, ValidationError> {
    if ip_address.trim().is_empty() {
        return Err(ValidationError::MissingField(
            "IP address is required".to_string(),
        ));
    }

    ip_address
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| ValidationError::InvalidIpAddress(ip_address.to_string()))
}

/// Canonical form of a login credential: trimmed, ASCII lowercase.
///
/// Attempts are stored and counted under this key, so case variants of one
/// mailbox share a single failure budget.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Validates a human-readable device name.
pub fn validate_device_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::InvalidField(
            "Device name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(ValidationError::InvalidField(
            "Device name must be no more than 100 characters long".to_string(),
        ));
    }

    Ok(())
}

/// Network class of a client address, used as a coarse risk signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpClass {
    Loopback,
    Private,
    Public,
}

pub fn classify_ip(ip: &IpAddr) -> IpClass {
    if ip.is_loopback() {
        return IpClass::Loopback;
    }

    let private = match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
    };

    if private {
        IpClass::Private
    } else {
        IpClass::Public
    }
}

/// The local part of an email address, lowercased.
pub fn email_local_part(email: &str) -> Option<String> {
    email
        .split_once('@')
        .map(|(local, _)| local.to_lowercase())
        .filter(|local| !local.is_empty())
}
