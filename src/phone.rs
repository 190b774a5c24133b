//! Destination phone number validation.
//!
//! Dispatch and verification only accept strict E.164: a `+`, a leading
//! digit 1–9, and 7–15 digits total. No spaces, hyphens, or national
//! formats — normalization is the caller's job, not ours, so malformed
//! input is rejected rather than silently reformatted.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::DispatchError;

static E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9][0-9]{6,14}$").unwrap());

/// Check a destination against the strict E.164 contract.
///
/// Returns the input unchanged on success so call sites can validate
/// and bind in one expression.
pub fn require_e164(destination: &str) -> Result<&str, DispatchError> {
    if E164.is_match(destination) {
        Ok(destination)
    } else {
        let reason = if destination.is_empty() {
            "empty destination".to_string()
        } else if !destination.starts_with('+') {
            "missing leading +".to_string()
        } else if destination.chars().skip(1).any(|c| !c.is_ascii_digit()) {
            "contains non-digit characters".to_string()
        } else {
            "not a valid E.164 number".to_string()
        };
        Err(DispatchError::MalformedDestination {
            destination: destination.to_string(),
            reason,
        })
    }
}

/// True if the destination passes the E.164 contract.
pub fn is_e164(destination: &str) -> bool {
    E164.is_match(destination)
}
