//! Redaction helpers for logs and audit records.
//!
//! Personal data never reaches a log line verbatim. Recipients appear as a
//! short SHA-256 fingerprint; secrets appear only as length plus fingerprint.

use sha2::{Digest, Sha256};

use crate::domain::event::RecipientEmail;

/// Marker used in place of values that must not be logged at all.
pub const REDACTED: &str = "[REDACTED]";

/// Hex characters kept in a log fingerprint.
const FINGERPRINT_LEN: usize = 16;

fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Short, stable fingerprint of an arbitrary value for correlation in logs.
///
/// # Examples
/// ```
/// use lease_notifier::domain::redaction::fingerprint;
///
/// let print = fingerprint("a@gov.uk");
/// assert_eq!(print.len(), 16);
/// assert_eq!(print, fingerprint("a@gov.uk"));
/// ```
pub fn fingerprint(value: &str) -> String {
    let mut digest = sha256_hex(value);
    digest.truncate(FINGERPRINT_LEN);
    digest
}

/// Log-safe fingerprint of a recipient, case-insensitive.
pub fn recipient_fingerprint(recipient: &RecipientEmail) -> String {
    fingerprint(&recipient.canonical())
}

/// Full digest of a recipient used to compare identities in idempotency
/// records without storing the address.
pub fn recipient_digest(recipient: &RecipientEmail) -> String {
    sha256_hex(&recipient.canonical())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_fingerprints_ignore_case() {
        let lower = RecipientEmail::new("ada@gov.uk").expect("valid email");
        let upper = RecipientEmail::new("ADA@GOV.UK").expect("valid email");
        assert_eq!(recipient_fingerprint(&lower), recipient_fingerprint(&upper));
        assert_eq!(recipient_digest(&lower), recipient_digest(&upper));
    }

    #[test]
    fn digests_are_plain_hex() {
        let email = RecipientEmail::new("ada@gov.uk").expect("valid email");
        let digest = recipient_digest(&email);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
