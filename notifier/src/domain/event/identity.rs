//! Strictly validated identifiers carried by lease events.
//!
//! Every identifier is parsed once at the schema boundary and is immutable
//! afterwards. Grammars deliberately reject anything that could smuggle a
//! redirect, query string, protocol prefix, or path segment through a field
//! that later ends up inside a link.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

/// Maximum accepted length of an event identifier.
pub const EVENT_ID_MAX: usize = 128;
/// Maximum accepted length of a recipient address.
pub const EMAIL_MAX: usize = 254;

/// Grammar violations raised while parsing identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityError {
    /// The value was empty.
    Empty,
    /// The value exceeded its maximum length.
    TooLong {
        /// Maximum accepted length.
        max: usize,
    },
    /// The value did not match the identifier grammar.
    InvalidFormat,
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "value must not be empty"),
            Self::TooLong { max } => write!(f, "value must be at most {max} characters"),
            Self::InvalidFormat => write!(f, "value does not match the expected format"),
        }
    }
}

impl std::error::Error for IdentityError {}

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static UUID_RE: OnceLock<Regex> = OnceLock::new();
static ACCOUNT_RE: OnceLock<Regex> = OnceLock::new();
static EVENT_ID_RE: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        // Dot-atom local part and a dotted hostname; no quoting, comments,
        // IP literals, or URL metacharacters.
        let pattern = r"^[A-Za-z0-9](?:[A-Za-z0-9._%+\-']{0,62}[A-Za-z0-9_\-])?@(?:[A-Za-z0-9](?:[A-Za-z0-9\-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,24}$";
        Regex::new(pattern)
            .unwrap_or_else(|error| panic!("recipient email regex failed to compile: {error}"))
    })
}

fn uuid_regex() -> &'static Regex {
    UUID_RE.get_or_init(|| {
        let pattern = r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";
        Regex::new(pattern)
            .unwrap_or_else(|error| panic!("lease uuid regex failed to compile: {error}"))
    })
}

fn account_regex() -> &'static Regex {
    ACCOUNT_RE.get_or_init(|| {
        Regex::new(r"^[0-9]{12}$")
            .unwrap_or_else(|error| panic!("account id regex failed to compile: {error}"))
    })
}

fn event_id_regex() -> &'static Regex {
    EVENT_ID_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:\-]*$")
            .unwrap_or_else(|error| panic!("event id regex failed to compile: {error}"))
    })
}

fn check_length(raw: &str, max: usize) -> Result<(), IdentityError> {
    if raw.is_empty() {
        return Err(IdentityError::Empty);
    }
    if raw.chars().count() > max {
        return Err(IdentityError::TooLong { max });
    }
    Ok(())
}

/// Provider-assigned unique event identifier.
///
/// # Examples
/// ```
/// use lease_notifier::domain::EventId;
///
/// let id = EventId::new("evt-1").expect("valid id");
/// assert_eq!(id.as_ref(), "evt-1");
/// assert!(EventId::new("evt-1?redirect=x").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct EventId(String);

impl EventId {
    /// Validate and construct an [`EventId`].
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        check_length(&raw, EVENT_ID_MAX)?;
        if !event_id_regex().is_match(&raw) {
            return Err(IdentityError::InvalidFormat);
        }
        Ok(Self(raw))
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<EventId> for String {
    fn from(value: EventId) -> Self {
        value.0
    }
}

/// Recipient identity: a single email address.
///
/// Equality between recipient identities is case-insensitive; use
/// [`RecipientEmail::same_identity`] rather than comparing the raw strings.
/// The `Debug` implementation redacts the address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RecipientEmail(String);

impl RecipientEmail {
    /// Validate and construct a [`RecipientEmail`].
    ///
    /// # Examples
    /// ```
    /// use lease_notifier::domain::RecipientEmail;
    ///
    /// let email = RecipientEmail::new("a@gov.uk").expect("valid email");
    /// assert_eq!(email.domain(), "gov.uk");
    /// assert!(RecipientEmail::new("a@gov.uk/?next=http://evil").is_err());
    /// ```
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        check_length(&raw, EMAIL_MAX)?;
        if !email_regex().is_match(&raw) {
            return Err(IdentityError::InvalidFormat);
        }
        Ok(Self(raw))
    }

    /// Compare two identities case-insensitively.
    pub fn same_identity(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }

    /// Lower-cased form used for keys and digests.
    pub fn canonical(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Domain part of the address, as written.
    pub fn domain(&self) -> &str {
        self.0
            .rsplit_once('@')
            .map_or(self.0.as_str(), |(_, domain)| domain)
    }
}

impl AsRef<str> for RecipientEmail {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for RecipientEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecipientEmail([REDACTED])")
    }
}

/// Canonical hyphenated lease UUID.
///
/// Only the 8-4-4-4-12 form is accepted: braces, `urn:uuid:` prefixes, simple
/// (unhyphenated) forms, and anything with trailing path or query text are
/// rejected even though [`Uuid::parse_str`] would accept some of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseUuid(Uuid);

impl LeaseUuid {
    /// Validate and construct a [`LeaseUuid`].
    pub fn new(raw: &str) -> Result<Self, IdentityError> {
        check_length(raw, 36)?;
        if !uuid_regex().is_match(raw) {
            return Err(IdentityError::InvalidFormat);
        }
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| IdentityError::InvalidFormat)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for LeaseUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Twelve-digit cloud account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    /// Validate and construct an [`AccountId`].
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        check_length(&raw, 12)?;
        if !account_regex().is_match(&raw) {
            return Err(IdentityError::InvalidFormat);
        }
        Ok(Self(raw))
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite lease identifier. Both halves are always present together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    recipient: RecipientEmail,
    uuid: LeaseUuid,
}

impl LeaseKey {
    /// Pair a recipient identity with a lease UUID.
    pub fn new(recipient: RecipientEmail, uuid: LeaseUuid) -> Self {
        Self { recipient, uuid }
    }

    /// Claimed recipient identity.
    pub fn recipient(&self) -> &RecipientEmail {
        &self.recipient
    }

    /// Lease UUID.
    pub fn uuid(&self) -> &LeaseUuid {
        &self.uuid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a@gov.uk")]
    #[case("first.last+tag@digital.cabinet-office.gov.uk")]
    #[case("o'brien@example.org")]
    fn accepts_plain_addresses(#[case] raw: &str) {
        assert!(RecipientEmail::new(raw).is_ok(), "{raw} should be accepted");
    }

    #[rstest]
    #[case("")]
    #[case("no-at-sign")]
    #[case("a@gov.uk?next=https://evil.example")]
    #[case("a@gov.uk/../admin")]
    #[case("a@gov.uk#fragment")]
    #[case("\"quoted\"@gov.uk")]
    #[case("a@[127.0.0.1]")]
    #[case("a b@gov.uk")]
    #[case("a@gov")]
    fn rejects_addresses_with_redirect_or_odd_syntax(#[case] raw: &str) {
        assert!(RecipientEmail::new(raw).is_err(), "{raw} should be rejected");
    }

    #[test]
    fn identity_comparison_ignores_case() {
        let email = RecipientEmail::new("Ada@Gov.UK").expect("valid email");
        assert!(email.same_identity("ada@gov.uk"));
        assert_eq!(email.canonical(), "ada@gov.uk");
    }

    #[test]
    fn debug_output_redacts_address() {
        let email = RecipientEmail::new("ada@gov.uk").expect("valid email");
        assert!(!format!("{email:?}").contains("ada"));
    }

    #[rstest]
    #[case("11111111-1111-1111-1111-111111111111")]
    #[case("550E8400-E29B-41D4-A716-446655440000")]
    fn accepts_canonical_uuids(#[case] raw: &str) {
        assert!(LeaseUuid::new(raw).is_ok());
    }

    #[rstest]
    #[case("{11111111-1111-1111-1111-111111111111}")]
    #[case("urn:uuid:11111111-1111-1111-1111-111111111111")]
    #[case("11111111111111111111111111111111")]
    #[case("https://evil.example/11111111-1111-1111-1111-111111111111")]
    #[case("11111111-1111-1111-1111-111111111111?x=1")]
    #[case("../11111111-1111-1111-1111-11111111111")]
    fn rejects_non_canonical_uuids(#[case] raw: &str) {
        assert!(LeaseUuid::new(raw).is_err(), "{raw} should be rejected");
    }

    #[rstest]
    #[case("123456789012", true)]
    #[case("12345678901", false)]
    #[case("12345678901a", false)]
    #[case("1234567890123", false)]
    fn account_ids_are_twelve_digits(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(AccountId::new(raw).is_ok(), valid);
    }

    #[rstest]
    #[case("evt-1", true)]
    #[case("b2a3c4d5-0000-4000-8000-000000000000", true)]
    #[case("", false)]
    #[case(" evt", false)]
    #[case("evt/1", false)]
    fn event_ids_use_a_conservative_grammar(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(EventId::new(raw).is_ok(), valid);
    }
}
