//! Strict JSON object reader that records violations by field path.
//!
//! Every key read through [`Fields`] is marked as consumed; [`Fields::finish`]
//! reports anything left over as an unexpected field.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::event::{
    AccountId, Hours, IdentityError, LeaseUuid, Money, Percentage, QuantityError, RecipientEmail,
};

use super::{FieldViolation, ViolationRule};

pub(super) struct Fields<'a> {
    object: &'a Map<String, Value>,
    path: String,
    consumed: BTreeSet<&'a str>,
    violations: Vec<FieldViolation>,
}

impl<'a> Fields<'a> {
    pub(super) fn new(object: &'a Map<String, Value>, path: impl Into<String>) -> Self {
        Self {
            object,
            path: path.into(),
            consumed: BTreeSet::new(),
            violations: Vec::new(),
        }
    }

    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{name}", self.path)
        }
    }

    pub(super) fn reject(&mut self, name: &str, rule: ViolationRule) {
        let path = self.child_path(name);
        self.violations.push(FieldViolation { path, rule });
    }

    /// Read a field that must be present and non-null.
    pub(super) fn required<T>(
        &mut self,
        name: &'a str,
        parse: impl FnOnce(&'a Value) -> Result<T, ViolationRule>,
    ) -> Option<T> {
        self.consumed.insert(name);
        match self.object.get(name) {
            None | Some(Value::Null) => {
                self.reject(name, ViolationRule::MissingField);
                None
            }
            Some(value) => self.parse_value(name, value, parse),
        }
    }

    /// Read a field that may be absent; `null` counts as absent.
    pub(super) fn optional<T>(
        &mut self,
        name: &'a str,
        parse: impl FnOnce(&'a Value) -> Result<T, ViolationRule>,
    ) -> Option<T> {
        self.consumed.insert(name);
        match self.object.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => self.parse_value(name, value, parse),
        }
    }

    /// Read a required nested object through its own strict reader.
    pub(super) fn nested<T>(
        &mut self,
        name: &'a str,
        build: impl FnOnce(&mut Fields<'a>) -> Option<T>,
    ) -> Option<T> {
        self.consumed.insert(name);
        let value = match self.object.get(name) {
            None | Some(Value::Null) => {
                self.reject(name, ViolationRule::MissingField);
                return None;
            }
            Some(value) => value,
        };
        let Value::Object(object) = value else {
            self.reject(name, ViolationRule::WrongType { expected: "object" });
            return None;
        };
        let mut child = Fields::new(object, self.child_path(name));
        let built = build(&mut child);
        self.violations.extend(child.finish());
        built
    }

    /// Mark every remaining key as consumed.
    ///
    /// Used once a discriminator has already failed, so that sibling fields
    /// are not additionally reported as unexpected.
    pub(super) fn ignore_remaining(&mut self) {
        self.consumed.extend(self.object.keys().map(String::as_str));
    }

    pub(super) fn finish(mut self) -> Vec<FieldViolation> {
        let unexpected: Vec<String> = self
            .object
            .keys()
            .filter(|key| !self.consumed.contains(key.as_str()))
            .map(|key| self.child_path(key))
            .collect();
        self.violations
            .extend(unexpected.into_iter().map(|path| FieldViolation {
                path,
                rule: ViolationRule::UnexpectedField,
            }));
        self.violations
    }

    fn parse_value<T>(
        &mut self,
        name: &str,
        value: &'a Value,
        parse: impl FnOnce(&'a Value) -> Result<T, ViolationRule>,
    ) -> Option<T> {
        match parse(value) {
            Ok(parsed) => Some(parsed),
            Err(rule) => {
                self.reject(name, rule);
                None
            }
        }
    }
}

pub(super) fn string(value: &Value) -> Result<&str, ViolationRule> {
    value
        .as_str()
        .ok_or(ViolationRule::WrongType { expected: "string" })
}

/// Bounded free text without control characters other than line breaks.
pub(super) fn text(max: usize) -> impl FnOnce(&Value) -> Result<String, ViolationRule> {
    move |value| {
        let raw = string(value)?;
        if raw.chars().count() > max {
            return Err(ViolationRule::TooLong { max });
        }
        if raw
            .chars()
            .any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t')
        {
            return Err(ViolationRule::InvalidFormat);
        }
        Ok(raw.to_owned())
    }
}

pub(super) fn boolean(value: &Value) -> Result<bool, ViolationRule> {
    value
        .as_bool()
        .ok_or(ViolationRule::WrongType { expected: "boolean" })
}

fn number(value: &Value) -> Result<f64, ViolationRule> {
    value
        .as_f64()
        .ok_or(ViolationRule::WrongType { expected: "number" })
}

fn identity(error: IdentityError) -> ViolationRule {
    match error {
        IdentityError::TooLong { max } => ViolationRule::TooLong { max },
        IdentityError::Empty | IdentityError::InvalidFormat => ViolationRule::InvalidFormat,
    }
}

fn quantity(error: QuantityError) -> ViolationRule {
    ViolationRule::OutOfRange(error)
}

pub(super) fn email(value: &Value) -> Result<RecipientEmail, ViolationRule> {
    RecipientEmail::new(string(value)?).map_err(identity)
}

pub(super) fn lease_uuid(value: &Value) -> Result<LeaseUuid, ViolationRule> {
    LeaseUuid::new(string(value)?).map_err(identity)
}

pub(super) fn account_id(value: &Value) -> Result<AccountId, ViolationRule> {
    AccountId::new(string(value)?).map_err(identity)
}

pub(super) fn money(value: &Value) -> Result<Money, ViolationRule> {
    Money::from_pounds(number(value)?).map_err(quantity)
}

pub(super) fn hours(value: &Value) -> Result<Hours, ViolationRule> {
    Hours::new(number(value)?).map_err(quantity)
}

pub(super) fn percentage(value: &Value) -> Result<Percentage, ViolationRule> {
    Percentage::new(number(value)?).map_err(quantity)
}

pub(super) fn timestamp(value: &Value) -> Result<DateTime<Utc>, ViolationRule> {
    parse_timestamp(string(value)?)
}

pub(super) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ViolationRule> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| ViolationRule::InvalidFormat)
}
