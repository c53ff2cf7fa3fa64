//! DTOs for the Notify JSON API.
//!
//! Requests are serialised from the domain [`EmailRequest`]; responses decode
//! into these transport DTOs first and are mapped into domain values in one
//! pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::ports::{EmailReceipt, EmailRequest};

#[derive(Debug, Serialize)]
pub(super) struct SendEmailDto<'a> {
    pub(super) template_id: &'a str,
    pub(super) email_address: &'a str,
    pub(super) personalisation: &'a BTreeMap<String, String>,
    pub(super) reference: &'a str,
}

impl<'a> From<&'a EmailRequest> for SendEmailDto<'a> {
    fn from(request: &'a EmailRequest) -> Self {
        Self {
            template_id: request.template_id.as_str(),
            email_address: request.email_address.as_str(),
            personalisation: &request.personalisation,
            reference: request.reference.as_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SendEmailResponseDto {
    #[serde(default)]
    pub(super) id: Option<String>,
}

impl SendEmailResponseDto {
    pub(super) fn into_receipt(self) -> EmailReceipt {
        EmailReceipt {
            message_id: self.id.filter(|id| !id.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TemplateDto {
    #[serde(default)]
    pub(super) personalisation: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub(super) subject: Option<String>,
    #[serde(default)]
    pub(super) body: Option<String>,
}

impl TemplateDto {
    /// Declared field names.
    ///
    /// Prefers the explicit `personalisation` object; older template payloads
    /// only carry `((placeholder))` markers in the subject and body.
    pub(super) fn into_field_names(self) -> BTreeSet<String> {
        if let Some(declared) = self.personalisation {
            return declared.into_keys().collect();
        }
        [self.subject, self.body]
            .into_iter()
            .flatten()
            .flat_map(|text| placeholders(&text))
            .collect()
    }
}

fn placeholders(text: &str) -> Vec<String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let pattern = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\(\(\s*([^()?\s]+)\s*(?:\?\?[^()]*)?\)\)")
            .unwrap_or_else(|error| panic!("placeholder pattern must compile: {error}"))
    });
    pattern
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str().to_owned())
        .collect()
}
