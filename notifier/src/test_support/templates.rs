//! Template registry and link settings for tests.

use std::collections::BTreeMap;

use url::Url;

use crate::domain::EventKind;
use crate::domain::templates::{LinkSettings, TemplateId, TemplateRegistry};

/// Template id used for `kind`, e.g. `tmpl-lease-approved`.
pub fn template_id(kind: EventKind) -> TemplateId {
    TemplateId::new(format!("tmpl-{}", kind.config_key().replace('_', "-")))
        .unwrap_or_else(|err| panic!("fixture template id is valid: {err}"))
}

/// Registry covering every kind.
pub fn registry() -> TemplateRegistry {
    let ids: BTreeMap<_, _> = EventKind::ALL
        .into_iter()
        .map(|kind| (kind, template_id(kind)))
        .collect();
    TemplateRegistry::new(ids).unwrap_or_else(|err| panic!("fixture registry is complete: {err}"))
}

/// SSO portal base used in tests.
pub const SSO_PORTAL: &str = "https://sso.example.gov.uk/start";
/// Self-service portal base used in tests.
pub const SELF_SERVICE_PORTAL: &str = "https://portal.example.gov.uk/";

/// Link settings pointing at the test portals.
pub fn links() -> LinkSettings {
    let parse = |raw: &str| {
        Url::parse(raw).unwrap_or_else(|err| panic!("fixture url is valid: {err}"))
    };
    LinkSettings::new(parse(SSO_PORTAL), parse(SELF_SERVICE_PORTAL))
        .unwrap_or_else(|err| panic!("fixture links are https: {err}"))
}
