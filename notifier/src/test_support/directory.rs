//! Store rows matching the event builders.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use super::events::{ACCOUNT_ID, LEASE_UUID};
use crate::domain::ports::{AccountRecord, LeaseRecord, LeaseStatus, LeaseTemplateRecord};

/// Lease template referenced by [`lease_record`].
pub const TEMPLATE_UUID: &str = "22222222-2222-2222-2222-222222222222";

fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_else(|| panic!("fixture instant is unambiguous"))
}

/// Lease row for the builder lease.
pub fn lease_record(owner: &str, account: Option<&str>, status: LeaseStatus) -> LeaseRecord {
    LeaseRecord {
        user_email: owner.to_owned(),
        uuid: Uuid::parse_str(LEASE_UUID)
            .unwrap_or_else(|err| panic!("fixture uuid is valid: {err}")),
        aws_account_id: account.map(str::to_owned),
        original_lease_template_uuid: Some(TEMPLATE_UUID.to_owned()),
        original_lease_template_name: Some("Data science sandbox".to_owned()),
        total_cost_accrued: Some(12.5),
        max_spend: Some(50.0),
        expiration_date: Some(at(2026, 3, 8, 9, 0)),
        lease_duration_in_hours: Some(168.0),
        status,
        last_checked_date: Some(at(2026, 3, 1, 8, 30)),
    }
}

/// Account row for the builder account.
pub fn account_record(lessee: Option<&str>) -> AccountRecord {
    AccountRecord {
        aws_account_id: ACCOUNT_ID.to_owned(),
        name: Some("Sandbox 12".to_owned()),
        lessee_email: lessee.map(str::to_owned),
    }
}

/// Lease template row.
pub fn template_record() -> LeaseTemplateRecord {
    LeaseTemplateRecord {
        uuid: TEMPLATE_UUID.to_owned(),
        name: "Data science sandbox".to_owned(),
        lease_duration_in_hours: Some(168.0),
    }
}

/// Directory snapshot with one active lease owned by `owner`.
pub fn snapshot(owner: &str) -> Value {
    json!({
        "leases": [lease_record(owner, Some(ACCOUNT_ID), LeaseStatus::Active)],
        "accounts": [account_record(Some(owner))],
        "leaseTemplates": [template_record()],
    })
}
