//! Fixtures for the company/employee test domain.
//!
//! Companies have no dependencies. Employees reference their company through
//! `companyId`, which makes them the canonical out-of-order example.

use mirrorsync_protocol::{Snapshot, SyncMessage, Timestamp};

/// Shorthand for a timestamp in microseconds.
pub fn t(micros: i64) -> Timestamp {
    Timestamp::from_micros(micros)
}

/// Snapshot of a company.
pub fn company_snapshot(name: &str) -> Snapshot {
    Snapshot::new().with("name", name)
}

/// Snapshot of an employee working for `company_id`.
pub fn employee_snapshot(name: &str, company_id: &str) -> Snapshot {
    Snapshot::new()
        .with("name", name)
        .with("companyId", company_id)
}

/// `Created` message for a company.
pub fn company_created(id: &str, name: &str, at: i64) -> SyncMessage {
    SyncMessage::created("company", id, company_snapshot(name), t(at))
}

/// `Created` message for an employee.
pub fn employee_created(id: &str, name: &str, company_id: &str, at: i64) -> SyncMessage {
    SyncMessage::created("employee", id, employee_snapshot(name, company_id), t(at))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn employee_references_company() {
        let msg = employee_created("e-1", "Ada", "c-1", 5);
        assert_eq!(msg.snapshot.get_str("companyId"), Some("c-1"));
        assert_eq!(msg.emitted_at, t(5));
        assert!(msg.validate().is_valid());
    }
}
