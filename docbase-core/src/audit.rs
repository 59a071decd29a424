//! Audit trail records.
//!
//! A [`Record`] captures who changed a document, when, and a short summary of the
//! change. Records are only ever appended; insertion order is chronological order.

use bson::DateTime;
use chrono::{DateTime as ChronoDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Actor;

/// Summary used when a document is created by an actor.
pub const CREATED_SUMMARY: &str = "created";
/// Summary used when a document is updated by an actor.
pub const UPDATED_SUMMARY: &str = "updated";

/// An immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime,
    pub summary: String,
    pub account: String,
    pub name: String,
}

/// Builds a record. Pure; the caller supplies the timestamp.
pub fn new_record(
    timestamp: ChronoDateTime<Utc>,
    account: impl Into<String>,
    name: impl Into<String>,
    summary: impl Into<String>,
) -> Record {
    Record {
        timestamp: DateTime::from_chrono(timestamp),
        summary: summary.into(),
        account: account.into(),
        name: name.into(),
    }
}

impl Record {
    /// A record for `actor` stamped with the current time.
    pub fn now(actor: &dyn Actor, summary: &str) -> Self {
        new_record(Utc::now(), actor.account(), actor.name(), summary)
    }

    pub fn timestamp(&self) -> ChronoDateTime<Utc> {
        self.timestamp.to_chrono()
    }
}

/// Append-only list of audit records, stored as a plain array.
///
/// Entity types embed this to implement
/// [`Document::set_creator`](crate::document::Document::set_creator) and
/// [`Document::add_audit_record`](crate::document::Document::add_audit_record).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail(Vec<Record>);

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record for `actor` and returns the whole trail.
    pub fn push(&mut self, actor: &dyn Actor, summary: &str) -> &[Record] {
        self.0.push(Record::now(actor, summary));
        &self.0
    }

    /// Appends the creation record.
    pub fn stamp_creator(&mut self, actor: &dyn Actor) {
        self.push(actor, CREATED_SUMMARY);
    }

    /// The account that created the document, if it was created by an actor.
    pub fn created_by(&self) -> Option<&str> {
        self.0
            .iter()
            .find(|record| record.summary == CREATED_SUMMARY)
            .map(|record| record.account.as_str())
    }

    pub fn records(&self) -> &[Record] {
        &self.0
    }

    pub fn last(&self) -> Option<&Record> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Record>> for AuditTrail {
    fn from(records: Vec<Record>) -> Self {
        Self(records)
    }
}
