//! Partial update specifications.

use bson::{Bson, Document};

/// Field assignments and array appends applied to matched documents.
///
/// `set` replaces the value at each (possibly dotted) path; `push` appends each
/// value to the array at its path, creating the array when missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Document,
    pub push: Document,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// An update assigning every field of `fields`.
    pub fn set_fields(fields: Document) -> Self {
        Self { set: fields, push: Document::new() }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn push(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.push.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.push.is_empty()
    }
}

/// Counts reported by an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}
