//! Error types and result types for document store operations.
//!
//! Errors fall into a few families that callers usually want to tell apart:
//! misconfiguration, connection problems, violated preconditions, per-item bulk
//! write failures, absence of a document, and operations refused because they run
//! inside a transaction. Use the predicate helpers on [`DocumentStoreError`] to
//! branch on those families without matching every variant.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// A single failed write inside an unordered bulk insert.
///
/// `index` is the position of the failed document in the batch that was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedWriteFailure {
    /// Position of the document in the submitted batch.
    pub index: usize,
    /// Storage engine error code (for example `11000` for duplicate keys).
    pub code: i32,
    /// Human readable failure message.
    pub message: String,
}

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Missing or malformed configuration. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The storage engine could not be reached, authenticated against, or pinged.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The connection manager was already closed.
    #[error("Connection is closed")]
    ConnectionClosed,
    /// The cancellation scope the operation runs under was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
    /// A required input (database handle, document identity, ...) was missing.
    #[error("Precondition failed: {0}")]
    Precondition(String),
    /// Commit or abort was requested without an active session.
    #[error("No active session")]
    NoActiveSession,
    /// A session was requested while another one is still active on the same manager.
    #[error("A session is already active on this connection")]
    SessionAlreadyActive,
    /// No document matched. The argument is the collection name.
    #[error("Document not found in collection {0}")]
    DocumentNotFound(String),
    /// Some writes of an unordered bulk insert failed; the others were committed.
    #[error("{} write(s) failed in bulk insert", .0.len())]
    PartialWrite(Vec<IndexedWriteFailure>),
    /// A unique constraint (including `_id`) was violated.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    /// The operation is not allowed inside a multi-document transaction.
    #[error("Operation not supported in transaction: {0}")]
    NotSupportedInTransaction(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The document violates structural expectations.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error reported by the underlying storage engine.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    /// Whether this error means "nothing matched" rather than "the operation failed".
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentStoreError::DocumentNotFound(_))
    }

    /// Whether the engine refused the operation because it ran inside a transaction.
    pub fn is_transaction_restricted(&self) -> bool {
        matches!(self, DocumentStoreError::NotSupportedInTransaction(_))
    }

    /// Whether this is a bulk insert where only some items failed.
    pub fn is_partial_write(&self) -> bool {
        matches!(self, DocumentStoreError::PartialWrite(_))
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_distinguish_absence_from_failure() {
        assert!(DocumentStoreError::DocumentNotFound("users".into()).is_not_found());
        assert!(!DocumentStoreError::Backend("boom".into()).is_not_found());
        assert!(
            DocumentStoreError::NotSupportedInTransaction("listCollections".into())
                .is_transaction_restricted()
        );
        assert!(DocumentStoreError::PartialWrite(vec![]).is_partial_write());
    }

    #[test]
    fn partial_write_message_counts_failures() {
        let err = DocumentStoreError::PartialWrite(vec![
            IndexedWriteFailure { index: 0, code: 11000, message: "dup".into() },
            IndexedWriteFailure { index: 3, code: 11000, message: "dup".into() },
        ]);

        assert_eq!(err.to_string(), "2 write(s) failed in bulk insert");
    }
}
