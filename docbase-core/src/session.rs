//! Sessions and multi-document transactions.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;

use crate::error::DocumentStoreResult;

/// A logical session on a storage engine, able to carry one transaction at a time.
///
/// Sessions are shared behind an `Arc` between the connection manager and the
/// stores bound to it, so every method takes `&self`.
#[async_trait]
pub trait TransactionSession: Send + Sync + Debug + 'static {
    /// Opens a transaction. Fails when one is already open.
    async fn start_transaction(&self) -> DocumentStoreResult<()>;

    /// Commits the open transaction, making its writes visible.
    async fn commit_transaction(&self) -> DocumentStoreResult<()>;

    /// Discards the open transaction's writes.
    async fn abort_transaction(&self) -> DocumentStoreResult<()>;

    /// Ends the session, aborting any transaction still open.
    async fn end(&self);

    fn in_transaction(&self) -> bool;
}

/// What to do when a session is requested while another one is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionConflict {
    /// Fail with [`SessionAlreadyActive`](crate::error::DocumentStoreError::SessionAlreadyActive).
    #[default]
    Reject,
    /// Log a warning and return success without running the body.
    Skip,
}
