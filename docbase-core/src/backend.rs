//! Storage engine abstraction.
//!
//! This module defines the traits that separate the document store from the engine
//! that actually holds the data, so the same [`DocumentStore`](crate::store::DocumentStore)
//! works against MongoDB or the in-memory engine used in tests.
//!
//! # Traits
//!
//! - [`StoreConnector`]: Factory that opens a client from a connection URI
//! - [`StoreClient`]: A connected, cloneable client handing out database handles and sessions
//! - [`DatabaseBackend`]: Per-database operations on stored documents
//! - [`TransactionSession`](crate::session::TransactionSession): A session carrying a transaction
//!
//! # Examples
//!
//! ```ignore
//! use docbase::backend::{DatabaseBackend, StoreClient};
//! use bson::doc;
//!
//! let db = client.database("app");
//! let id = db.insert_one("users", doc! { "name": "Alice" }, None).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::{
    document::IndexDefinition,
    error::DocumentStoreResult,
    pipeline::{AggregateOptions, Pipeline},
    query::{Expr, Query},
    session::TransactionSession,
    update::{Update, UpdateOutcome},
};

/// A stream of raw stored documents.
pub type DocumentStream = BoxStream<'static, DocumentStoreResult<Document>>;

/// Opens clients for a storage engine.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    type Client: StoreClient;

    /// Connects to the engine at `uri`. Credentials, when any, are already embedded.
    ///
    /// Implementations should not verify reachability here; the connection manager
    /// pings the client right after connecting.
    async fn connect(&self, uri: &str) -> DocumentStoreResult<Self::Client>;
}

/// A connected storage engine client.
///
/// Clients are cheap to clone and every clone shares the same underlying connection pool.
#[async_trait]
pub trait StoreClient: Clone + Send + Sync + Debug + 'static {
    type Database: DatabaseBackend<Session = Self::Session>;
    type Session: TransactionSession;

    /// Returns a handle to the named database. Never performs I/O.
    fn database(&self, name: &str) -> Self::Database;

    /// Verifies the engine is reachable.
    async fn ping(&self) -> DocumentStoreResult<()>;

    async fn list_database_names(&self) -> DocumentStoreResult<Vec<String>>;

    /// Starts a new session. No transaction is open yet.
    async fn start_session(&self) -> DocumentStoreResult<Self::Session>;

    /// Releases the client's resources. Further use of the client is undefined.
    async fn shutdown(&self) -> DocumentStoreResult<()>;
}

/// Operations on the collections of one database.
///
/// Every operation accepts an optional session. When one is given and it carries an
/// open transaction, the operation runs inside that transaction.
#[async_trait]
pub trait DatabaseBackend: Clone + Send + Sync + Debug + 'static {
    type Session: TransactionSession;

    fn name(&self) -> &str;

    /// Lists collection names, optionally only the one named `name_filter`.
    ///
    /// Engines may refuse this inside a transaction with
    /// [`NotSupportedInTransaction`](crate::error::DocumentStoreError::NotSupportedInTransaction).
    async fn list_collection_names(
        &self,
        name_filter: Option<&str>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Vec<String>>;

    /// Creates an empty collection. Fails when the collection already exists.
    async fn create_collection(
        &self,
        name: &str,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<()>;

    /// Creates the given indexes on a collection, creating the collection when missing.
    async fn create_indexes(
        &self,
        collection: &str,
        indexes: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<()>;

    /// Inserts one document and returns its `_id`, generating one when absent.
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Bson>;

    /// Unordered bulk insert.
    ///
    /// Every document is attempted. On full success the ids are returned in input
    /// order. When some writes fail the others stay committed and the error is
    /// [`PartialWrite`](crate::error::DocumentStoreError::PartialWrite) listing the
    /// failed positions.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Opens a cursor over the matches of `query`.
    ///
    /// Documents are pulled from the engine as the stream is polled. A stream opened
    /// under a session may keep that session busy until it is dropped.
    async fn find(
        &self,
        collection: &str,
        query: Query,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<DocumentStream>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Pipeline,
        options: AggregateOptions,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<DocumentStream>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Expr,
        update: Update,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Expr,
        update: Update,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the first document matching `filter`. Returns the deleted count.
    async fn delete_one(
        &self,
        collection: &str,
        filter: Expr,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64>;

    async fn delete_many(
        &self,
        collection: &str,
        filter: Expr,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64>;

    /// Counts documents matching `filter`, or all documents when `None`.
    async fn count_documents(
        &self,
        collection: &str,
        filter: Option<Expr>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64>;
}
