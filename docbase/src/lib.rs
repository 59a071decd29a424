//! Main docbase crate providing a unified interface for audited document storage.
//!
//! This crate is the primary entry point for users of the docbase framework.
//! It re-exports the core types and functionality from the sub-crates, gives access
//! to the storage engines and sets up logging and configuration for applications.
//!
//! # Features
//!
//! - **Generic CRUD** - Save, batch save, find, update and remove any type implementing [`Document`](document::Document)
//! - **Audit trail** - Saves and updates stamp who changed a document and when
//! - **Aggregation** - Pipelines decoded straight into caller-defined result types
//! - **Transactions** - One session per connection manager, committed or aborted explicitly
//! - **Multiple engines** - In-memory for development and tests, MongoDB behind the `mongodb` feature
//!
//! # Quick Start
//!
//! ```ignore
//! use docbase::{prelude::*, memory::InMemoryConnector};
//! use bson::{Bson, oid::ObjectId};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     #[serde(default)]
//!     pub records: AuditTrail,
//! }
//!
//! impl Document for User {
//!     fn collection_name() -> &'static str { "users" }
//!     fn id(&self) -> Option<Bson> { self.id.map(Bson::ObjectId) }
//!     fn set_id(&mut self, id: Bson) { self.id = id.as_object_id(); }
//!     fn set_creator(&mut self, actor: &dyn Actor) { self.records.stamp_creator(actor); }
//!     fn add_audit_record(&mut self, actor: &dyn Actor, summary: &str) -> Vec<Record> {
//!         self.records.push(actor, summary).to_vec()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DocumentStoreError> {
//!     let config = AppConfig::from_json_str(r#"{
//!         "mongo": { "uri": "memory://local", "default_database": "app" },
//!         "log": { "level": "info" }
//!     }"#)?;
//!     docbase::logging::install(&config.log)?;
//!
//!     let manager = ConnectionManager::connect(&config.mongo, &InMemoryConnector::new()).await?;
//!     let store = manager.core_store().await?;
//!     store.ensure_collections(&[CollectionInfo::of::<User>()]).await?;
//!
//!     let mut user = User { name: "Alice".into(), ..Default::default() };
//!     store.save(&mut user, None).await?;
//!
//!     let active = store.find::<User>(Filter::eq("name", "Alice")).await?;
//!     println!("found {} user(s)", active.len());
//!
//!     manager.close().await
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! manager.with_session(|session| async move {
//!     let store = manager.core_store().await?.with_session(session);
//!     store.save(&mut user, Some(&operator)).await?;
//!     Ok(())
//! }).await?;
//! manager.commit_transaction().await?;
//! ```
//!
//! # Engines
//!
//! - [`memory`] - In-process engine for development and testing
//! - [`mongodb`] - MongoDB engine (requires `mongodb` feature)

pub mod config;
pub mod logging;
pub mod prelude;

pub use docbase_core::{
    aggregate, audit, backend, cancel, connection, document, error, pipeline, query, session, store, update,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage engine.
pub mod memory {
    pub use docbase_memory::{InMemoryConnector, InMemoryDatabase, InMemorySession, InMemoryStore};
}

/// MongoDB storage engine.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docbase_mongodb::{MongoDbClient, MongoDbConnector, MongoDbDatabase, MongoDbSession};
}
