//! A generic access layer between application code and a document database.
//!
//! This crate is the core of the docbase project and provides:
//!
//! - **Document contract** ([`document`]) - Traits every persisted entity implements
//! - **Audit trail** ([`audit`]) - Append-only records of who changed a document
//! - **Aggregation** ([`aggregate`], [`pipeline`]) - Pipeline definitions decoded into typed results
//! - **Query and filtering API** ([`query`], [`update`]) - Filter expressions, find options and partial updates
//! - **Storage engine abstraction** ([`backend`], [`session`]) - Traits implemented by each engine
//! - **Connection lifecycle** ([`connection`], [`config`], [`cancel`]) - Connecting, database handles, transactions
//! - **Document store** ([`store`]) - Generic CRUD, batch insert and aggregation engine
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docbase_core::{
//!     audit::AuditTrail,
//!     document::{Actor, Document},
//! };
//! use bson::{Bson, oid::ObjectId};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     #[serde(default)]
//!     pub records: AuditTrail,
//! }
//!
//! impl Document for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn id(&self) -> Option<Bson> {
//!         self.id.map(Bson::ObjectId)
//!     }
//!
//!     fn set_id(&mut self, id: Bson) {
//!         self.id = id.as_object_id();
//!     }
//!
//!     fn set_creator(&mut self, actor: &dyn Actor) {
//!         self.records.stamp_creator(actor);
//!     }
//!
//!     fn add_audit_record(&mut self, actor: &dyn Actor, summary: &str) -> Vec<Record> {
//!         self.records.push(actor, summary).to_vec()
//!     }
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbase_core;

pub mod aggregate;
pub mod audit;
pub mod backend;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod query;
pub mod session;
pub mod store;
pub mod update;
