//! In-memory storage engine for docbase.
//!
//! This crate provides a thread-safe, in-process implementation of the storage engine
//! traits. It is meant for development and tests: no server is needed, yet the
//! engine behaves like a document database where the document store relies on it.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Transactions** - Sessions snapshot the data; commit publishes, abort discards
//! - **Unique indexes** - `_id` and declared unique indexes reject duplicate keys
//! - **Unordered bulk inserts** - Failed items are reported by position, the rest are kept
//! - **Aggregation** - Match, sort, skip, limit, project, unwind, lookup, group and count stages
//!
//! # Quick Start
//!
//! ```ignore
//! use docbase::prelude::*;
//! use docbase_memory::InMemoryConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("memory://local", "app");
//!     let manager = ConnectionManager::connect(&config, &InMemoryConnector::new()).await?;
//!
//!     let store = manager.core_store().await?;
//!     let mut user = User::new("Alice");
//!     store.save(&mut user, None).await?;
//!
//!     manager.close().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbase_memory;

pub mod evaluator;
pub mod pipeline;
pub mod store;

pub use store::{InMemoryConnector, InMemoryDatabase, InMemorySession, InMemoryStore};
