//! MongoDB storage engine for docbase.
//!
//! This crate implements the docbase storage engine traits on top of the official
//! MongoDB async driver, so the connection manager and document store run against
//! a real deployment.
//!
//! To use this engine, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docbase = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Transactions** - Sessions map onto driver sessions; multi-document transactions need a replica set
//! - **Full query support** - Filters, sorting and aggregation pipelines run on MongoDB's query engine
//! - **Unordered bulk inserts** - Per-document failures are reported by their position in the batch
//! - **Indexing** - Declared indexes are created with their uniqueness constraints
//!
//! # Example
//!
//! ```ignore
//! use docbase::prelude::*;
//! use docbase::mongodb::MongoDbConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("mongodb://localhost:27017", "app")
//!         .with_credentials("app", "secret");
//!     let manager = ConnectionManager::connect(&config, &MongoDbConnector::new()).await?;
//!
//!     manager.close().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbase_mongodb;

mod error;
pub mod query;
pub mod store;

pub use store::{MongoDbClient, MongoDbConnector, MongoDbDatabase, MongoDbSession};
