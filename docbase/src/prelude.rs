//! Convenient re-exports of commonly used types from docbase.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docbase::prelude::*;
//! ```

pub use docbase_core::{
    aggregate::Aggregation,
    audit::{AuditTrail, Record},
    backend::{DatabaseBackend, StoreClient, StoreConnector},
    cancel::CancellationScope,
    config::ConnectionConfig,
    connection::ConnectionManager,
    document::{Actor, CollectionInfo, Document, DocumentExt, IndexDefinition},
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Accumulator, AggregateOptions, Pipeline, Stage},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    session::{SessionConflict, TransactionSession},
    store::{BatchSaveOutcome, DocumentStore},
    update::{Update, UpdateOutcome},
};

pub use crate::{
    config::AppConfig,
    logging::{LogConfig, LogTarget},
};
