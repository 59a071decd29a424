//! Core traits for persisted entities.
//!
//! Every entity stored through [`DocumentStore`](crate::store::DocumentStore) implements
//! [`Document`]. The store never names concrete entity types; it works purely through
//! this contract and serde.
//!
//! # Example
//!
//! ```ignore
//! use docbase::prelude::*;
//! use bson::{Bson, oid::ObjectId};
//! use serde::{Deserialize, Serialize};
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

use bson::{Bson, de::deserialize_from_document, ser::serialize_to_document};
use serde::{Serialize, de::DeserializeOwned};

use crate::{audit::Record, error::DocumentStoreResult, query::SortDirection};

/// Default name of the field holding a document's audit records.
pub const RECORDS_FIELD: &str = "records";

/// Read-only identity used to stamp audit records.
pub trait Actor: Send + Sync {
    /// Display name of the actor.
    fn name(&self) -> &str;

    /// Account identifier of the actor.
    fn account(&self) -> &str;
}

/// Capability contract every persisted entity implements.
///
/// The identity is the stored `_id` field. It is immutable once persisted; the store
/// only calls [`Document::set_id`] on a document that had no identity yet.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Name of the collection holding documents of this type. Constant per type.
    fn collection_name() -> &'static str;

    /// The document's identity, if it has one.
    fn id(&self) -> Option<Bson>;

    /// Receives the identity assigned when the document is first saved.
    fn set_id(&mut self, _id: Bson) {}

    /// Records `actor` as the creator of this document.
    fn set_creator(&mut self, actor: &dyn Actor);

    /// Appends an audit record and returns the complete, updated record list.
    fn add_audit_record(&mut self, actor: &dyn Actor, summary: &str) -> Vec<Record>;

    /// Indexes the collection should carry.
    fn indexes() -> Vec<IndexDefinition> {
        Vec::new()
    }

    /// Field holding the audit record list.
    fn records_field() -> &'static str {
        RECORDS_FIELD
    }
}

/// Conversion helpers between documents and their stored BSON form.
///
/// Implemented for every [`Document`].
pub trait DocumentExt: Document {
    /// Serializes the document into its stored form (the payload).
    fn to_document(&self) -> DocumentStoreResult<bson::Document>;

    /// Decodes a stored document.
    fn from_document(document: bson::Document) -> DocumentStoreResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_document(&self) -> DocumentStoreResult<bson::Document> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(document: bson::Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_document(document)?)
    }
}

/// Declaration of an index on a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    /// Optional explicit index name.
    pub name: Option<String>,
    /// Indexed fields in key order.
    pub keys: Vec<(String, SortDirection)>,
    /// Whether the key combination must be unique across the collection.
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new<S: Into<String>>(keys: impl IntoIterator<Item = (S, SortDirection)>) -> Self {
        Self {
            name: None,
            keys: keys.into_iter().map(|(field, dir)| (field.into(), dir)).collect(),
            unique: false,
        }
    }

    /// Single-field ascending index.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new([(field.into(), SortDirection::Asc)])
    }

    /// Single-field descending index.
    pub fn descending(field: impl Into<String>) -> Self {
        Self::new([(field.into(), SortDirection::Desc)])
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The explicit name, or the conventional `field_dir` concatenation.
    pub fn index_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .keys
                .iter()
                .map(|(field, dir)| format!("{}_{}", field, dir.as_i32()))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    /// Field names in key order.
    pub fn fields(&self) -> Vec<&str> {
        self.keys.iter().map(|(field, _)| field.as_str()).collect()
    }
}

/// A collection name plus its index declarations, detached from the document type.
///
/// Lets [`ensure_collections`](crate::store::DocumentStore::ensure_collections) take
/// collections of several document types in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: &'static str,
    pub indexes: Vec<IndexDefinition>,
}

impl CollectionInfo {
    pub fn of<D: Document>() -> Self {
        Self { name: D::collection_name(), indexes: D::indexes() }
    }
}
