//! The generic document store.
//!
//! [`DocumentStore`] runs CRUD, batch insert, pipeline aggregation and streamed
//! iteration for any [`Document`] type against a [`DatabaseBackend`]. It never names
//! concrete entity types: everything goes through the [`Document`] and
//! [`Aggregation`] contracts plus serde.
//!
//! Every call follows the same steps: check preconditions, stamp audit records when
//! an actor is given, run the storage operation under the store's
//! [`CancellationScope`], then decode the results.
//!
//! # Example
//!
//! ```ignore
//! use docbase::prelude::*;
//!
//! let store = manager.core_store().await?;
//!
//! let mut user = User::new("Ada");
//! let id = store.save(&mut user, Some(&operator)).await?;
//!
//! let mut fetched = User::with_id(id);
//! store.find_by_id(&mut fetched).await?;
//! ```

use bson::{Bson, oid::ObjectId};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    aggregate::Aggregation,
    audit::{Record, UPDATED_SUMMARY},
    backend::{DatabaseBackend, DocumentStream},
    cancel::CancellationScope,
    document::{Actor, CollectionInfo, Document, DocumentExt},
    error::{DocumentStoreError, DocumentStoreResult, IndexedWriteFailure},
    pipeline::AggregateOptions,
    query::{Expr, Filter, ID_FIELD, Query},
    update::Update,
};

/// Result of [`DocumentStore::batch_save`].
///
/// When the engine reports a partial bulk failure, `inserted_ids.len() + failed.len()`
/// equals the number of submitted documents.
#[derive(Debug, Clone)]
pub struct BatchSaveOutcome<D> {
    /// Identities of the documents that were written, in input order.
    pub inserted_ids: Vec<Bson>,
    /// The submitted documents whose write failed, in failure order.
    pub failed: Vec<D>,
    /// Engine details for each entry of `failed`.
    pub failures: Vec<IndexedWriteFailure>,
}

impl<D> BatchSaveOutcome<D> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && !self.inserted_ids.is_empty()
    }
}

impl<D> Default for BatchSaveOutcome<D> {
    fn default() -> Self {
        Self { inserted_ids: Vec::new(), failed: Vec::new(), failures: Vec::new() }
    }
}

/// Generic CRUD and aggregation engine over one database.
///
/// A store holds no state across calls besides its bindings: the database handle,
/// an optional session and a cancellation scope. Cloning is cheap.
#[derive(Debug)]
pub struct DocumentStore<B: DatabaseBackend> {
    database: Option<B>,
    session: Option<Arc<B::Session>>,
    scope: CancellationScope,
}

impl<B: DatabaseBackend> Clone for DocumentStore<B> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            session: self.session.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<B: DatabaseBackend> DocumentStore<B> {
    /// Creates a store bound to `database`.
    pub fn new(database: B) -> Self {
        Self { database: Some(database), session: None, scope: CancellationScope::new() }
    }

    /// Creates a store with no database bound yet.
    ///
    /// Operations fail with [`DocumentStoreError::Precondition`] until
    /// [`DocumentStore::set_database`] is called.
    pub fn detached() -> Self {
        Self { database: None, session: None, scope: CancellationScope::new() }
    }

    pub fn set_database(&mut self, database: B) {
        self.database = Some(database);
    }

    pub fn database(&self) -> Option<&B> {
        self.database.as_ref()
    }

    /// Runs every following operation inside `session`.
    pub fn with_session(mut self, session: Arc<B::Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn without_session(mut self) -> Self {
        self.session = None;
        self
    }

    /// Binds the store to a cancellation scope, usually the connection manager's.
    pub fn with_scope(mut self, scope: CancellationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn scope(&self) -> &CancellationScope {
        &self.scope
    }

    fn db(&self) -> DocumentStoreResult<&B> {
        self.database
            .as_ref()
            .ok_or_else(|| DocumentStoreError::Precondition("database is not set".into()))
    }

    fn session(&self) -> Option<&B::Session> {
        self.session.as_deref()
    }

    /// Whether the collection of `D` exists.
    ///
    /// A listing refused because it ran inside a transaction counts as "exists";
    /// any other failure counts as "absent".
    pub async fn collection_exists<D: Document>(&self) -> bool {
        self.collection_exists_named(D::collection_name()).await
    }

    async fn collection_exists_named(&self, name: &str) -> bool {
        let listing = match self.db() {
            Ok(db) => {
                self.scope
                    .run(db.list_collection_names(Some(name), self.session()))
                    .await
            }
            Err(err) => Err(err),
        };

        match listing {
            Ok(names) => !names.is_empty(),
            Err(err) if err.is_transaction_restricted() => {
                debug!(collection = name, "collection listing refused inside transaction, assuming it exists");
                true
            }
            Err(err) => {
                debug!(collection = name, error = %err, "collection existence check failed");
                false
            }
        }
    }

    /// Creates every missing collection and its declared indexes.
    ///
    /// Creation is best-effort: failures are logged as warnings and the remaining
    /// collections are still processed.
    ///
    /// # Errors
    ///
    /// Returns an error only when no database is bound or the scope was cancelled.
    pub async fn ensure_collections(&self, collections: &[CollectionInfo]) -> DocumentStoreResult<()> {
        let db = self.db()?;

        for info in collections {
            info!(collection = info.name, "checking collection");

            if !self.collection_exists_named(info.name).await {
                match self.scope.run(db.create_collection(info.name, self.session())).await {
                    Ok(()) => info!(collection = info.name, "collection created"),
                    Err(DocumentStoreError::Cancelled) => return Err(DocumentStoreError::Cancelled),
                    Err(err) => warn!(collection = info.name, error = %err, "failed to create collection"),
                }
            }

            if info.indexes.is_empty() {
                continue;
            }

            match self.scope.run(db.create_indexes(info.name, info.indexes.clone())).await {
                Ok(()) => debug!(collection = info.name, count = info.indexes.len(), "indexes ensured"),
                Err(DocumentStoreError::Cancelled) => return Err(DocumentStoreError::Cancelled),
                Err(err) => warn!(collection = info.name, error = %err, "failed to create indexes"),
            }
        }

        Ok(())
    }

    /// Inserts one document and returns its identity.
    ///
    /// When `actor` is given the document is stamped with its creator first. A document
    /// without identity gets a fresh ObjectId, which is also handed to
    /// [`Document::set_id`].
    ///
    /// # Arguments
    ///
    /// * `doc` - The document to insert
    /// * `actor` - The actor recorded as creator, if any
    pub async fn save<D: Document>(&self, doc: &mut D, actor: Option<&dyn Actor>) -> DocumentStoreResult<Bson> {
        let db = self.db()?;

        if let Some(actor) = actor {
            doc.set_creator(actor);
        }

        let had_id = doc.id().is_some();
        let mut payload = doc.to_document()?;
        assign_missing_id(&mut payload);

        let id = self
            .scope
            .run(db.insert_one(D::collection_name(), payload, self.session()))
            .await?;

        if !had_id {
            doc.set_id(id.clone());
        }

        Ok(id)
    }

    /// Inserts many documents without ordering, so one failing write does not block
    /// the others.
    ///
    /// Documents without identity get a fresh ObjectId through [`Document::set_id`]
    /// before they are written. An empty input returns an empty outcome without
    /// touching the engine. On a partial failure the outcome lists the submitted
    /// documents whose write failed, matched by position, and the identities of
    /// every document that was written.
    ///
    /// # Errors
    ///
    /// Any failure other than a partial bulk write is returned as-is.
    pub async fn batch_save<D: Document>(
        &self,
        mut docs: Vec<D>,
        actor: Option<&dyn Actor>,
    ) -> DocumentStoreResult<BatchSaveOutcome<D>> {
        if docs.is_empty() {
            return Ok(BatchSaveOutcome::default());
        }

        let db = self.db()?;
        let mut ids = Vec::with_capacity(docs.len());
        let mut payloads = Vec::with_capacity(docs.len());

        for doc in docs.iter_mut() {
            if let Some(actor) = actor {
                doc.set_creator(actor);
            }

            if doc.id().is_none() {
                doc.set_id(Bson::ObjectId(ObjectId::new()));
            }

            let mut payload = doc.to_document()?;
            ids.push(assign_missing_id(&mut payload));
            payloads.push(payload);
        }

        match self
            .scope
            .run(db.insert_many(D::collection_name(), payloads, self.session()))
            .await
        {
            Ok(inserted_ids) => Ok(BatchSaveOutcome { inserted_ids, ..BatchSaveOutcome::default() }),
            Err(DocumentStoreError::PartialWrite(failures)) => {
                let failed_positions = failures.iter().map(|f| f.index).collect::<HashSet<_>>();

                let inserted_ids = ids
                    .into_iter()
                    .enumerate()
                    .filter(|(index, _)| !failed_positions.contains(index))
                    .map(|(_, id)| id)
                    .collect::<Vec<_>>();
                let failed = failures
                    .iter()
                    .filter_map(|failure| docs.get(failure.index).cloned())
                    .collect::<Vec<_>>();

                warn!(
                    collection = D::collection_name(),
                    inserted = inserted_ids.len(),
                    failed = failed.len(),
                    "bulk insert partially failed"
                );

                Ok(BatchSaveOutcome { inserted_ids, failed, failures })
            }
            Err(err) => Err(err),
        }
    }

    /// Loads the stored version of `doc`, looked up by its own identity.
    ///
    /// When nothing matches, `doc` is left unchanged and a
    /// [`DocumentStoreError::DocumentNotFound`] error is returned.
    pub async fn find_by_id<D: Document>(&self, doc: &mut D) -> DocumentStoreResult<()> {
        let id = doc
            .id()
            .ok_or_else(|| DocumentStoreError::Precondition("document has no identity".into()))?;

        self.find_one(doc, Filter::id(id)).await
    }

    /// Decodes the first match of `query` into `doc`.
    ///
    /// # Errors
    ///
    /// * [`DocumentStoreError::Precondition`] when no database is bound
    /// * [`DocumentStoreError::DocumentNotFound`] when nothing matches
    /// * [`DocumentStoreError::Serialization`] when the match cannot be decoded
    pub async fn find_one<D: Document>(&self, doc: &mut D, query: impl Into<Query>) -> DocumentStoreResult<()> {
        let mut query = query.into();
        query.limit = Some(1);

        let mut stream = self.open_find(D::collection_name(), query).await?;

        match self.next_document(&mut stream).await? {
            Some(found) => {
                *doc = D::from_document(found)?;
                Ok(())
            }
            None => Err(DocumentStoreError::DocumentNotFound(D::collection_name().to_string())),
        }
    }

    /// Returns every match of `query`, decoded as `D`.
    pub async fn find<D: Document>(&self, query: impl Into<Query>) -> DocumentStoreResult<Vec<D>> {
        let stream = self.open_find(D::collection_name(), query.into()).await?;

        self.collect_decoded(stream).await
    }

    /// Streams the matches of `query`, calling `exec` once per decoded document.
    ///
    /// Documents are decoded one at a time in storage order. The first decode or
    /// `exec` error stops the iteration and is returned. Once the stream is exhausted,
    /// the last decoded document is copied into `doc`; `doc` is untouched when
    /// nothing matched.
    pub async fn find_and_exec<D, F>(&self, doc: &mut D, query: impl Into<Query>, exec: F) -> DocumentStoreResult<()>
    where
        D: Document,
        F: FnMut(&D) -> DocumentStoreResult<()>,
    {
        let stream = self.open_find(D::collection_name(), query.into()).await?;

        self.exec_each(doc, stream, exec).await
    }

    /// Decodes the first output of the aggregation pipeline into `target`.
    ///
    /// Fails with [`DocumentStoreError::DocumentNotFound`] when the pipeline yields nothing.
    pub async fn pipe_find_one<A: Aggregation>(&self, target: &mut A, filter: Option<Expr>) -> DocumentStoreResult<()> {
        let pipeline = A::pipeline(filter).limit(1);
        let mut stream = self
            .open_aggregate(A::collection_name(), pipeline, AggregateOptions::default())
            .await?;

        match self.next_document(&mut stream).await? {
            Some(found) => {
                *target = decode(found)?;
                Ok(())
            }
            None => Err(DocumentStoreError::DocumentNotFound(A::collection_name().to_string())),
        }
    }

    /// Returns every output of the aggregation pipeline, decoded as `A`.
    pub async fn pipe_find<A: Aggregation>(
        &self,
        filter: Option<Expr>,
        options: AggregateOptions,
    ) -> DocumentStoreResult<Vec<A>> {
        let stream = self
            .open_aggregate(A::collection_name(), A::pipeline(filter), options)
            .await?;

        self.collect_decoded(stream).await
    }

    /// Pipeline counterpart of [`DocumentStore::find_and_exec`].
    pub async fn pipe_find_and_exec<A, F>(
        &self,
        target: &mut A,
        filter: Option<Expr>,
        exec: F,
        options: AggregateOptions,
    ) -> DocumentStoreResult<()>
    where
        A: Aggregation,
        F: FnMut(&A) -> DocumentStoreResult<()>,
    {
        let stream = self
            .open_aggregate(A::collection_name(), A::pipeline(filter), options)
            .await?;

        self.exec_each(target, stream, exec).await
    }

    /// Sets `fields` on the stored document with `doc`'s identity.
    ///
    /// With an actor, an `"updated"` audit record is appended to `doc` and the full
    /// record list is written along with the fields. Returns the number of modified
    /// documents, which is `0` when no document has that identity.
    ///
    /// # Arguments
    ///
    /// * `doc` - The document whose identity selects the stored document
    /// * `fields` - Field paths and their new values
    /// * `actor` - The actor recorded in the audit trail, if any
    pub async fn update_one<D: Document>(
        &self,
        doc: &mut D,
        fields: bson::Document,
        actor: Option<&dyn Actor>,
    ) -> DocumentStoreResult<u64> {
        let db = self.db()?;
        let id = doc
            .id()
            .ok_or_else(|| DocumentStoreError::Precondition("document has no identity".into()))?;

        let mut set = fields;
        if let Some(actor) = actor {
            let records = doc.add_audit_record(actor, UPDATED_SUMMARY);
            set.insert(D::records_field(), bson::ser::serialize_to_bson(&records)?);
        }

        if set.is_empty() {
            debug!(collection = D::collection_name(), "empty update skipped");
            return Ok(0);
        }

        let outcome = self
            .scope
            .run(db.update_one(D::collection_name(), Filter::id(id), Update::set_fields(set), self.session()))
            .await?;

        Ok(outcome.modified)
    }

    /// Sets `fields` on every document matching `filter`.
    ///
    /// With an actor, one new audit record is pushed onto each matched document's
    /// record list; existing records are kept.
    pub async fn update_all<D: Document>(
        &self,
        filter: Expr,
        fields: bson::Document,
        actor: Option<&dyn Actor>,
    ) -> DocumentStoreResult<u64> {
        let db = self.db()?;

        let mut update = Update::set_fields(fields);
        if let Some(actor) = actor {
            let record = Record::now(actor, UPDATED_SUMMARY);
            update = update.push(D::records_field(), bson::ser::serialize_to_bson(&record)?);
        }

        if update.is_empty() {
            debug!(collection = D::collection_name(), "empty update skipped");
            return Ok(0);
        }

        let outcome = self
            .scope
            .run(db.update_many(D::collection_name(), filter, update, self.session()))
            .await?;

        Ok(outcome.modified)
    }

    /// Deletes the stored document with `doc`'s identity. The actor is not recorded.
    pub async fn remove_by_id<D: Document>(&self, doc: &D, _actor: Option<&dyn Actor>) -> DocumentStoreResult<u64> {
        let db = self.db()?;
        let id = doc
            .id()
            .ok_or_else(|| DocumentStoreError::Precondition("document has no identity".into()))?;

        self.scope
            .run(db.delete_one(D::collection_name(), Filter::id(id), self.session()))
            .await
    }

    /// Deletes every document matching `filter`. The actor is not recorded.
    pub async fn remove_all<D: Document>(&self, filter: Expr, _actor: Option<&dyn Actor>) -> DocumentStoreResult<u64> {
        let db = self.db()?;

        self.scope
            .run(db.delete_many(D::collection_name(), filter, self.session()))
            .await
    }

    pub async fn count_documents<D: Document>(&self, filter: Option<Expr>) -> DocumentStoreResult<u64> {
        let db = self.db()?;

        self.scope
            .run(db.count_documents(D::collection_name(), filter, self.session()))
            .await
    }

    async fn open_find(&self, collection: &str, query: Query) -> DocumentStoreResult<DocumentStream> {
        let db = self.db()?;

        self.scope.run(db.find(collection, query, self.session())).await
    }

    async fn open_aggregate(
        &self,
        collection: &str,
        pipeline: crate::pipeline::Pipeline,
        options: AggregateOptions,
    ) -> DocumentStoreResult<DocumentStream> {
        let db = self.db()?;

        self.scope
            .run(db.aggregate(collection, pipeline, options, self.session()))
            .await
    }

    async fn next_document(&self, stream: &mut DocumentStream) -> DocumentStoreResult<Option<bson::Document>> {
        self.scope.run(async { stream.next().await.transpose() }).await
    }

    async fn collect_decoded<T: DeserializeOwned>(&self, mut stream: DocumentStream) -> DocumentStoreResult<Vec<T>> {
        let mut results = Vec::new();

        while let Some(found) = self.next_document(&mut stream).await? {
            results.push(decode(found)?);
        }

        Ok(results)
    }

    async fn exec_each<T, F>(&self, target: &mut T, mut stream: DocumentStream, mut exec: F) -> DocumentStoreResult<()>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> DocumentStoreResult<()>,
    {
        let mut last = None;

        while let Some(found) = self.next_document(&mut stream).await? {
            let value = decode::<T>(found)?;
            exec(&value)?;
            last = Some(value);
        }

        if let Some(last) = last {
            *target = last;
        }

        Ok(())
    }
}

fn decode<T: DeserializeOwned>(document: bson::Document) -> DocumentStoreResult<T> {
    Ok(bson::de::deserialize_from_document(document)?)
}

/// Gives `payload` a fresh ObjectId when its `_id` is missing or null, and returns the id.
fn assign_missing_id(payload: &mut bson::Document) -> Bson {
    match payload.get(ID_FIELD) {
        Some(id) if *id != Bson::Null => id.clone(),
        _ => {
            let id = Bson::ObjectId(ObjectId::new());
            payload.insert(ID_FIELD, id.clone());
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn missing_or_null_id_is_assigned() {
        let mut missing = doc! { "name": "a" };
        let mut null = doc! { "_id": Bson::Null, "name": "b" };
        let mut present = doc! { "_id": 7, "name": "c" };

        assert!(matches!(assign_missing_id(&mut missing), Bson::ObjectId(_)));
        assert!(matches!(assign_missing_id(&mut null), Bson::ObjectId(_)));
        assert_eq!(assign_missing_id(&mut present), Bson::Int32(7));
        assert!(missing.get_object_id(ID_FIELD).is_ok());
    }

    #[test]
    fn outcome_classification() {
        let complete = BatchSaveOutcome::<()> { inserted_ids: vec![Bson::Int32(1)], ..Default::default() };
        let partial = BatchSaveOutcome { inserted_ids: vec![Bson::Int32(1)], failed: vec![()], failures: vec![] };

        assert!(complete.is_complete());
        assert!(!complete.is_partial());
        assert!(partial.is_partial());
    }
}
