//! In-memory storage engine.
//!
//! This module provides an engine that keeps every database in process memory behind
//! async-safe read-write locks. It implements the storage engine traits of
//! `docbase-core`, including sessions with multi-document transactions, unique
//! indexes and unordered bulk inserts that report per-item failures.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
    time::Duration,
};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use mea::{mutex::Mutex, rwlock::RwLock};
use bson::{Bson, Document, oid::ObjectId};
use tracing::debug;

use docbase_core::{
    backend::{DatabaseBackend, DocumentStream, StoreClient, StoreConnector},
    document::IndexDefinition,
    error::{DocumentStoreError, DocumentStoreResult, IndexedWriteFailure},
    pipeline::{AggregateOptions, Pipeline},
    query::{Expr, ID_FIELD, Query},
    session::TransactionSession,
    update::{Update, UpdateOutcome},
};

use crate::{
    evaluator::{Comparable, DocumentEvaluator, apply_update, get_path, sort_documents},
    pipeline::execute as run_pipeline,
};

/// Error code reported for unique constraint violations.
pub const DUPLICATE_KEY_CODE: i32 = 11000;
/// Error code reported for any other failed write.
pub const WRITE_FAILED_CODE: i32 = 2;

/// Documents of one collection, in insertion order, plus its index declarations.
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexDefinition>,
}

/// A write made inside a transaction, replayed onto the shared data at commit.
#[derive(Debug, Clone)]
enum Change {
    CreateCollection { database: String, collection: String },
    Insert { database: String, collection: String, document: Document },
    Replace { database: String, collection: String, id: Bson, document: Document },
    Delete { database: String, collection: String, id: Bson },
}

/// Every database held by one engine: database name -> collection name -> data.
///
/// A transaction's working copy also keeps a journal of the changes it made.
#[derive(Debug, Clone, Default)]
pub(crate) struct Engine {
    databases: BTreeMap<String, BTreeMap<String, CollectionData>>,
    journal: Option<Vec<Change>>,
}

impl Engine {
    fn collection(&self, database: &str, name: &str) -> Option<&CollectionData> {
        self.databases.get(database)?.get(name)
    }

    fn collection_mut(&mut self, database: &str, name: &str) -> &mut CollectionData {
        self.databases
            .entry(database.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
    }

    fn documents(&self, database: &str, name: &str) -> Vec<Document> {
        self.collection(database, name)
            .map(|data| data.documents.clone())
            .unwrap_or_default()
    }

    fn record(&mut self, changes: impl IntoIterator<Item = Change>) {
        if let Some(journal) = self.journal.as_mut() {
            journal.extend(changes);
        }
    }

    fn create_collection(&mut self, database: &str, name: &str) -> DocumentStoreResult<()> {
        if self.collection(database, name).is_some() {
            return Err(DocumentStoreError::Backend(format!("collection {database}.{name} already exists")));
        }

        self.collection_mut(database, name);
        self.record([Change::CreateCollection { database: database.to_string(), collection: name.to_string() }]);

        Ok(())
    }

    fn insert(&mut self, database: &str, name: &str, mut document: Document) -> DocumentStoreResult<Bson> {
        let id = match document.get(ID_FIELD) {
            Some(id) if *id != Bson::Null => id.clone(),
            _ => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert(ID_FIELD, id.clone());
                id
            }
        };

        let data = self.collection_mut(database, name);
        if let Some(index) = data.unique_violation(&document, None) {
            return Err(duplicate_key(database, name, &index, &document));
        }

        data.documents.push(document.clone());
        self.record([Change::Insert { database: database.to_string(), collection: name.to_string(), document }]);

        Ok(id)
    }

    fn update(
        &mut self,
        database: &str,
        name: &str,
        filter: &Expr,
        update: &Update,
        many: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut outcome = UpdateOutcome::default();
        let mut changes = Vec::new();
        let Some(data) = self.databases.get_mut(database).and_then(|c| c.get_mut(name)) else {
            return Ok(outcome);
        };

        for position in 0..data.documents.len() {
            if !DocumentEvaluator::new(&data.documents[position]).evaluate(filter)? {
                continue;
            }

            outcome.matched += 1;

            let mut updated = data.documents[position].clone();
            if apply_update(&mut updated, update)? {
                if let Some(index) = data.unique_violation(&updated, Some(position)) {
                    return Err(duplicate_key(database, name, &index, &updated));
                }

                changes.push(Change::Replace {
                    database: database.to_string(),
                    collection: name.to_string(),
                    id: updated.get(ID_FIELD).cloned().unwrap_or(Bson::Null),
                    document: updated.clone(),
                });
                data.documents[position] = updated;
                outcome.modified += 1;
            }

            if !many {
                break;
            }
        }

        self.record(changes);

        Ok(outcome)
    }

    fn delete(&mut self, database: &str, name: &str, filter: &Expr, many: bool) -> DocumentStoreResult<u64> {
        let Some(data) = self.databases.get_mut(database).and_then(|c| c.get_mut(name)) else {
            return Ok(0);
        };

        let mut kept = Vec::with_capacity(data.documents.len());
        let mut removed = Vec::new();

        for document in data.documents.drain(..) {
            if (many || removed.is_empty()) && DocumentEvaluator::new(&document).evaluate(filter)? {
                removed.push(document.get(ID_FIELD).cloned().unwrap_or(Bson::Null));
            } else {
                kept.push(document);
            }
        }

        data.documents = kept;

        let deleted = removed.len() as u64;
        self.record(removed.into_iter().map(|id| Change::Delete {
            database: database.to_string(),
            collection: name.to_string(),
            id,
        }));

        Ok(deleted)
    }

    /// Replays one journaled change onto this engine.
    fn apply(&mut self, change: Change) -> DocumentStoreResult<()> {
        match change {
            Change::CreateCollection { database, collection } => {
                self.collection_mut(&database, &collection);
            }
            Change::Insert { database, collection, document } => {
                self.insert(&database, &collection, document)?;
            }
            Change::Replace { database, collection, id, document } => {
                let data = self.collection_mut(&database, &collection);
                let Some(position) = data.position_of(&id) else {
                    return Err(DocumentStoreError::Backend(format!(
                        "write conflict: document {id} in {database}.{collection} was removed by another writer"
                    )));
                };

                if let Some(index) = data.unique_violation(&document, Some(position)) {
                    return Err(duplicate_key(&database, &collection, &index, &document));
                }

                data.documents[position] = document;
            }
            Change::Delete { database, collection, id } => {
                let data = self.collection_mut(&database, &collection);
                if let Some(position) = data.position_of(&id) {
                    data.documents.remove(position);
                }
            }
        }

        Ok(())
    }
}

impl CollectionData {
    fn position_of(&self, id: &Bson) -> Option<usize> {
        let wanted = Comparable::from(id);

        self.documents
            .iter()
            .position(|document| document.get(ID_FIELD).is_some_and(|existing| Comparable::from(existing) == wanted))
    }

    /// Name of the first unique index `candidate` would violate, ignoring the
    /// document at position `skip`.
    fn unique_violation(&self, candidate: &Document, skip: Option<usize>) -> Option<String> {
        let conflicts = |fields: &[&str]| {
            let key = index_key(candidate, fields);

            self.documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .any(|(_, existing)| same_key(&index_key(existing, fields), &key))
        };

        if conflicts(&[ID_FIELD]) {
            return Some("_id_".to_string());
        }

        self.indexes
            .iter()
            .filter(|index| index.unique)
            .find(|index| conflicts(&index.fields()))
            .map(IndexDefinition::index_name)
    }
}

fn index_key(document: &Document, fields: &[&str]) -> Vec<Bson> {
    fields
        .iter()
        .map(|field| get_path(document, field).cloned().unwrap_or(Bson::Null))
        .collect()
}

fn same_key(left: &[Bson], right: &[Bson]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(a, b)| Comparable::from(a) == Comparable::from(b))
}

fn duplicate_key(database: &str, collection: &str, index: &str, document: &Document) -> DocumentStoreError {
    DocumentStoreError::DuplicateKey(format!(
        "E{DUPLICATE_KEY_CODE} duplicate key error collection: {database}.{collection} index: {index} dup key: {{ _id: {} }}",
        document.get(ID_FIELD).cloned().unwrap_or(Bson::Null)
    ))
}

fn error_code(err: &DocumentStoreError) -> i32 {
    match err {
        DocumentStoreError::DuplicateKey(_) => DUPLICATE_KEY_CODE,
        _ => WRITE_FAILED_CODE,
    }
}

fn into_stream(documents: Vec<Document>) -> DocumentStream {
    stream::iter(documents.into_iter().map(Ok)).boxed()
}


/// Thread-safe in-memory storage engine client.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones
/// share the same data. Queries scan every document of a collection; unique indexes
/// are enforced but never used for lookups.
///
/// # Example
///
/// ```ignore
/// use docbase_memory::InMemoryStore;
/// use docbase::backend::{DatabaseBackend, StoreClient};
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///     let db = store.database("app");
///
///     let id = db.insert_one("users", doc! { "name": "Alice", "age": 30 }, None).await?;
///     assert_eq!(db.count_documents("users", None, None).await?, 1);
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    engine: Arc<RwLock<Engine>>,
    reachable: bool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { engine: Arc::new(RwLock::new(Engine::default())), reachable: true }
    }

    /// A connector handing out clients that share this store's data.
    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector::with_store(self.clone())
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    type Database = InMemoryDatabase;
    type Session = InMemorySession;

    fn database(&self, name: &str) -> Self::Database {
        InMemoryDatabase { name: name.to_string(), engine: self.engine.clone() }
    }

    async fn ping(&self) -> DocumentStoreResult<()> {
        if !self.reachable {
            return Err(DocumentStoreError::Connection("server selection failed: no reachable servers".into()));
        }

        Ok(())
    }

    async fn list_database_names(&self) -> DocumentStoreResult<Vec<String>> {
        Ok(
            self.engine
                .read()
                .await
                .databases
                .iter()
                .filter(|(_, collections)| !collections.is_empty())
                .map(|(name, _)| name.clone())
                .collect()
        )
    }

    async fn start_session(&self) -> DocumentStoreResult<Self::Session> {
        Ok(InMemorySession::new(self.engine.clone()))
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        debug!("in-memory store client shut down");

        Ok(())
    }
}


/// Opens [`InMemoryStore`] clients.
///
/// By default each connection gets a fresh, empty store. Use
/// [`InMemoryConnector::with_store`] to connect to existing data.
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    store: Option<InMemoryStore>,
    reachable: bool,
    latency: Option<Duration>,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self { store: None, reachable: true, latency: None }
    }
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: InMemoryStore) -> Self {
        Self { store: Some(store), ..Self::default() }
    }

    /// Clients from this connector fail every ping.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Delays every connect by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    type Client = InMemoryStore;

    async fn connect(&self, uri: &str) -> DocumentStoreResult<Self::Client> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        debug!(uri, "opening in-memory store");

        let mut store = self.store.clone().unwrap_or_default();
        store.reachable = self.reachable;

        Ok(store)
    }
}


/// Handle to one database of an [`InMemoryStore`].
#[derive(Clone, Debug)]
pub struct InMemoryDatabase {
    name: String,
    engine: Arc<RwLock<Engine>>,
}

impl InMemoryDatabase {
    /// Runs a read against the session's transaction snapshot, or the shared data.
    async fn read<R>(&self, session: Option<&InMemorySession>, op: impl FnOnce(&Engine) -> R + Send) -> R {
        if let Some(session) = session {
            let transaction = session.transaction.lock().await;
            if let Some(transaction) = transaction.as_ref() {
                return op(&transaction.working);
            }
        }

        op(&*self.engine.read().await)
    }

    /// Runs a write against the session's transaction snapshot, or the shared data.
    async fn write<R>(&self, session: Option<&InMemorySession>, op: impl FnOnce(&mut Engine) -> R + Send) -> R {
        if let Some(session) = session {
            let mut transaction = session.transaction.lock().await;
            if let Some(transaction) = transaction.as_mut() {
                return op(&mut transaction.working);
            }
        }

        op(&mut *self.engine.write().await)
    }
}

#[async_trait]
impl DatabaseBackend for InMemoryDatabase {
    type Session = InMemorySession;

    fn name(&self) -> &str {
        &self.name
    }

    async fn list_collection_names(
        &self,
        name_filter: Option<&str>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Vec<String>> {
        if session.is_some_and(|session| session.in_transaction()) {
            return Err(DocumentStoreError::NotSupportedInTransaction(
                "listCollections cannot run inside a multi-document transaction".into(),
            ));
        }

        self.read(session, |engine| {
            Ok(
                engine
                    .databases
                    .get(&self.name)
                    .map(|collections| {
                        collections
                            .keys()
                            .filter(|name| name_filter.is_none_or(|wanted| wanted == name.as_str()))
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            )
        })
        .await
    }

    async fn create_collection(&self, name: &str, session: Option<&Self::Session>) -> DocumentStoreResult<()> {
        self.write(session, |engine| engine.create_collection(&self.name, name))
            .await
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexDefinition>) -> DocumentStoreResult<()> {
        self.write(None, |engine| {
            let data = engine.collection_mut(&self.name, collection);

            for index in indexes {
                let name = index.index_name();
                if data.indexes.iter().any(|existing| existing.index_name() == name) {
                    continue;
                }

                if index.unique {
                    let fields = index.fields();
                    let keys = data
                        .documents
                        .iter()
                        .map(|document| index_key(document, &fields))
                        .collect::<Vec<_>>();

                    for (position, key) in keys.iter().enumerate() {
                        if keys[..position].iter().any(|earlier| same_key(earlier, key)) {
                            return Err(DocumentStoreError::DuplicateKey(format!(
                                "cannot build unique index {name} on {}.{collection}: duplicate keys",
                                self.name
                            )));
                        }
                    }
                }

                data.indexes.push(index);
            }

            Ok(())
        })
        .await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Bson> {
        self.write(session, |engine| engine.insert(&self.name, collection, document))
            .await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.write(session, |engine| {
            let mut ids = Vec::with_capacity(documents.len());
            let mut failures = Vec::new();

            for (index, document) in documents.into_iter().enumerate() {
                match engine.insert(&self.name, collection, document) {
                    Ok(id) => ids.push(id),
                    Err(err) => failures.push(IndexedWriteFailure {
                        index,
                        code: error_code(&err),
                        message: err.to_string(),
                    }),
                }
            }

            if failures.is_empty() {
                Ok(ids)
            } else {
                Err(DocumentStoreError::PartialWrite(failures))
            }
        })
        .await
    }

    async fn find(
        &self,
        collection: &str,
        query: Query,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<DocumentStream> {
        let documents = self
            .read(session, |engine| {
                let mut matched = Vec::new();

                if let Some(data) = engine.collection(&self.name, collection) {
                    for document in &data.documents {
                        if DocumentEvaluator::matches(document, query.filter.as_ref())? {
                            matched.push(document.clone());
                        }
                    }
                }

                sort_documents(&mut matched, &query.sort);

                Ok::<_, DocumentStoreError>(
                    matched
                        .into_iter()
                        .skip(query.skip.unwrap_or(0))
                        .take(query.limit.unwrap_or(usize::MAX))
                        .collect::<Vec<_>>()
                )
            })
            .await?;

        Ok(into_stream(documents))
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Pipeline,
        _options: AggregateOptions,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<DocumentStream> {
        let documents = self
            .read(session, |engine| {
                run_pipeline(
                    pipeline.stages(),
                    engine.documents(&self.name, collection),
                    |from| engine.documents(&self.name, from),
                )
            })
            .await?;

        Ok(into_stream(documents))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Expr,
        update: Update,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write(session, |engine| {
            engine.update(&self.name, collection, &filter, &update, false)
        })
        .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Expr,
        update: Update,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write(session, |engine| {
            engine.update(&self.name, collection, &filter, &update, true)
        })
        .await
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Expr,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64> {
        self.write(session, |engine| engine.delete(&self.name, collection, &filter, false))
            .await
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: Expr,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64> {
        self.write(session, |engine| engine.delete(&self.name, collection, &filter, true))
            .await
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Option<Expr>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64> {
        self.read(session, |engine| {
            let mut count = 0u64;

            if let Some(data) = engine.collection(&self.name, collection) {
                for document in &data.documents {
                    if DocumentEvaluator::matches(document, filter.as_ref())? {
                        count += 1;
                    }
                }
            }

            Ok(count)
        })
        .await
    }
}


/// An open transaction: a private, journaling working copy of the engine.
struct Transaction {
    working: Engine,
}

/// A session on an [`InMemoryStore`].
///
/// Starting a transaction snapshots the whole engine. Reads and writes issued with
/// the session go to that snapshot, which journals every document it changes.
/// Committing replays the journal onto the current shared data, so writes made by
/// other sessions in the meantime are kept. A replayed change that no longer
/// applies (a duplicate key, or an updated document removed by another writer)
/// fails the commit and leaves the shared data untouched. Aborting discards the
/// snapshot.
///
/// Index creation is never transactional: it always goes to the shared data.
pub struct InMemorySession {
    engine: Arc<RwLock<Engine>>,
    transaction: Mutex<Option<Transaction>>,
    active: AtomicBool,
    ended: AtomicBool,
}

impl InMemorySession {
    fn new(engine: Arc<RwLock<Engine>>) -> Self {
        Self {
            engine,
            transaction: Mutex::new(None),
            active: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(AtomicOrdering::SeqCst)
    }
}

impl fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySession")
            .field("in_transaction", &self.in_transaction())
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[async_trait]
impl TransactionSession for InMemorySession {
    async fn start_transaction(&self) -> DocumentStoreResult<()> {
        if self.is_ended() {
            return Err(DocumentStoreError::Backend("session has ended".into()));
        }

        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(DocumentStoreError::Backend("transaction already in progress".into()));
        }

        let mut working = self.engine.read().await.clone();
        working.journal = Some(Vec::new());
        *transaction = Some(Transaction { working });
        self.active.store(true, AtomicOrdering::SeqCst);

        Ok(())
    }

    async fn commit_transaction(&self) -> DocumentStoreResult<()> {
        let transaction = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or_else(|| DocumentStoreError::Backend("no transaction started".into()))?;

        self.active.store(false, AtomicOrdering::SeqCst);

        let changes = transaction.working.journal.unwrap_or_default();
        let count = changes.len();

        let mut engine = self.engine.write().await;
        let mut merged = engine.clone();
        for change in changes {
            merged.apply(change)?;
        }
        *engine = merged;

        debug!(changes = count, "in-memory transaction committed");

        Ok(())
    }

    async fn abort_transaction(&self) -> DocumentStoreResult<()> {
        let discarded = self.transaction.lock().await.take();
        self.active.store(false, AtomicOrdering::SeqCst);

        match discarded {
            Some(_) => Ok(()),
            None => Err(DocumentStoreError::Backend("no transaction started".into())),
        }
    }

    async fn end(&self) {
        self.transaction.lock().await.take();
        self.active.store(false, AtomicOrdering::SeqCst);
        self.ended.store(true, AtomicOrdering::SeqCst);
    }

    fn in_transaction(&self) -> bool {
        self.active.load(AtomicOrdering::SeqCst)
    }
}
