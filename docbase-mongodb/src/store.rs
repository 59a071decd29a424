use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::{StreamExt, stream};
use mea::mutex::{Mutex, MutexGuard, OwnedMutexGuard};
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, Database, IndexModel, SessionCursor,
    options::{
        AggregateOptions as MongoAggregateOptions, ClientOptions, FindOptions, IndexOptions,
        ReadPreference, SelectionCriteria,
    },
};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use docbase_core::{
    backend::{DatabaseBackend, DocumentStream, StoreClient, StoreConnector},
    document::IndexDefinition,
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{AggregateOptions, Pipeline},
    query::{Expr, Query},
    session::TransactionSession,
    update::{Update, UpdateOutcome},
};

use crate::{error::map_error, query::MongoQueryTranslator};

/// Upper bound on server time spent counting documents.
const COUNT_MAX_TIME: Duration = Duration::from_secs(2);

/// Opens [`MongoDbClient`]s from `mongodb://` or `mongodb+srv://` URIs.
#[derive(Debug, Clone, Default)]
pub struct MongoDbConnector {
    app_name: Option<String>,
}

impl MongoDbConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `app_name` to the server in the connection handshake.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

#[async_trait]
impl StoreConnector for MongoDbConnector {
    type Client = MongoDbClient;

    async fn connect(&self, uri: &str) -> DocumentStoreResult<Self::Client> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| DocumentStoreError::Connection(e.to_string()))?;

        if let Some(app_name) = &self.app_name {
            options.app_name = Some(app_name.clone());
        }

        let client = Client::with_options(options)
            .map_err(|e| DocumentStoreError::Connection(e.to_string()))?;

        Ok(MongoDbClient::new(client))
    }
}

/// A MongoDB client. Clones share the driver's connection pool.
#[derive(Debug, Clone)]
pub struct MongoDbClient {
    client: Client,
}

impl MongoDbClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying driver client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl StoreClient for MongoDbClient {
    type Database = MongoDbDatabase;
    type Session = MongoDbSession;

    fn database(&self, name: &str) -> Self::Database {
        MongoDbDatabase::new(self.client.database(name))
    }

    async fn ping(&self) -> DocumentStoreResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await
            .map_err(|e| DocumentStoreError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn list_database_names(&self) -> DocumentStoreResult<Vec<String>> {
        self.client
            .list_database_names()
            .await
            .map_err(map_error)
    }

    async fn start_session(&self) -> DocumentStoreResult<Self::Session> {
        let session = self.client
            .start_session()
            .await
            .map_err(map_error)?;

        Ok(MongoDbSession::new(session))
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client
            .clone()
            .shutdown()
            .immediate(true)
            .await;

        Ok(())
    }
}

/// A session on a MongoDB deployment.
///
/// The driver session is exclusively borrowed by every operation running under it,
/// so it sits behind a mutex and operations sharing one session run one at a time.
/// A cursor opened under the session keeps the lock until its stream is dropped.
pub struct MongoDbSession {
    session: Arc<Mutex<Option<ClientSession>>>,
    in_transaction: AtomicBool,
}

impl MongoDbSession {
    fn new(session: ClientSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(Some(session))),
            in_transaction: AtomicBool::new(false),
        }
    }
}

impl fmt::Debug for MongoDbSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoDbSession")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

fn session_ended() -> DocumentStoreError {
    DocumentStoreError::Precondition("session has ended".to_string())
}

#[async_trait]
impl TransactionSession for MongoDbSession {
    async fn start_transaction(&self) -> DocumentStoreResult<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(session_ended)?;

        session
            .start_transaction()
            .await
            .map_err(map_error)?;

        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_transaction(&self) -> DocumentStoreResult<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(session_ended)?;

        session
            .commit_transaction()
            .await
            .map_err(map_error)?;

        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_transaction(&self) -> DocumentStoreResult<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(session_ended)?;

        let result = session
            .abort_transaction()
            .await
            .map_err(map_error);

        self.in_transaction.store(false, Ordering::SeqCst);
        result
    }

    async fn end(&self) {
        let mut guard = self.session.lock().await;

        if let Some(mut session) = guard.take()
            && self.in_transaction.swap(false, Ordering::SeqCst)
            && let Err(e) = session.abort_transaction().await
        {
            tracing::warn!(error = %e, "failed to abort transaction while ending session");
        }
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }
}

type SessionGuard<'a> = MutexGuard<'a, Option<ClientSession>>;

/// Locks the driver session when one is given.
async fn lock_session(session: Option<&MongoDbSession>) -> Option<SessionGuard<'_>> {
    match session {
        Some(session) => Some(session.session.lock().await),
        None => None,
    }
}

/// The driver session to pass along, if any. Fails when the session has ended.
fn driver_session<'a>(guard: &'a mut Option<SessionGuard<'_>>) -> DocumentStoreResult<Option<&'a mut ClientSession>> {
    match guard {
        Some(guard) => (**guard).as_mut().map(Some).ok_or_else(session_ended),
        None => Ok(None),
    }
}

/// One MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoDbDatabase {
    database: Database,
}

impl MongoDbDatabase {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn collection(&self, name: &str) -> MongoCollection<Document> {
        self.database.collection(name)
    }
}

fn update_document(update: Update) -> Document {
    let mut document = Document::new();

    if !update.set.is_empty() {
        document.insert("$set", update.set);
    }
    if !update.push.is_empty() {
        document.insert("$push", update.push);
    }

    document
}

fn index_model(index: IndexDefinition) -> IndexModel {
    let keys = index.keys
        .iter()
        .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
        .collect::<Document>();

    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(index.name)
                .unique(index.unique)
                .build()
        )
        .build()
}

/// Locks the driver session for as long as the returned guard lives.
async fn lock_session_owned(session: &MongoDbSession) -> OwnedMutexGuard<Option<ClientSession>> {
    session.session.clone().lock_owned().await
}

/// Streams a session-bound cursor, one batch at a time, holding the session lock.
fn session_stream(
    cursor: SessionCursor<Document>,
    guard: OwnedMutexGuard<Option<ClientSession>>,
) -> DocumentStream {
    stream::unfold((cursor, guard), |(mut cursor, mut guard)| async move {
        let session = (*guard).as_mut()?;
        let next = cursor.next(session).await?;

        Some((next.map_err(map_error), (cursor, guard)))
    })
    .boxed()
}

fn into_stream(cursor: mongodb::Cursor<Document>) -> DocumentStream {
    cursor
        .map(|document| document.map_err(map_error))
        .boxed()
}

#[async_trait]
impl DatabaseBackend for MongoDbDatabase {
    type Session = MongoDbSession;

    fn name(&self) -> &str {
        self.database.name()
    }

    async fn list_collection_names(
        &self,
        name_filter: Option<&str>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Vec<String>> {
        let mut guard = lock_session(session).await;
        let action = self.database
            .list_collection_names()
            .filter(name_filter.map(|name| doc! { "name": name }).unwrap_or_default());

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        };

        result.map_err(map_error)
    }

    async fn create_collection(
        &self,
        name: &str,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<()> {
        let mut guard = lock_session(session).await;
        let action = self.database.create_collection(name);

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        };

        result.map_err(map_error)
    }

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<()> {
        if indexes.is_empty() {
            return Ok(());
        }

        self.collection(collection)
            .create_indexes(indexes.into_iter().map(index_model))
            .await
            .map_err(map_error)?;

        Ok(())
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Bson> {
        let mut guard = lock_session(session).await;
        let collection = self.collection(collection);
        let action = collection.insert_one(document);

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(result.inserted_id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = lock_session(session).await;
        let collection = self.collection(collection);
        let count = documents.len();
        let action = collection
            .insert_many(documents)
            .ordered(false);

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        let mut inserted_ids = result.inserted_ids;

        Ok((0..count).filter_map(|index| inserted_ids.remove(&index)).collect())
    }

    async fn find(
        &self,
        collection: &str,
        query: Query,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<DocumentStream> {
        let mut options = FindOptions::default();

        options.sort = MongoQueryTranslator::sort(&query.sort);
        options.skip = query.skip.map(|skip| skip as u64);
        options.limit = query.limit.map(|limit| limit as i64);

        let filter = MongoQueryTranslator::filter(query.filter.as_ref())?;
        let collection = self.collection(collection);
        let action = collection
            .find(filter)
            .with_options(options);

        match session {
            Some(session) => {
                let mut guard = lock_session_owned(session).await;
                let driver = (*guard).as_mut().ok_or_else(session_ended)?;
                let cursor = action.session(driver).await.map_err(map_error)?;

                Ok(session_stream(cursor, guard))
            }
            None => Ok(into_stream(action.await.map_err(map_error)?)),
        }
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Pipeline,
        options: AggregateOptions,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<DocumentStream> {
        let stages = MongoQueryTranslator::pipeline(pipeline.stages())?;

        let mut mongo_options = MongoAggregateOptions::default();
        mongo_options.allow_disk_use = options.allow_disk_use;
        mongo_options.batch_size = options.batch_size;

        let collection = self.collection(collection);
        let action = collection
            .aggregate(stages)
            .with_options(mongo_options);

        match session {
            Some(session) => {
                let mut guard = lock_session_owned(session).await;
                let driver = (*guard).as_mut().ok_or_else(session_ended)?;
                let cursor = action.session(driver).await.map_err(map_error)?;

                Ok(session_stream(cursor, guard))
            }
            None => Ok(into_stream(action.await.map_err(map_error)?)),
        }
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Expr,
        update: Update,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let filter = MongoQueryTranslator::filter(Some(&filter))?;
        let mut guard = lock_session(session).await;
        let collection = self.collection(collection);
        let action = collection.update_one(filter, update_document(update));

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(UpdateOutcome { matched: result.matched_count, modified: result.modified_count })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Expr,
        update: Update,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let filter = MongoQueryTranslator::filter(Some(&filter))?;
        let mut guard = lock_session(session).await;
        let collection = self.collection(collection);
        let action = collection.update_many(filter, update_document(update));

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(UpdateOutcome { matched: result.matched_count, modified: result.modified_count })
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Expr,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64> {
        let filter = MongoQueryTranslator::filter(Some(&filter))?;
        let mut guard = lock_session(session).await;
        let collection = self.collection(collection);
        let action = collection.delete_one(filter);

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(result.deleted_count)
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: Expr,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64> {
        let filter = MongoQueryTranslator::filter(Some(&filter))?;
        let mut guard = lock_session(session).await;
        let collection = self.collection(collection);
        let action = collection.delete_many(filter);

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(result.deleted_count)
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Option<Expr>,
        session: Option<&Self::Session>,
    ) -> DocumentStoreResult<u64> {
        let filter = MongoQueryTranslator::filter(filter.as_ref())?;
        let mut guard = lock_session(session).await;
        let collection = self.collection(collection);
        let action = collection
            .count_documents(filter)
            .max_time(COUNT_MAX_TIME);

        let result = match driver_session(&mut guard)? {
            Some(session) => action.session(session).await,
            None => action.await,
        };

        result.map_err(map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbase_core::query::SortDirection;

    #[test]
    fn update_document_omits_empty_operators() {
        let update = Update::new().set("status", "closed");

        assert_eq!(update_document(update), doc! { "$set": { "status": "closed" } });
    }

    #[test]
    fn index_model_keeps_key_order_and_uniqueness() {
        let model = index_model(
            IndexDefinition::new([("account", SortDirection::Asc), ("created", SortDirection::Desc)])
                .unique()
                .named("account_created"),
        );

        assert_eq!(model.keys, doc! { "account": 1, "created": -1 });

        let options = model.options.unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.name.as_deref(), Some("account_created"));
    }
}
