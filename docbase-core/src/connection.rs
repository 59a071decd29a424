//! Connection and session lifecycle.
//!
//! A [`ConnectionManager`] owns one connected [`StoreClient`], a lazily filled cache
//! of database handles keyed by name, and at most one active session carrying a
//! transaction. Callers needing independent transactions use separate managers.
//!
//! ```ignore
//! let config = ConnectionConfig::new("mongodb://localhost:27017", "app");
//! let manager = ConnectionManager::connect(&config, &MongoDbConnector::default()).await?;
//!
//! manager
//!     .with_session(|session| async move {
//!         let store = manager.core_store().await?.with_session(session);
//!         store.save(&mut order, Some(&operator)).await?;
//!         Ok(())
//!     })
//!     .await?;
//! manager.commit_transaction().await?;
//!
//! manager.close().await?;
//! ```

use mea::{mutex::Mutex, rwlock::RwLock};
use std::{collections::HashMap, fmt, future::Future, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    backend::{StoreClient, StoreConnector},
    cancel::CancellationScope,
    config::ConnectionConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    session::{SessionConflict, TransactionSession},
    store::DocumentStore,
};

/// Owns the connection to a storage engine.
///
/// All methods take `&self`; the manager is meant to be shared behind an `Arc`.
/// Closing cancels the manager's [`CancellationScope`], so stores obtained from it
/// fail with [`DocumentStoreError::Cancelled`] afterwards.
pub struct ConnectionManager<C: StoreClient> {
    client: RwLock<Option<C>>,
    databases: RwLock<HashMap<String, C::Database>>,
    session: Mutex<Option<Arc<C::Session>>>,
    default_database: String,
    user_database: Option<String>,
    session_conflict: SessionConflict,
    scope: CancellationScope,
}

impl<C: StoreClient> ConnectionManager<C> {
    /// Connects and verifies liveness within the configured timeout.
    ///
    /// # Errors
    ///
    /// * [`DocumentStoreError::Configuration`] when the URI or default database is empty
    /// * [`DocumentStoreError::Connection`] when connecting or the ping fails or times out
    pub async fn connect<K>(config: &ConnectionConfig, connector: &K) -> DocumentStoreResult<Self>
    where
        K: StoreConnector<Client = C>,
    {
        Self::connect_with_scope(config, connector, &CancellationScope::new()).await
    }

    /// Like [`ConnectionManager::connect`], with the manager's scope derived from
    /// `parent` so cancelling `parent` stops every operation issued through it.
    pub async fn connect_with_scope<K>(
        config: &ConnectionConfig,
        connector: &K,
        parent: &CancellationScope,
    ) -> DocumentStoreResult<Self>
    where
        K: StoreConnector<Client = C>,
    {
        let uri = config.connection_uri()?;
        let timeout = config.connect_timeout();
        let scope = parent.child();

        let attempt = async {
            let client = connector.connect(&uri).await?;

            if let Err(err) = client.ping().await {
                let _ = client.shutdown().await;
                return Err(err);
            }

            Ok(client)
        };

        let client = match tokio::time::timeout(timeout, scope.run(attempt)).await {
            Ok(Ok(client)) => client,
            Ok(Err(DocumentStoreError::Cancelled)) => return Err(DocumentStoreError::Cancelled),
            Ok(Err(err)) => {
                warn!(error = %err, "failed to connect");
                return Err(match err {
                    DocumentStoreError::Connection(_) => err,
                    other => DocumentStoreError::Connection(other.to_string()),
                });
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "connection attempt timed out");
                return Err(DocumentStoreError::Connection(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                )));
            }
        };

        info!(database = %config.default_database, "connected to document store");

        Ok(Self {
            client: RwLock::new(Some(client)),
            databases: RwLock::new(HashMap::new()),
            session: Mutex::new(None),
            default_database: config.default_database.clone(),
            user_database: config.user_database().map(str::to_string),
            session_conflict: config.session_conflict,
            scope,
        })
    }

    pub fn default_database_name(&self) -> &str {
        &self.default_database
    }

    pub fn user_database_name(&self) -> Option<&str> {
        self.user_database.as_deref()
    }

    pub fn scope(&self) -> &CancellationScope {
        &self.scope
    }

    async fn client(&self) -> DocumentStoreResult<C> {
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or(DocumentStoreError::ConnectionClosed)?;
        self.scope.check()?;

        Ok(client)
    }

    pub async fn is_closed(&self) -> bool {
        self.client.read().await.is_none()
    }

    /// Returns the cached handle for database `name`, opening it on first use.
    ///
    /// An empty name means the default database. Concurrent first accesses agree on
    /// a single handle.
    pub async fn database(&self, name: &str) -> DocumentStoreResult<C::Database> {
        let name = if name.is_empty() { self.default_database.as_str() } else { name };
        let client = self.client().await?;

        if let Some(database) = self.databases.read().await.get(name) {
            return Ok(database.clone());
        }

        let mut cache = self.databases.write().await;
        let database = cache
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(database = name, "opening database handle");
                client.database(name)
            })
            .clone();

        Ok(database)
    }

    pub async fn core_database(&self) -> DocumentStoreResult<C::Database> {
        self.database(&self.default_database).await
    }

    /// The user database handle, or `None` when no user database is configured.
    pub async fn user_database(&self) -> DocumentStoreResult<Option<C::Database>> {
        match &self.user_database {
            Some(name) => self.database(name).await.map(Some),
            None => Ok(None),
        }
    }

    /// A store over the default database, bound to this manager's scope.
    pub async fn core_store(&self) -> DocumentStoreResult<DocumentStore<C::Database>> {
        let database = self.core_database().await?;

        Ok(DocumentStore::new(database).with_scope(self.scope.clone()))
    }

    pub async fn user_store(&self) -> DocumentStoreResult<Option<DocumentStore<C::Database>>> {
        Ok(self
            .user_database()
            .await?
            .map(|database| DocumentStore::new(database).with_scope(self.scope.clone())))
    }

    /// Starts a session with an open transaction and runs `body` with it.
    ///
    /// The session stays active after `body` returns, whatever the outcome; finish it
    /// with [`ConnectionManager::commit_transaction`] or
    /// [`ConnectionManager::abort_transaction`].
    ///
    /// When a session is already active, the configured [`SessionConflict`] decides:
    /// `Reject` fails with [`DocumentStoreError::SessionAlreadyActive`], `Skip` returns
    /// `Ok(())` without running `body`.
    pub async fn with_session<F, Fut>(&self, body: F) -> DocumentStoreResult<()>
    where
        F: FnOnce(Arc<C::Session>) -> Fut,
        Fut: Future<Output = DocumentStoreResult<()>>,
    {
        let session = {
            let mut slot = self.session.lock().await;

            if slot.is_some() {
                return match self.session_conflict {
                    SessionConflict::Reject => Err(DocumentStoreError::SessionAlreadyActive),
                    SessionConflict::Skip => {
                        warn!("a session is already active, skipping requested session body");
                        Ok(())
                    }
                };
            }

            let client = self.client().await?;
            let session = self.scope.run(client.start_session()).await?;

            if let Err(err) = self.scope.run(session.start_transaction()).await {
                session.end().await;
                return Err(err);
            }

            let session = Arc::new(session);
            *slot = Some(session.clone());
            session
        };

        debug!("transaction started");

        self.scope.run(body(session)).await
    }

    pub async fn active_session(&self) -> Option<Arc<C::Session>> {
        self.session.lock().await.clone()
    }

    /// Commits the active transaction and ends its session.
    ///
    /// When the commit fails the session stays active so the caller can abort it.
    pub async fn commit_transaction(&self) -> DocumentStoreResult<()> {
        let mut slot = self.session.lock().await;
        let session = slot.clone().ok_or(DocumentStoreError::NoActiveSession)?;

        self.scope.run(session.commit_transaction()).await?;
        session.end().await;
        *slot = None;

        debug!("transaction committed");

        Ok(())
    }

    /// Aborts the active transaction and ends its session.
    pub async fn abort_transaction(&self) -> DocumentStoreResult<()> {
        let session = self
            .session
            .lock()
            .await
            .take()
            .ok_or(DocumentStoreError::NoActiveSession)?;

        let result = session.abort_transaction().await;
        session.end().await;

        debug!("transaction aborted");

        result
    }

    pub async fn list_database_names(&self) -> DocumentStoreResult<Vec<String>> {
        let client = self.client().await?;

        self.scope.run(client.list_database_names()).await
    }

    /// Liveness check against the primary.
    pub async fn ping(&self) -> DocumentStoreResult<()> {
        let client = self.client().await?;

        self.scope.run(client.ping()).await
    }

    /// Ends any active session, disconnects and cancels the manager's scope.
    ///
    /// Idempotent: closing an already closed manager does nothing.
    pub async fn close(&self) -> DocumentStoreResult<()> {
        let Some(client) = self.client.write().await.take() else {
            debug!("connection already closed");
            return Ok(());
        };

        if let Some(session) = self.session.lock().await.take() {
            if session.in_transaction() {
                if let Err(err) = session.abort_transaction().await {
                    warn!(error = %err, "failed to abort transaction on close");
                }
            }
            session.end().await;
        }

        self.databases.write().await.clear();

        let result = client.shutdown().await;
        self.scope.cancel();

        info!(database = %self.default_database, "connection closed");

        result
    }
}

impl<C: StoreClient> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("default_database", &self.default_database)
            .field("user_database", &self.user_database)
            .field("session_conflict", &self.session_conflict)
            .field("scope", &self.scope)
            .finish()
    }
}
