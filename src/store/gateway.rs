//! Lazily-connected gateway to the document store
//!
//! The gateway owns the process-wide connection. The first caller to find it
//! unconnected starts a connect attempt; everyone else arriving while that
//! attempt is running awaits the same shared future. A failed attempt leaves
//! the gateway in `Failed`, and the next call tries again.

use super::{
    CollectionInfo, CollectionStats, DatabaseInfo, DatabaseStats, DocumentStore, FindRequest,
    ServerInfo, StoreConnector, StoreResult,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::query::Document;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type ConnectOutcome = std::result::Result<Arc<dyn DocumentStore>, String>;
type PendingConnect = Shared<BoxFuture<'static, ConnectOutcome>>;

enum ConnectionState {
    Unconnected,
    Connecting { attempt: u64, pending: PendingConnect },
    Connected(Arc<dyn DocumentStore>),
    Failed { cause: String },
}

/// Observable connection lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Unconnected => write!(f, "unconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Failed(cause) => write!(f, "failed ({})", cause),
        }
    }
}

/// Result of a `find`
#[derive(Debug, Clone)]
pub struct FindOutcome {
    pub documents: Vec<Document>,
    pub count: usize,
}

/// Store gateway handle
pub struct StoreGateway {
    connector: Arc<dyn StoreConnector>,
    target: String,
    database: String,
    operation_timeout: Option<Duration>,
    state: RwLock<ConnectionState>,
    attempts: AtomicU64,
}

impl StoreGateway {
    /// Create an unconnected gateway; nothing touches the network until first use
    pub fn new(config: &Config, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            target: config.redacted_uri(),
            database: config.database_name.clone(),
            operation_timeout: config.store.operation_timeout(),
            state: RwLock::new(ConnectionState::Unconnected),
            attempts: AtomicU64::new(0),
        }
    }

    /// Configured database name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Connection target with credentials redacted
    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn status(&self) -> ConnectionStatus {
        match &*self.state.read().await {
            ConnectionState::Unconnected => ConnectionStatus::Unconnected,
            ConnectionState::Connecting { .. } => ConnectionStatus::Connecting,
            ConnectionState::Connected(_) => ConnectionStatus::Connected,
            ConnectionState::Failed { cause } => ConnectionStatus::Failed(cause.clone()),
        }
    }

    /// Live handle if already connected; never starts a connection
    pub async fn get(&self) -> Option<Arc<dyn DocumentStore>> {
        match &*self.state.read().await {
            ConnectionState::Connected(store) => Some(store.clone()),
            _ => None,
        }
    }

    /// Return the live store handle, connecting first if needed
    pub async fn ensure_connected(&self) -> Result<Arc<dyn DocumentStore>> {
        if let Some(store) = self.get().await {
            return Ok(store);
        }

        let (attempt, pending) = {
            let mut state = self.state.write().await;
            match &*state {
                ConnectionState::Connected(store) => return Ok(store.clone()),
                ConnectionState::Connecting { attempt, pending } => {
                    debug!(attempt, "Awaiting in-flight connection attempt");
                    (*attempt, pending.clone())
                }
                ConnectionState::Unconnected | ConnectionState::Failed { .. } => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let connector = self.connector.clone();
                    let target = self.target.clone();
                    let pending = async move {
                        info!(uri = %target, attempt, "Connecting to document store");
                        connector.connect().await.map_err(|e| e.to_string())
                    }
                    .boxed()
                    .shared();

                    *state = ConnectionState::Connecting {
                        attempt,
                        pending: pending.clone(),
                    };
                    (attempt, pending)
                }
            }
        };

        let outcome = pending.await;
        self.settle(attempt, &outcome).await;

        outcome.map_err(|cause| Error::ConnectionUnavailable {
            target: self.target.clone(),
            cause,
        })
    }

    /// Record the outcome of an attempt, unless the state moved on meanwhile
    async fn settle(&self, attempt: u64, outcome: &ConnectOutcome) {
        let mut state = self.state.write().await;
        let current = match &*state {
            ConnectionState::Connecting { attempt: current, .. } => *current,
            _ => return,
        };
        if current != attempt {
            return;
        }

        *state = match outcome {
            Ok(store) => {
                info!(uri = %self.target, database = %self.database, "Connected to document store");
                ConnectionState::Connected(store.clone())
            }
            Err(cause) => {
                warn!(uri = %self.target, %cause, "Connection attempt failed");
                ConnectionState::Failed {
                    cause: cause.clone(),
                }
            }
        };
    }

    /// Release the live connection; later calls reconnect from scratch
    pub async fn shutdown(&self) {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, ConnectionState::Unconnected)
        };

        if let ConnectionState::Connected(store) = previous {
            info!(uri = %self.target, "Closing document store connection");
            store.close().await;
        }
    }

    /// Run one store call with the connection ensured and the optional deadline applied
    async fn run<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let store = self.ensure_connected().await?;
        debug!(operation, "Running store operation");

        let outcome = match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, call(store))
                .await
                .map_err(|_| {
                    Error::store(operation, format!("timed out after {} ms", limit.as_millis()))
                })?,
            None => call(store).await,
        };

        outcome.map_err(|e| Error::store(operation, e.to_string()))
    }

    pub async fn ping(&self) -> Result<()> {
        self.run("ping", |store| async move { store.ping().await })
            .await
    }

    pub async fn find(&self, request: &FindRequest) -> Result<FindOutcome> {
        let documents = self
            .run("find", |store| async move {
                store.find(&self.database, request).await
            })
            .await?;

        let count = documents.len();
        Ok(FindOutcome { documents, count })
    }

    /// Up to `limit` documents in store-native order
    pub async fn sample(&self, collection: &str, limit: usize) -> Result<Vec<Document>> {
        let request = FindRequest::sample(collection, limit);
        Ok(self.find(&request).await?.documents)
    }

    pub async fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
        self.run("count", |store| async move {
            store.count(&self.database, collection, filter).await
        })
        .await
    }

    pub async fn aggregate(&self, collection: &str, pipeline: &[Document]) -> Result<Vec<Document>> {
        self.run("aggregate", |store| async move {
            store.aggregate(&self.database, collection, pipeline).await
        })
        .await
    }

    pub async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> Result<Vec<Value>> {
        self.run("distinct", |store| async move {
            store.distinct(&self.database, collection, field, filter).await
        })
        .await
    }

    /// Collections of `database`, or of the configured database when `None`
    pub async fn list_collections(&self, database: Option<&str>) -> Result<Vec<CollectionInfo>> {
        let database = database.unwrap_or(&self.database);
        self.run("listCollections", |store| async move {
            store.list_collections(database).await
        })
        .await
    }

    pub async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        self.run("listDatabases", |store| async move {
            store.list_databases().await
        })
        .await
    }

    pub async fn collection_stats(
        &self,
        database: Option<&str>,
        collection: &str,
    ) -> Result<CollectionStats> {
        let database = database.unwrap_or(&self.database);
        self.run("collStats", |store| async move {
            store.collection_stats(database, collection).await
        })
        .await
    }

    pub async fn database_stats(&self) -> Result<DatabaseStats> {
        self.run("dbStats", |store| async move {
            store.database_stats(&self.database).await
        })
        .await
    }

    pub async fn server_status(&self) -> Result<ServerInfo> {
        self.run("serverStatus", |store| async move {
            store.server_status().await
        })
        .await
    }
}
