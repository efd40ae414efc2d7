//! Document store integration
//!
//! This module defines:
//! - The driver capability (`DocumentStore`) and how to obtain one (`StoreConnector`)
//! - The plain result structures returned by store calls
//! - `StoreGateway`, which owns the single lazily-established connection
//!
//! The production driver lives in `mongo`; tests use the in-memory store.

mod gateway;
#[cfg(test)]
pub(crate) mod memory;
mod mongo;

pub use gateway::{ConnectionStatus, FindOutcome, StoreGateway};
pub use mongo::{MongoConnector, MongoStore};

use crate::query::Document;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a store driver
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("{0}")]
    Driver(String),

    #[error("Document conversion error: {0}")]
    Conversion(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Read query against one collection
#[derive(Debug, Clone, PartialEq)]
pub struct FindRequest {
    pub collection: String,
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: u64,
    pub limit: i64,
}

impl FindRequest {
    /// Unfiltered read of the first `limit` documents
    pub fn sample(collection: &str, limit: usize) -> Self {
        Self {
            collection: collection.to_string(),
            filter: Document::new(),
            projection: None,
            sort: None,
            skip: 0,
            limit: limit as i64,
        }
    }
}

/// Collection entry from a namespace listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Database entry from the server listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    pub name: String,
    pub size_on_disk: u64,
    pub empty: bool,
}

/// Collection statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub count: i64,
    pub size: i64,
    pub avg_obj_size: f64,
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub collections: i64,
    pub data_size: i64,
    pub storage_size: i64,
    pub indexes: i64,
}

/// Server identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub uptime: Option<f64>,
    pub host: Option<String>,
}

/// A live connection to a document store.
///
/// Every call names the database it runs against; documents are exchanged as
/// relaxed Extended JSON objects.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn find(&self, database: &str, request: &FindRequest) -> StoreResult<Vec<Document>>;

    async fn count(&self, database: &str, collection: &str, filter: &Document) -> StoreResult<u64>;

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Document],
    ) -> StoreResult<Vec<Document>>;

    async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> StoreResult<Vec<Value>>;

    async fn list_collections(&self, database: &str) -> StoreResult<Vec<CollectionInfo>>;

    async fn list_databases(&self) -> StoreResult<Vec<DatabaseInfo>>;

    async fn collection_stats(&self, database: &str, collection: &str)
        -> StoreResult<CollectionStats>;

    async fn database_stats(&self, database: &str) -> StoreResult<DatabaseStats>;

    async fn server_status(&self) -> StoreResult<ServerInfo>;

    /// Release the underlying connection
    async fn close(&self);
}

/// Establishes connections; called by the gateway at most once per attempt.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>>;
}
