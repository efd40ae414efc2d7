//! MongoDB driver integration
//!
//! Wraps the `mongodb` client behind `DocumentStore`. Documents cross the
//! boundary as relaxed Extended JSON, so ObjectIds and dates come back as
//! `{"$oid": ...}` / `{"$date": ...}` objects.

use super::{
    CollectionInfo, CollectionStats, DatabaseInfo, DatabaseStats, DocumentStore, FindRequest,
    ServerInfo, StoreConnector, StoreError, StoreResult,
};
use crate::config::Config;
use crate::query::Document;
use async_trait::async_trait;
use bson::{doc, Bson};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::results::CollectionType;
use mongodb::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Driver(err.to_string())
    }
}

/// Connects to MongoDB using the configured URI and timeouts
pub struct MongoConnector {
    uri: String,
    app_name: String,
    connect_timeout: Duration,
    server_selection_timeout: Duration,
}

impl MongoConnector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            uri: config.connection_uri.clone(),
            app_name: config.store.app_name.clone(),
            connect_timeout: config.store.connect_timeout(),
            server_selection_timeout: config.store.server_selection_timeout(),
        }
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        let mut options = ClientOptions::parse(&self.uri).await?;
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.server_selection_timeout);
        if options.app_name.is_none() {
            options.app_name = Some(self.app_name.clone());
        }

        let client = Client::with_options(options)?;
        let store = MongoStore { client };

        // The driver connects lazily; a ping forces server selection now.
        store.ping().await?;
        Ok(Arc::new(store))
    }
}

/// Live MongoDB client
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    fn collection(&self, database: &str, collection: &str) -> mongodb::Collection<bson::Document> {
        self.client
            .database(database)
            .collection::<bson::Document>(collection)
    }

    async fn command(&self, database: &str, command: bson::Document) -> StoreResult<bson::Document> {
        debug!(database, command = %command, "Running command");
        Ok(self.client.database(database).run_command(command, None).await?)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> StoreResult<()> {
        self.command("admin", doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn find(&self, database: &str, request: &FindRequest) -> StoreResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.projection = request.projection.as_ref().map(to_bson_document).transpose()?;
        options.sort = request.sort.as_ref().map(to_bson_document).transpose()?;
        options.skip = Some(request.skip);
        options.limit = Some(request.limit);

        let filter = to_bson_document(&request.filter)?;
        let cursor = self
            .collection(database, &request.collection)
            .find(filter, options)
            .await?;
        let docs: Vec<bson::Document> = cursor.try_collect().await?;

        Ok(docs.into_iter().map(to_json_document).collect())
    }

    async fn count(&self, database: &str, collection: &str, filter: &Document) -> StoreResult<u64> {
        let filter = to_bson_document(filter)?;
        Ok(self
            .collection(database, collection)
            .count_documents(filter, None)
            .await?)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Document],
    ) -> StoreResult<Vec<Document>> {
        let stages = pipeline
            .iter()
            .map(to_bson_document)
            .collect::<StoreResult<Vec<_>>>()?;

        let cursor = self
            .collection(database, collection)
            .aggregate(stages, None)
            .await?;
        let docs: Vec<bson::Document> = cursor.try_collect().await?;

        Ok(docs.into_iter().map(to_json_document).collect())
    }

    async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> StoreResult<Vec<Value>> {
        let filter = to_bson_document(filter)?;
        let values = self
            .collection(database, collection)
            .distinct(field, filter, None)
            .await?;

        Ok(values.into_iter().map(Bson::into_relaxed_extjson).collect())
    }

    async fn list_collections(&self, database: &str) -> StoreResult<Vec<CollectionInfo>> {
        let cursor = self
            .client
            .database(database)
            .list_collections(None, None)
            .await?;
        let specs: Vec<_> = cursor.try_collect().await?;

        let mut collections: Vec<CollectionInfo> = specs
            .into_iter()
            .map(|spec| CollectionInfo {
                kind: match spec.collection_type {
                    CollectionType::View => "view",
                    CollectionType::Timeseries => "timeseries",
                    _ => "collection",
                }
                .to_string(),
                name: spec.name,
            })
            .collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(collections)
    }

    async fn list_databases(&self) -> StoreResult<Vec<DatabaseInfo>> {
        let specs = self.client.list_databases(None, None).await?;

        Ok(specs
            .into_iter()
            .map(|spec| DatabaseInfo {
                name: spec.name,
                size_on_disk: spec.size_on_disk,
                empty: spec.empty,
            })
            .collect())
    }

    async fn collection_stats(&self, database: &str, collection: &str) -> StoreResult<CollectionStats> {
        let stats = self.command(database, doc! { "collStats": collection }).await?;

        Ok(CollectionStats {
            count: int_field(&stats, "count"),
            size: int_field(&stats, "size"),
            avg_obj_size: number_field(&stats, "avgObjSize").unwrap_or(0.0),
        })
    }

    async fn database_stats(&self, database: &str) -> StoreResult<DatabaseStats> {
        let stats = self.command(database, doc! { "dbStats": 1 }).await?;

        Ok(DatabaseStats {
            collections: int_field(&stats, "collections"),
            data_size: int_field(&stats, "dataSize"),
            storage_size: int_field(&stats, "storageSize"),
            indexes: int_field(&stats, "indexes"),
        })
    }

    async fn server_status(&self) -> StoreResult<ServerInfo> {
        match self.command("admin", doc! { "serverStatus": 1 }).await {
            Ok(status) => Ok(ServerInfo {
                version: status.get_str("version").unwrap_or("unknown").to_string(),
                uptime: number_field(&status, "uptime"),
                host: status.get_str("host").ok().map(ToString::to_string),
            }),
            Err(e) => {
                // Restricted users may lack serverStatus; buildInfo still reports the version
                debug!(error = %e, "serverStatus unavailable, falling back to buildInfo");
                let info = self.command("admin", doc! { "buildInfo": 1 }).await?;
                Ok(ServerInfo {
                    version: info.get_str("version").unwrap_or("unknown").to_string(),
                    uptime: None,
                    host: None,
                })
            }
        }
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

/// Convert a JSON document (Extended JSON allowed) into BSON
fn to_bson_document(doc: &Document) -> StoreResult<bson::Document> {
    match Bson::try_from(Value::Object(doc.clone())) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(StoreError::Conversion(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
        Err(e) => Err(StoreError::Conversion(e.to_string())),
    }
}

fn to_json_document(doc: bson::Document) -> Document {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn number_field(doc: &bson::Document, key: &str) -> Option<f64> {
    match doc.get(key)? {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn int_field(doc: &bson::Document, key: &str) -> i64 {
    number_field(doc, key).map_or(0, |v| v as i64)
}
