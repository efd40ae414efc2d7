//! In-memory document store used by tests
//!
//! Supports enough of the query language to exercise the dispatcher:
//! equality and comparison filters, inclusion/exclusion projections, sorting,
//! skip/limit, distinct, and a `$match`/`$skip`/`$limit`/`$count` pipeline.

use super::{
    CollectionInfo, CollectionStats, DatabaseInfo, DatabaseStats, DocumentStore, FindRequest,
    ServerInfo, StoreConnector, StoreError, StoreResult,
};
use crate::query::Document;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Collections = BTreeMap<String, Vec<Document>>;

#[derive(Default)]
pub struct MemoryStore {
    databases: Mutex<BTreeMap<String, Collections>>,
    calls: Mutex<Vec<String>>,
    latency: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, database: &str, collection: &str, documents: Vec<Value>) {
        let mut databases = self.databases.lock().unwrap();
        let target = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        for doc in documents {
            if let Value::Object(doc) = doc {
                target.push(doc);
            }
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Names of the operations issued so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    async fn record(&self, operation: &str) {
        self.calls.lock().unwrap().push(operation.to_string());
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn collection(&self, database: &str, collection: &str) -> Option<Vec<Document>> {
        self.databases
            .lock()
            .unwrap()
            .get(database)
            .and_then(|collections| collections.get(collection))
            .cloned()
    }

    fn matching(&self, database: &str, collection: &str, filter: &Document) -> StoreResult<Vec<Document>> {
        let documents = self.collection(database, collection).unwrap_or_default();
        let mut matched = Vec::new();
        for doc in documents {
            if matches_filter(&doc, filter)? {
                matched.push(doc);
            }
        }
        Ok(matched)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.record("ping").await;
        Ok(())
    }

    async fn find(&self, database: &str, request: &FindRequest) -> StoreResult<Vec<Document>> {
        self.record("find").await;
        let mut docs = self.matching(database, &request.collection, &request.filter)?;

        if let Some(sort) = &request.sort {
            docs.sort_by(|a, b| compare_by_spec(a, b, sort));
        }

        Ok(docs
            .into_iter()
            .skip(request.skip as usize)
            .take(request.limit.max(0) as usize)
            .map(|doc| project(doc, request.projection.as_ref()))
            .collect())
    }

    async fn count(&self, database: &str, collection: &str, filter: &Document) -> StoreResult<u64> {
        self.record("count").await;
        Ok(self.matching(database, collection, filter)?.len() as u64)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Document],
    ) -> StoreResult<Vec<Document>> {
        self.record("aggregate").await;
        let mut docs = self.collection(database, collection).unwrap_or_default();

        for stage in pipeline {
            let (name, spec) = stage
                .iter()
                .next()
                .ok_or_else(|| StoreError::Driver("A pipeline stage specification object must contain exactly one field.".to_string()))?;

            docs = match (name.as_str(), spec) {
                ("$match", Value::Object(filter)) => {
                    let mut kept = Vec::new();
                    for doc in docs {
                        if matches_filter(&doc, filter)? {
                            kept.push(doc);
                        }
                    }
                    kept
                }
                ("$limit", Value::Number(n)) => {
                    docs.into_iter().take(n.as_u64().unwrap_or(0) as usize).collect()
                }
                ("$skip", Value::Number(n)) => {
                    docs.into_iter().skip(n.as_u64().unwrap_or(0) as usize).collect()
                }
                ("$count", Value::String(field)) => {
                    let mut out = Document::new();
                    out.insert(field.clone(), json!(docs.len()));
                    vec![out]
                }
                (other, _) => {
                    return Err(StoreError::Driver(format!(
                        "Unrecognized pipeline stage name: '{}'",
                        other
                    )))
                }
            };
        }

        Ok(docs)
    }

    async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> StoreResult<Vec<Value>> {
        self.record("distinct").await;
        let mut values: Vec<Value> = Vec::new();
        for doc in self.matching(database, collection, filter)? {
            let candidates = match doc.get(field) {
                Some(Value::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for value in candidates {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    async fn list_collections(&self, database: &str) -> StoreResult<Vec<CollectionInfo>> {
        self.record("listCollections").await;
        let databases = self.databases.lock().unwrap();
        Ok(databases
            .get(database)
            .map(|collections| {
                collections
                    .keys()
                    .map(|name| CollectionInfo {
                        name: name.clone(),
                        kind: "collection".to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_databases(&self) -> StoreResult<Vec<DatabaseInfo>> {
        self.record("listDatabases").await;
        let databases = self.databases.lock().unwrap();
        Ok(databases
            .iter()
            .map(|(name, collections)| {
                let size: usize = collections.values().flatten().map(doc_size).sum();
                DatabaseInfo {
                    name: name.clone(),
                    size_on_disk: size as u64,
                    empty: size == 0,
                }
            })
            .collect())
    }

    async fn collection_stats(&self, database: &str, collection: &str) -> StoreResult<CollectionStats> {
        self.record("collStats").await;
        let docs = self
            .collection(database, collection)
            .ok_or_else(|| StoreError::Driver(format!("ns not found: {}.{}", database, collection)))?;
        let size: usize = docs.iter().map(doc_size).sum();
        let avg = if docs.is_empty() { 0.0 } else { size as f64 / docs.len() as f64 };
        Ok(CollectionStats {
            count: docs.len() as i64,
            size: size as i64,
            avg_obj_size: avg,
        })
    }

    async fn database_stats(&self, database: &str) -> StoreResult<DatabaseStats> {
        self.record("dbStats").await;
        let databases = self.databases.lock().unwrap();
        let collections = databases.get(database).cloned().unwrap_or_default();
        let size: usize = collections.values().flatten().map(doc_size).sum();
        Ok(DatabaseStats {
            collections: collections.len() as i64,
            data_size: size as i64,
            storage_size: size as i64,
            indexes: collections.len() as i64,
        })
    }

    async fn server_status(&self) -> StoreResult<ServerInfo> {
        self.record("serverStatus").await;
        Ok(ServerInfo {
            version: "7.0.0".to_string(),
            uptime: Some(3600.0),
            host: Some("memory:27017".to_string()),
        })
    }

    async fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
    }
}

/// Connector handing out a shared `MemoryStore`, counting attempts
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    pub attempts: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            attempts: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `n` connection attempts
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, AtomicOrdering::SeqCst);
        self
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        self.attempts.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Driver(
                "Server selection timeout: No available servers".to_string(),
            ));
        }

        Ok(self.store.clone())
    }
}

fn doc_size(doc: &Document) -> usize {
    serde_json::to_vec(doc).map(|bytes| bytes.len()).unwrap_or(0)
}

fn matches_filter(doc: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        if key.starts_with('$') {
            return Err(StoreError::Driver(format!("unknown top level operator: {}", key)));
        }
        let value = doc.get(key);

        let operators = match condition {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => ops,
            _ => {
                if value != Some(condition) {
                    return Ok(false);
                }
                continue;
            }
        };

        for (op, operand) in operators {
            let ok = match op.as_str() {
                "$eq" => value == Some(operand),
                "$ne" => value != Some(operand),
                "$gt" => compare(value, operand) == Some(Ordering::Greater),
                "$gte" => matches!(compare(value, operand), Some(Ordering::Greater | Ordering::Equal)),
                "$lt" => compare(value, operand) == Some(Ordering::Less),
                "$lte" => matches!(compare(value, operand), Some(Ordering::Less | Ordering::Equal)),
                "$in" => match operand {
                    Value::Array(options) => value.is_some_and(|v| options.contains(v)),
                    _ => return Err(StoreError::Driver("$in needs an array".to_string())),
                },
                other => return Err(StoreError::Driver(format!("unknown operator: {}", other))),
            };
            if !ok {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn compare(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (value?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_by_spec(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (key, direction) in sort {
        let descending = direction.as_i64() == Some(-1);
        let ordering = match (a.get(key), b.get(key)) {
            (Some(x), Some(y)) => compare(Some(x), y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn project(doc: Document, projection: Option<&Document>) -> Document {
    let Some(projection) = projection else {
        return doc;
    };

    let truthy = |v: &Value| !matches!(v, Value::Bool(false)) && v.as_i64() != Some(0);
    let inclusive = projection
        .iter()
        .any(|(key, v)| key != "_id" && truthy(v));
    let keep_id = projection.get("_id").map_or(true, truthy);

    doc.into_iter()
        .filter(|(key, _)| {
            if key == "_id" {
                return keep_id;
            }
            match projection.get(key) {
                Some(v) => truthy(v),
                None => !inclusive,
            }
        })
        .collect()
}
