//! MCP tool definitions and handlers

use super::types::{ToolDefinition, ToolResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::query::{
    effective_limit, effective_skip, parse_distinct_field, parse_filter, parse_pipeline,
    parse_projection, parse_sort,
};
use crate::store::{FindRequest, StoreGateway};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Get all available tool definitions
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "query".to_string(),
            description: "Execute a read query against a collection. Filter, projection and sort are JSON documents, passed as text or as objects.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Name of the collection to query"
                    },
                    "filter": {
                        "type": "string",
                        "description": "Query filter as JSON, e.g. {\"status\": \"active\"} (default: {})"
                    },
                    "projection": {
                        "type": "string",
                        "description": "Fields to include or exclude as JSON, e.g. {\"name\": 1}"
                    },
                    "sort": {
                        "type": "string",
                        "description": "Sort specification as JSON, e.g. {\"createdAt\": -1}"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of documents to return (default: 100)",
                        "minimum": 1
                    },
                    "skip": {
                        "type": "integer",
                        "description": "Number of documents to skip (default: 0)",
                        "minimum": 0
                    }
                },
                "required": ["collection"]
            }),
        },
        ToolDefinition {
            name: "count".to_string(),
            description: "Count the documents in a collection that match a filter.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Name of the collection"
                    },
                    "filter": {
                        "type": "string",
                        "description": "Query filter as JSON (default: {})"
                    }
                },
                "required": ["collection"]
            }),
        },
        ToolDefinition {
            name: "aggregate".to_string(),
            description: "Run an aggregation pipeline against a collection.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Name of the collection"
                    },
                    "pipeline": {
                        "type": "string",
                        "description": "Aggregation pipeline as a JSON array of stages, e.g. [{\"$match\": {}}, {\"$group\": {\"_id\": \"$status\"}}]"
                    }
                },
                "required": ["collection", "pipeline"]
            }),
        },
        ToolDefinition {
            name: "distinct".to_string(),
            description: "List the distinct values of a field across matching documents.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Name of the collection"
                    },
                    "field": {
                        "type": "string",
                        "description": "Field path to collect values from, e.g. \"address.city\""
                    },
                    "filter": {
                        "type": "string",
                        "description": "Query filter as JSON (default: {})"
                    }
                },
                "required": ["collection", "field"]
            }),
        },
        ToolDefinition {
            name: "listDatabases".to_string(),
            description: "List the databases on the server.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: "listCollections".to_string(),
            description: "List the collections in a database with basic statistics.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "database": {
                        "type": "string",
                        "description": "Database to inspect (default: the configured database)"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "verifyConnection".to_string(),
            description: "Check the database connection and report server and database statistics.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryArgs {
    pub collection: String,
    pub filter: Option<Value>,
    pub projection: Option<Value>,
    pub sort: Option<Value>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountArgs {
    pub collection: String,
    pub filter: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateArgs {
    pub collection: String,
    pub pipeline: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistinctArgs {
    pub collection: String,
    pub field: String,
    pub filter: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListCollectionsArgs {
    pub database: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

/// A decoded operation call; one variant per catalog entry
#[derive(Debug)]
pub enum OperationRequest {
    Query(QueryArgs),
    Count(CountArgs),
    Aggregate(AggregateArgs),
    Distinct(DistinctArgs),
    ListDatabases,
    ListCollections(ListCollectionsArgs),
    VerifyConnection,
}

impl OperationRequest {
    /// Decode an operation name and its argument bag
    pub fn decode(name: &str, arguments: &Map<String, Value>) -> Result<Self> {
        let request = match name {
            "query" => Self::Query(decode_args(name, arguments)?),
            "count" => Self::Count(decode_args(name, arguments)?),
            "aggregate" => Self::Aggregate(decode_args(name, arguments)?),
            "distinct" => Self::Distinct(decode_args(name, arguments)?),
            "listDatabases" => {
                decode_args::<NoArgs>(name, arguments)?;
                Self::ListDatabases
            }
            "listCollections" => Self::ListCollections(decode_args(name, arguments)?),
            "verifyConnection" => {
                decode_args::<NoArgs>(name, arguments)?;
                Self::VerifyConnection
            }
            other => return Err(Error::UnknownOperation(other.to_string())),
        };

        if let Some(collection) = request.collection() {
            if collection.trim().is_empty() {
                return Err(Error::invalid_arguments(name, "collection must not be empty"));
            }
        }

        Ok(request)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Count(_) => "count",
            Self::Aggregate(_) => "aggregate",
            Self::Distinct(_) => "distinct",
            Self::ListDatabases => "listDatabases",
            Self::ListCollections(_) => "listCollections",
            Self::VerifyConnection => "verifyConnection",
        }
    }

    fn collection(&self) -> Option<&str> {
        match self {
            Self::Query(args) => Some(&args.collection),
            Self::Count(args) => Some(&args.collection),
            Self::Aggregate(args) => Some(&args.collection),
            Self::Distinct(args) => Some(&args.collection),
            _ => None,
        }
    }
}

fn decode_args<T: DeserializeOwned>(operation: &str, arguments: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .map_err(|e| Error::invalid_arguments(operation, e.to_string()))
}

/// Handle a tool call; every outcome is rendered into a `ToolResult`
pub async fn handle_tool_call(
    name: &str,
    arguments: &Map<String, Value>,
    config: &Config,
    gateway: &StoreGateway,
) -> ToolResult {
    let request = match OperationRequest::decode(name, arguments) {
        Ok(request) => request,
        Err(e) => {
            debug!(operation = name, error = %e, "Rejected operation call");
            return ToolResult::failure(name, &e);
        }
    };

    if let Err(e) = gateway.ensure_connected().await {
        warn!(operation = name, error = %e, "Operation needs a connection that is unavailable");
        return ToolResult::failure(name, &e);
    }

    match execute(request, config, gateway).await {
        Ok(payload) => ToolResult::success(&payload),
        Err(e) => {
            warn!(operation = name, kind = e.kind(), error = %e, "Operation failed");
            ToolResult::failure(name, &e)
        }
    }
}

async fn execute(request: OperationRequest, config: &Config, gateway: &StoreGateway) -> Result<Value> {
    match request {
        OperationRequest::Query(args) => handle_query(args, config, gateway).await,
        OperationRequest::Count(args) => handle_count(args, gateway).await,
        OperationRequest::Aggregate(args) => handle_aggregate(args, gateway).await,
        OperationRequest::Distinct(args) => handle_distinct(args, gateway).await,
        OperationRequest::ListDatabases => handle_list_databases(config, gateway).await,
        OperationRequest::ListCollections(args) => handle_list_collections(args, gateway).await,
        OperationRequest::VerifyConnection => handle_verify_connection(config, gateway).await,
    }
}

async fn handle_query(args: QueryArgs, config: &Config, gateway: &StoreGateway) -> Result<Value> {
    let request = FindRequest {
        filter: parse_filter(args.filter.as_ref())?,
        projection: parse_projection(args.projection.as_ref())?,
        sort: parse_sort(args.sort.as_ref())?,
        skip: effective_skip(args.skip),
        limit: effective_limit(args.limit, config.query.default_limit),
        collection: args.collection,
    };

    let outcome = gateway.find(&request).await?;

    Ok(json!({
        "collection": request.collection,
        "count": outcome.count,
        "results": outcome.documents,
    }))
}

async fn handle_count(args: CountArgs, gateway: &StoreGateway) -> Result<Value> {
    let filter = parse_filter(args.filter.as_ref())?;
    let count = gateway.count(&args.collection, &filter).await?;

    Ok(json!({
        "collection": args.collection,
        "filter": filter,
        "count": count,
    }))
}

async fn handle_aggregate(args: AggregateArgs, gateway: &StoreGateway) -> Result<Value> {
    let pipeline = parse_pipeline(args.pipeline.as_ref())?;
    let results = gateway.aggregate(&args.collection, &pipeline).await?;

    Ok(json!({
        "collection": args.collection,
        "pipeline": pipeline,
        "results": results,
    }))
}

async fn handle_distinct(args: DistinctArgs, gateway: &StoreGateway) -> Result<Value> {
    let field = parse_distinct_field(&args.field)?;
    let filter = parse_filter(args.filter.as_ref())?;
    let values = gateway.distinct(&args.collection, &field, &filter).await?;

    Ok(json!({
        "collection": args.collection,
        "field": field,
        "count": values.len(),
        "distinctValues": values,
    }))
}

async fn handle_list_databases(config: &Config, gateway: &StoreGateway) -> Result<Value> {
    let databases = gateway.list_databases().await?;

    Ok(json!({
        "currentDatabase": gateway.database(),
        "connectionUri": config.redacted_uri(),
        "databases": databases,
    }))
}

async fn handle_list_collections(args: ListCollectionsArgs, gateway: &StoreGateway) -> Result<Value> {
    let database = args
        .database
        .filter(|db| !db.trim().is_empty())
        .unwrap_or_else(|| gateway.database().to_string());
    let collections = gateway.list_collections(Some(&database)).await?;

    let mut entries = Vec::with_capacity(collections.len());
    for info in &collections {
        let stats = if info.kind == "view" {
            None
        } else {
            match gateway.collection_stats(Some(&database), &info.name).await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    debug!(collection = %info.name, error = %e, "Collection stats unavailable");
                    None
                }
            }
        };

        entries.push(json!({
            "name": info.name,
            "type": info.kind,
            "count": stats.as_ref().map(|s| s.count),
            "size": stats.as_ref().map(|s| s.size),
            "avgObjSize": stats.as_ref().map(|s| s.avg_obj_size),
        }));
    }

    Ok(json!({
        "database": database,
        "totalCollections": entries.len(),
        "collections": entries,
    }))
}

async fn handle_verify_connection(config: &Config, gateway: &StoreGateway) -> Result<Value> {
    gateway.ping().await?;
    let server = gateway.server_status().await?;
    let stats = gateway.database_stats().await?;

    Ok(json!({
        "connected": true,
        "connectionUri": config.redacted_uri(),
        "currentDatabase": gateway.database(),
        "serverInfo": server,
        "databaseStats": stats,
        "checkedAt": Utc::now().to_rfc3339(),
    }))
}
