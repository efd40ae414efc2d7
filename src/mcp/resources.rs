//! Collection resources
//!
//! Each collection of the configured database is exposed as
//! `<scheme>://<database>/<collection>`. Reading one returns its statistics,
//! a small sample, and a schema inferred from that sample.

use super::types::{Resource, ResourceContent, ResourceReadResult, ResourcesListResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema::infer_schema;
use crate::store::StoreGateway;
use serde_json::json;
use tracing::debug;

const RESOURCE_MIME_TYPE: &str = "application/json";

/// Parsed `<scheme>://<namespace>/<collection>` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    pub namespace: String,
    pub collection: String,
}

impl ResourceAddress {
    /// Parse an address, accepting only the configured scheme and namespace
    pub fn parse(uri: &str, scheme: &str, namespace: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidResourceAddress {
            address: uri.to_string(),
            reason,
        };

        let prefix = format!("{}://", scheme);
        let rest = uri
            .strip_prefix(&prefix)
            .ok_or_else(|| invalid(format!("expected a {} address", prefix)))?;

        let (found, collection) = rest
            .split_once('/')
            .ok_or_else(|| invalid("expected <namespace>/<collection>".to_string()))?;

        if found != namespace {
            return Err(invalid(format!(
                "namespace '{}' does not match the configured database '{}'",
                found, namespace
            )));
        }
        if collection.is_empty() {
            return Err(invalid("collection name is empty".to_string()));
        }

        Ok(Self {
            namespace: found.to_string(),
            collection: collection.to_string(),
        })
    }

    pub fn to_uri(&self, scheme: &str) -> String {
        format!("{}://{}/{}", scheme, self.namespace, self.collection)
    }
}

/// One resource per collection in the configured database
pub async fn list_resources(config: &Config, gateway: &StoreGateway) -> Result<ResourcesListResult> {
    gateway.ensure_connected().await?;
    let collections = gateway.list_collections(None).await?;

    let resources = collections
        .into_iter()
        .map(|info| {
            let address = ResourceAddress {
                namespace: gateway.database().to_string(),
                collection: info.name,
            };
            Resource {
                uri: address.to_uri(&config.resources.scheme),
                description: Some(format!(
                    "{} '{}' in database '{}'",
                    info.kind, address.collection, address.namespace
                )),
                name: address.collection,
                mime_type: Some(RESOURCE_MIME_TYPE.to_string()),
            }
        })
        .collect();

    Ok(ResourcesListResult { resources })
}

/// Describe one collection: stats, sample documents, inferred schema
pub async fn read_resource(config: &Config, gateway: &StoreGateway, uri: &str) -> Result<ResourceReadResult> {
    let address = ResourceAddress::parse(uri, &config.resources.scheme, gateway.database())?;
    gateway.ensure_connected().await?;

    let stats = gateway.collection_stats(None, &address.collection).await?;
    let sample = gateway
        .sample(&address.collection, config.resources.sample_size)
        .await?;
    let schema = infer_schema(&sample);
    debug!(
        collection = %address.collection,
        sampled = sample.len(),
        fields = schema.len(),
        "Inferred collection schema"
    );

    let body = json!({
        "collection": address.collection,
        "stats": stats,
        "schema": schema,
        "sampleDocuments": sample,
    });

    Ok(ResourceReadResult {
        contents: vec![ResourceContent {
            uri: uri.to_string(),
            mime_type: RESOURCE_MIME_TYPE.to_string(),
            text: serde_json::to_string_pretty(&body)?,
        }],
    })
}
