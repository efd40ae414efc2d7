//! Query fragment decoding
//!
//! Filters, projections, sort specs and pipelines arrive from callers as JSON
//! text (or, leniently, as already-structured JSON). Every fragment is decoded
//! and shape-checked here before anything is handed to the store.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// A JSON document as exchanged with the store
pub type Document = Map<String, Value>;

/// Kinds of query fragment a caller can supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Filter,
    Projection,
    Sort,
    Pipeline,
    DistinctField,
}

impl FragmentKind {
    /// Argument name the fragment is read from
    pub fn field_name(&self) -> &'static str {
        match self {
            FragmentKind::Filter => "filter",
            FragmentKind::Projection => "projection",
            FragmentKind::Sort => "sort",
            FragmentKind::Pipeline => "pipeline",
            FragmentKind::DistinctField => "field",
        }
    }
}

/// Decode a filter; absent means "match everything".
pub fn parse_filter(raw: Option<&Value>) -> Result<Document> {
    match raw {
        None => Ok(Document::new()),
        Some(value) => decode_object(FragmentKind::Filter, value),
    }
}

/// Decode a projection; absent means "return whole documents".
pub fn parse_projection(raw: Option<&Value>) -> Result<Option<Document>> {
    raw.map(|value| decode_object(FragmentKind::Projection, value))
        .transpose()
}

/// Decode a sort spec; absent means store-native order.
pub fn parse_sort(raw: Option<&Value>) -> Result<Option<Document>> {
    raw.map(|value| decode_object(FragmentKind::Sort, value))
        .transpose()
}

/// Decode an aggregation pipeline. The pipeline is required.
pub fn parse_pipeline(raw: Option<&Value>) -> Result<Vec<Document>> {
    let value = raw.ok_or_else(|| {
        Error::invalid_arguments("aggregate", "missing required field `pipeline`")
    })?;
    let kind = FragmentKind::Pipeline;

    let stages = match decode_text(kind, value)? {
        Value::Array(stages) => stages,
        other => {
            return Err(malformed(
                kind,
                value,
                format!("expected an array of stages, found {}", json_type_name(&other)),
            ))
        }
    };

    stages
        .into_iter()
        .enumerate()
        .map(|(idx, stage)| match stage {
            Value::Object(stage) => Ok(stage),
            other => Err(malformed(
                kind,
                value,
                format!("stage {} must be an object, found {}", idx, json_type_name(&other)),
            )),
        })
        .collect()
}

/// Validate the field name passed to `distinct`.
pub fn parse_distinct_field(raw: &str) -> Result<String> {
    let field = raw.trim();
    let kind = FragmentKind::DistinctField;

    if field.is_empty() {
        return Err(Error::malformed(kind.field_name(), raw, "field name must not be empty"));
    }
    if field.starts_with('$') {
        return Err(Error::malformed(
            kind.field_name(),
            raw,
            "field name must not start with '$'",
        ));
    }

    Ok(field.to_string())
}

/// Resolve the effective limit: absent or non-positive falls back to the default.
pub fn effective_limit(requested: Option<i64>, default_limit: i64) -> i64 {
    match requested {
        Some(limit) if limit > 0 => limit,
        _ => default_limit,
    }
}

/// Resolve the effective skip: absent or negative means zero.
pub fn effective_skip(requested: Option<i64>) -> u64 {
    requested.filter(|skip| *skip > 0).map_or(0, |skip| skip as u64)
}

fn decode_object(kind: FragmentKind, raw: &Value) -> Result<Document> {
    match decode_text(kind, raw)? {
        Value::Object(doc) => Ok(doc),
        other => Err(malformed(
            kind,
            raw,
            format!("expected a JSON object, found {}", json_type_name(&other)),
        )),
    }
}

/// Turn a text fragment into JSON; structured values pass through untouched.
fn decode_text(kind: FragmentKind, raw: &Value) -> Result<Value> {
    match raw {
        Value::String(text) => serde_json::from_str(text)
            .map_err(|e| Error::malformed(kind.field_name(), text.as_str(), e.to_string())),
        Value::Object(_) | Value::Array(_) => Ok(raw.clone()),
        other => Err(malformed(
            kind,
            raw,
            format!("expected JSON text, found {}", json_type_name(other)),
        )),
    }
}

fn malformed(kind: FragmentKind, raw: &Value, reason: String) -> Error {
    let raw = match raw {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    Error::malformed(kind.field_name(), raw, reason)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
