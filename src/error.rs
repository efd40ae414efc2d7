//! Custom error types for docdb-mcp

use serde_json::{json, Value};
use thiserror::Error;

/// Main error type for docdb-mcp operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed {field}: {reason} (got: {raw})")]
    MalformedFragment {
        field: String,
        raw: String,
        reason: String,
    },

    #[error("Invalid arguments for {target}: {message}")]
    InvalidArguments { target: String, message: String },

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Unknown prompt: {0}")]
    UnknownPrompt(String),

    #[error("Invalid resource address '{address}': {reason}")]
    InvalidResourceAddress { address: String, reason: String },

    #[error("Cannot connect to {target}: {cause}")]
    ConnectionUnavailable { target: String, cause: String },

    #[error("{operation} failed: {message}")]
    StoreOperationFailed { operation: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Result type alias for docdb-mcp
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(field: impl Into<String>, raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedFragment {
            field: field.into(),
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_arguments(target: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidArguments {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::StoreOperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Stable label reported to callers in failure envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedFragment { .. } => "MalformedFragment",
            Error::InvalidArguments { .. } => "InvalidArguments",
            Error::UnknownOperation(_) => "UnknownOperation",
            Error::UnknownPrompt(_) => "UnknownPrompt",
            Error::InvalidResourceAddress { .. } => "InvalidResourceAddress",
            Error::ConnectionUnavailable { .. } => "ConnectionUnavailable",
            Error::StoreOperationFailed { .. } => "StoreOperationFailed",
            Error::Config(_) => "Config",
            Error::Io(_) | Error::Json(_) | Error::TomlParse(_) | Error::TomlSerialize(_) => {
                "Internal"
            }
        }
    }

    /// JSON-RPC error code used when the error ends a non-tool request
    pub fn rpc_code(&self) -> i32 {
        match self {
            Error::MalformedFragment { .. }
            | Error::InvalidArguments { .. }
            | Error::UnknownOperation(_)
            | Error::UnknownPrompt(_)
            | Error::InvalidResourceAddress { .. } => -32602,
            _ => -32603,
        }
    }

    /// Structured context attached to the failure envelope
    pub fn details(&self) -> Value {
        let mut details = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });

        let extra = match self {
            Error::MalformedFragment { field, raw, .. } => json!({ "field": field, "raw": raw }),
            Error::InvalidResourceAddress { address, .. } => json!({ "uri": address }),
            Error::ConnectionUnavailable { target, .. } => json!({ "connectionUri": target }),
            Error::StoreOperationFailed { operation, .. } => json!({ "storeOperation": operation }),
            _ => Value::Null,
        };

        if let (Some(map), Value::Object(extra)) = (details.as_object_mut(), extra) {
            map.extend(extra);
        }

        details
    }
}
