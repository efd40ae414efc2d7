//! Default values for configuration

/// Default MongoDB connection string for local development
pub fn default_connection_uri() -> String {
    std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
}

/// Default database (namespace) to operate against
pub fn default_database_name() -> String {
    std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "test".to_string())
}

/// Default connect timeout in milliseconds
pub fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Default server selection timeout in milliseconds
pub fn default_server_selection_timeout_ms() -> u64 {
    5_000
}

/// Default application name reported to the server
pub fn default_app_name() -> String {
    format!("docdb-mcp/{}", env!("CARGO_PKG_VERSION"))
}

/// Default number of documents returned by `query`
pub fn default_query_limit() -> i64 {
    100
}

/// Default URI scheme for collection resources
pub fn default_resource_scheme() -> String {
    "mongodb".to_string()
}

/// Default number of documents sampled for schema inference
pub fn default_sample_size() -> usize {
    5
}

/// Upper bound on the schema sample
pub const MAX_SAMPLE_SIZE: usize = 5;
