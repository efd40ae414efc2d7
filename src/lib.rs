//! docdb-mcp - An MCP server exposing a document database's read surface
//!
//! This crate provides:
//! - Decoding of JSON query fragments (filters, projections, sorts, pipelines)
//! - A lazily-connected, single-flight gateway to MongoDB
//! - Best-effort schema inference from sampled documents
//! - An MCP server over stdio with tools, collection resources and prompts

pub mod config;
pub mod error;
pub mod mcp;
pub mod query;
pub mod redact;
pub mod schema;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
