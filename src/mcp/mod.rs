//! MCP (Model Context Protocol) server implementation
//!
//! Exposes the document store's read surface over stdio: operations as
//! tools, collections as resources, and a few canned analysis prompts.

mod prompts;
mod resources;
mod server;
mod tools;
mod types;

pub use prompts::{get_prompt, list_prompts};
pub use resources::{list_resources, read_resource, ResourceAddress};
pub use server::McpServer;
pub use tools::{get_tool_definitions, handle_tool_call, OperationRequest};
pub use types::{McpError, McpRequest, McpResponse, ToolDefinition, ToolResult};
