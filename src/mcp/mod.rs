//! MCP tool server (stdio transport via rmcp).
pub mod server;
pub mod tools;

pub use server::McpServer;
