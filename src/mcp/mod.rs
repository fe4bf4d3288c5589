//! MCP (Model Context Protocol) implementation.
//!
//! Sessions own their tool, resource and prompt registries; the dispatcher
//! routes JSON-RPC requests against them and the server exposes the
//! dispatcher over HTTP.

mod builtin;
pub mod catalog;
pub mod dispatcher;
pub mod error;
pub mod server;
pub mod session;
pub mod tools;

pub use builtin::{CurrentTimeTool, EchoTool, PingTool, SummarizeNumbersTool};
pub use catalog::{Prompt, PromptArgument, PromptRegistry, Resource, ResourceRegistry};
pub use dispatcher::{DispatchOutcome, Method, ProtocolDispatcher, ServerInfo, PROTOCOL_VERSION};
pub use error::McpError;
pub use server::{create_mcp_server, McpServer};
pub use session::{Session, SessionInfo, SessionStats, SessionStore, SessionTemplate, SweeperHandle};
pub use tools::{
    parse_args, ToolDescriptor, ToolError, ToolHandler, ToolMetadata, ToolRegistry,
    ValidationError,
};
