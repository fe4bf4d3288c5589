//! # mcp-sessions
//!
//! A session-scoped Model Context Protocol (MCP) JSON-RPC layer: an HTTP
//! server whose sessions each own their tools, resources and prompts, and a
//! client transport with timeouts, retries and session tracking.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: JSON-RPC envelopes, error codes and tool content blocks
//! - [`mcp`]: Session store, tool registry, protocol dispatcher and HTTP server
//! - [`client`]: Request transport and typed client
//! - [`utils`]: HTTP client and retry with backoff
//! - [`config`]: Configuration management

pub mod client;
pub mod config;
pub mod mcp;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use client::{ClientError, McpClient, RequestTransport};
pub use mcp::{McpError, McpServer, ProtocolDispatcher, SessionStore};
pub use models::{JsonRpcRequest, JsonRpcResponse, ToolResponse};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
