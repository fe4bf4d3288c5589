//! Wire-level data models: JSON-RPC envelopes and structured tool output.

mod content;
pub mod jsonrpc;

pub use content::{ContentBlock, ToolResponse};
pub use jsonrpc::{error_codes, JsonRpcRequest, JsonRpcResponse, RpcError, RpcId, JSONRPC_VERSION, SESSION_HEADER};
