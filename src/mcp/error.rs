//! Error types for the server side of the protocol.

use http::StatusCode;
use serde_json::Value;

use crate::models::{error_codes, RpcError};

/// Errors raised while handling a JSON-RPC request.
///
/// Every variant maps onto a wire code; none of them invalidate the session
/// the request resolved to.
#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded for session {0}")]
    RateLimited(String),

    /// A failure carrying its own wire code, usually raised by a tool
    #[error("{message}")]
    Coded {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// The wire code for this error
    pub fn code(&self) -> i64 {
        match self {
            McpError::Parse(_) => error_codes::PARSE_ERROR,
            McpError::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            McpError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            McpError::ToolNotFound(_) => error_codes::TOOL_NOT_FOUND,
            McpError::ResourceNotFound(_) | McpError::PromptNotFound(_) => {
                error_codes::RESOURCE_NOT_FOUND
            }
            McpError::SessionNotFound(_) => error_codes::SESSION_NOT_FOUND,
            McpError::Unauthorized(_) => error_codes::UNAUTHORIZED,
            McpError::RateLimited(_) => error_codes::RATE_LIMITED,
            McpError::Coded { code, .. } => *code,
            McpError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Convert to the error member of a response
    pub fn to_rpc_error(&self) -> RpcError {
        let error = RpcError::new(self.code(), self.to_string());
        match self {
            McpError::Coded {
                data: Some(data), ..
            } => error.with_data(data.clone()),
            _ => error,
        }
    }

    /// HTTP status for a response carrying this error.
    ///
    /// Envelope-level failures are 400 and unhandled failures are 500.
    /// Everything else is a completed exchange and stays 200 so the
    /// JSON-RPC error member remains the primary signal.
    pub fn http_status(&self) -> StatusCode {
        status_for_code(self.code())
    }
}

/// HTTP status for a response whose error member has the given code
pub fn status_for_code(code: i64) -> StatusCode {
    match code {
        error_codes::PARSE_ERROR | error_codes::INVALID_REQUEST => StatusCode::BAD_REQUEST,
        error_codes::INTERNAL_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
        error_codes::SESSION_NOT_FOUND => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::Internal(format!("serialization failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_wire_table() {
        assert_eq!(McpError::Parse("x".into()).code(), -32700);
        assert_eq!(McpError::InvalidRequest("x".into()).code(), -32600);
        assert_eq!(McpError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(McpError::InvalidParams("x".into()).code(), -32602);
        assert_eq!(McpError::Internal("x".into()).code(), -32603);
        assert_eq!(McpError::ToolNotFound("x".into()).code(), -32001);
        assert_eq!(McpError::ResourceNotFound("x".into()).code(), -32002);
        assert_eq!(McpError::SessionNotFound("x".into()).code(), -32003);
        assert_eq!(McpError::Unauthorized("x".into()).code(), -32004);
        assert_eq!(McpError::RateLimited("x".into()).code(), -32005);
    }

    #[test]
    fn test_http_status_policy() {
        assert_eq!(
            McpError::InvalidRequest("x".into()).http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            McpError::Parse("x".into()).http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            McpError::ToolNotFound("x".into()).http_status(),
            StatusCode::OK
        );
        assert_eq!(
            McpError::InvalidParams("x".into()).http_status(),
            StatusCode::OK
        );
        assert_eq!(
            McpError::Internal("x".into()).http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_coded_error_keeps_code_and_data() {
        let err = McpError::Coded {
            code: -32050,
            message: "upstream unavailable".to_string(),
            data: Some(serde_json::json!({"service": "geocoding"})),
        };
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32050);
        assert_eq!(rpc.message, "upstream unavailable");
        assert_eq!(rpc.data.unwrap()["service"], "geocoding");
    }
}
