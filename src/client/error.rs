use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::models::RpcError;
use crate::utils::{Retryable, TransientError};

/// Errors surfaced by the client transport
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response without a JSON-RPC body
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The server answered with a JSON-RPC error
    #[error("RPC error [{code}]: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request error: {0}")]
    Request(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// JSON-RPC error code, when the server sent one
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            ClientError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl Retryable for ClientError {
    fn transient(&self) -> Option<TransientError> {
        match self {
            ClientError::Timeout(_) => Some(TransientError::Timeout),
            ClientError::Network(_) => Some(TransientError::Network),
            ClientError::Http { status, .. } => TransientError::from_status(*status),
            ClientError::Rpc { .. }
            | ClientError::InvalidResponse(_)
            | ClientError::Request(_)
            | ClientError::Serialization(_) => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        ClientError::Timeout(after)
    }
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        match TransientError::from_reqwest_error(&e) {
            Some(TransientError::Timeout) => ClientError::Network(format!("timed out: {}", e)),
            Some(_) => ClientError::Network(e.to_string()),
            None if e.is_decode() => ClientError::InvalidResponse(e.to_string()),
            None => ClientError::Request(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error_codes;

    #[test]
    fn test_only_transport_failures_are_transient() {
        assert!(ClientError::Timeout(Duration::from_secs(1)).transient().is_some());
        assert!(ClientError::Network("reset".into()).transient().is_some());
        assert!(ClientError::Http { status: 503, body: String::new() }.transient().is_some());
        assert!(ClientError::Http { status: 404, body: String::new() }.transient().is_none());

        let rpc: ClientError = RpcError::new(error_codes::TOOL_NOT_FOUND, "no such tool").into();
        assert!(rpc.transient().is_none());
        assert_eq!(rpc.rpc_code(), Some(error_codes::TOOL_NOT_FOUND));
    }
}
