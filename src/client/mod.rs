//! MCP client over HTTP.
//!
//! [`McpClient`] offers typed wrappers for each protocol method on top of
//! [`RequestTransport`], which owns retries and the session id.

mod error;
mod transport;

pub use error::ClientError;
pub use transport::{retry_config, HttpWire, RequestTransport, Wire, WireResponse};

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::mcp::catalog::{Prompt, Resource};
use crate::mcp::tools::ToolMetadata;
use crate::models::ToolResponse;

/// Typed client for the session-scoped protocol
#[derive(Debug)]
pub struct McpClient {
    transport: RequestTransport,
}

impl McpClient {
    /// HTTP client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::with_transport(RequestTransport::http(config)?))
    }

    pub fn with_transport(transport: RequestTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &RequestTransport {
        &self.transport
    }

    pub async fn session_id(&self) -> Option<String> {
        self.transport.session_id().await
    }

    /// Open (or resume) a session and report this client to the server
    pub async fn initialize(&self) -> Result<Value, ClientError> {
        self.transport
            .send_request(
                "initialize",
                Some(json!({
                    "protocolVersion": crate::mcp::PROTOCOL_VERSION,
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ClientError> {
        let result = self.transport.send_request("listTools", None).await?;
        field(result, "tools")
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResponse, ClientError> {
        let result = self
            .transport
            .send_request("callTool", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, ClientError> {
        let result = self.transport.send_request("listResources", None).await?;
        field(result, "resources")
    }

    pub async fn get_resource(&self, uri: &str) -> Result<Value, ClientError> {
        self.transport
            .send_request("getResource", Some(json!({ "uri": uri })))
            .await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, ClientError> {
        let result = self.transport.send_request("listPrompts", None).await?;
        field(result, "prompts")
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<Value, ClientError> {
        self.transport
            .send_request("getPrompt", Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    pub async fn ping(&self) -> Result<Value, ClientError> {
        self.transport.send_request("ping", None).await
    }

    /// Server info, capabilities and session statistics
    pub async fn server_status(&self) -> Result<Value, ClientError> {
        self.transport.server_status().await
    }

    /// End the current session. See [`RequestTransport::terminate`].
    pub async fn terminate(&self) -> bool {
        self.transport.terminate().await
    }
}

fn field<T: DeserializeOwned>(mut result: Value, name: &str) -> Result<T, ClientError> {
    let value = result
        .get_mut(name)
        .map(Value::take)
        .ok_or_else(|| ClientError::InvalidResponse(format!("missing `{}` in result", name)))?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_extraction() {
        let tools: Vec<ToolMetadata> =
            field(json!({"tools": [ToolMetadata::new("ping", "p")]}), "tools").unwrap();
        assert_eq!(tools[0].name, "ping");

        let missing: Result<Vec<ToolMetadata>, _> = field(json!({}), "tools");
        assert!(matches!(missing, Err(ClientError::InvalidResponse(_))));
    }

    #[test]
    fn test_invalid_endpoint() {
        let config = ClientConfig {
            endpoint: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(McpClient::new(&config), Err(ClientError::Request(_))));
    }
}
