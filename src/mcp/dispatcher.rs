//! JSON-RPC request dispatch.
//!
//! [`ProtocolDispatcher::process_request`] validates an envelope, resolves
//! the session it belongs to, routes by method name and turns every outcome
//! (including a panicking handler) into a well-formed response. It never
//! returns an error to its caller.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{status_for_code, McpError};
use super::session::{Session, SessionInfo, SessionStore};
use super::tools::ToolMetadata;
use super::catalog::{Prompt, Resource};
use crate::models::{JsonRpcResponse, RpcId, JSONRPC_VERSION};

/// Protocol revision reported by `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Methods understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    ListTools,
    CallTool,
    ListResources,
    GetResource,
    ListPrompts,
    GetPrompt,
    Ping,
}

impl Method {
    /// Accepts both the camelCase names and the MCP slash names
    pub fn parse(name: &str) -> Option<Self> {
        let method = match name {
            "initialize" => Method::Initialize,
            "listTools" | "tools/list" => Method::ListTools,
            "callTool" | "tools/call" => Method::CallTool,
            "listResources" | "resources/list" => Method::ListResources,
            "getResource" | "resources/read" => Method::GetResource,
            "listPrompts" | "prompts/list" => Method::ListPrompts,
            "getPrompt" | "prompts/get" => Method::GetPrompt,
            "ping" => Method::Ping,
            _ => return None,
        };
        Some(method)
    }
}

/// Name and version reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A response together with the session it was resolved against
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub response: JsonRpcResponse,
    /// The authoritative session id. `None` only when the envelope was
    /// rejected before session resolution and the caller sent no id.
    pub session_id: Option<String>,
}

impl DispatchOutcome {
    pub fn http_status(&self) -> StatusCode {
        match &self.response.error {
            Some(error) => status_for_code(error.code),
            None => StatusCode::OK,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    #[serde(default)]
    protocol_version: Option<String>,
    #[serde(default)]
    client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct ClientInfo {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CallToolParams {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct GetResourceParams {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GetPromptParams {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "variables")]
    arguments: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct ListToolsResult {
    tools: Vec<ToolMetadata>,
}

#[derive(Debug, Serialize)]
struct ListResourcesResult {
    resources: Vec<Resource>,
}

#[derive(Debug, Serialize)]
struct ListPromptsResult {
    prompts: Vec<Prompt>,
}

/// Routes requests to handlers against per-session state
#[derive(Debug, Clone)]
pub struct ProtocolDispatcher {
    store: Arc<SessionStore>,
    server_info: ServerInfo,
}

impl ProtocolDispatcher {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self::with_server_info(store, ServerInfo::default())
    }

    pub fn with_server_info(store: Arc<SessionStore>, server_info: ServerInfo) -> Self {
        Self { store, server_info }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Handle one raw request body
    pub async fn process_request(
        &self,
        raw: Value,
        session_id: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> DispatchOutcome {
        let (id, method, params) = match validate_envelope(&raw) {
            Ok(parts) => parts,
            Err((id, err)) => {
                tracing::debug!(error = %err, "Rejected request envelope");
                return DispatchOutcome {
                    response: JsonRpcResponse::failure(id, err.to_rpc_error()),
                    session_id: session_id.map(str::to_string),
                };
            }
        };

        let (session_id, session) = self.store.get_or_create_session(session_id).await;
        session.merge_metadata(metadata).await;

        if !session.check_rate_limit() {
            tracing::warn!(session_id = %session_id, method = %method, "Rate limit exceeded");
            let err = McpError::RateLimited(session_id.clone());
            return DispatchOutcome {
                response: JsonRpcResponse::failure(Some(id), err.to_rpc_error()),
                session_id: Some(session_id),
            };
        }

        tracing::debug!(session_id = %session_id, method = %method, id = %id, "Dispatching request");

        let routed = AssertUnwindSafe(self.route(&method, &session, params))
            .catch_unwind()
            .await;

        let response = match routed {
            Ok(Ok(result)) => JsonRpcResponse::success(Some(id), result),
            Ok(Err(err)) => {
                tracing::debug!(session_id = %session_id, method = %method, error = %err, "Request failed");
                JsonRpcResponse::failure(Some(id), err.to_rpc_error())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(session_id = %session_id, method = %method, panic = %message, "Handler panicked");
                let err = McpError::Internal(message);
                JsonRpcResponse::failure(Some(id), err.to_rpc_error())
            }
        };

        DispatchOutcome {
            response,
            session_id: Some(session_id),
        }
    }

    /// Explicit termination; an unknown id is `SessionNotFound`
    pub async fn terminate_session(&self, session_id: &str) -> Result<(), McpError> {
        if self.store.delete_session(session_id).await {
            Ok(())
        } else {
            Err(McpError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Server identity, capabilities and session statistics. Read-only.
    pub async fn status(&self) -> Value {
        json!({
            "server": self.server_info,
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": capabilities(),
            "sessions": self.store.stats().await,
        })
    }

    async fn route(
        &self,
        method: &str,
        session: &Arc<Session>,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let Some(method) = Method::parse(method) else {
            return Err(McpError::MethodNotFound(method.to_string()));
        };

        match method {
            Method::Initialize => self.initialize(session, params).await,
            Method::ListTools => {
                let tools = session.tools().await.list();
                Ok(serde_json::to_value(ListToolsResult { tools })?)
            }
            Method::CallTool => call_tool(session, params).await,
            Method::ListResources => {
                let resources = session.resources().await.list();
                Ok(serde_json::to_value(ListResourcesResult { resources })?)
            }
            Method::GetResource => get_resource(session, params).await,
            Method::ListPrompts => {
                let prompts = session.prompts().await.list();
                Ok(serde_json::to_value(ListPromptsResult { prompts })?)
            }
            Method::GetPrompt => get_prompt(session, params).await,
            Method::Ping => Ok(json!({
                "pong": true,
                "timestamp": Utc::now().to_rfc3339(),
                "sessionId": session.id(),
                "echo": params,
            })),
        }
    }

    async fn initialize(&self, session: &Session, params: Option<Value>) -> Result<Value, McpError> {
        let params: InitializeParams = parse_params(params)?;

        let mut metadata = HashMap::new();
        if let Some(client) = params.client_info {
            metadata.insert("client_name".to_string(), client.name);
            if let Some(version) = client.version {
                metadata.insert("client_version".to_string(), version);
            }
        }
        if let Some(version) = params.protocol_version {
            metadata.insert("protocol_version".to_string(), version);
        }
        session.merge_metadata(metadata).await;

        tracing::info!(session_id = %session.id(), "Session initialized");

        let info: SessionInfo = session.info();
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": self.server_info,
            "capabilities": capabilities(),
            "session": info,
        }))
    }
}

fn capabilities() -> Value {
    json!({
        "tools": { "listChanged": false },
        "resources": { "subscribe": false, "listChanged": false },
        "prompts": { "listChanged": false },
    })
}

async fn call_tool(session: &Session, params: Option<Value>) -> Result<Value, McpError> {
    let params: CallToolParams = parse_params(params)?;
    let name = params
        .name
        .ok_or_else(|| McpError::InvalidParams("missing tool name".to_string()))?;

    let tool = session
        .tool(&name)
        .await
        .ok_or_else(|| McpError::ToolNotFound(name.clone()))?;

    tracing::debug!(session_id = %session.id(), tool = %name, "Calling tool");
    let response = tool.invoke(params.arguments).await?;
    Ok(serde_json::to_value(response)?)
}

async fn get_resource(session: &Session, params: Option<Value>) -> Result<Value, McpError> {
    let params: GetResourceParams = parse_params(params)?;
    let key = params
        .uri
        .or(params.name)
        .ok_or_else(|| McpError::InvalidParams("missing resource uri".to_string()))?;

    let resources = session.resources().await;
    let resource = resources
        .get(&key)
        .ok_or_else(|| McpError::ResourceNotFound(key.clone()))?;

    Ok(json!({
        "contents": [{
            "uri": resource.uri,
            "mimeType": resource.mime_type,
            "text": resource.text,
        }]
    }))
}

async fn get_prompt(session: &Session, params: Option<Value>) -> Result<Value, McpError> {
    let params: GetPromptParams = parse_params(params)?;
    let name = params
        .name
        .ok_or_else(|| McpError::InvalidParams("missing prompt name".to_string()))?;

    let prompts = session.prompts().await;
    let prompt = prompts
        .get(&name)
        .ok_or_else(|| McpError::PromptNotFound(name.clone()))?;

    let values: HashMap<String, String> = params
        .arguments
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect();

    let text = prompt
        .render(&values)
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;

    Ok(json!({
        "description": prompt.description,
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": text },
        }]
    }))
}

/// Structural checks. On failure, returns the request id if one could be read.
fn validate_envelope(raw: &Value) -> Result<(RpcId, String, Option<Value>), (Option<RpcId>, McpError)> {
    let Some(obj) = raw.as_object() else {
        return Err((None, McpError::InvalidRequest("request must be a JSON object".to_string())));
    };

    let id = obj.get("id").and_then(RpcId::from_value);

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err((id, McpError::InvalidRequest("jsonrpc must be \"2.0\"".to_string())));
    }

    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err((id, McpError::InvalidRequest("method must be a string".to_string())));
    };

    let Some(id) = id else {
        return Err((None, McpError::InvalidRequest("id must be a string or integer".to_string())));
    };

    let params = match obj.get("params") {
        None | Some(Value::Null) => None,
        Some(p) => Some(p.clone()),
    };

    Ok((id, method.to_string(), params))
}

fn parse_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T, McpError> {
    match params {
        None => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| McpError::InvalidParams(e.to_string()))
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
