//! HTTP transport for the MCP dispatcher.
//!
//! One endpoint serves three verbs:
//!
//! - `POST` carries a JSON-RPC request. The resolved session id is returned
//!   in the `Mcp-Session-Id` response header.
//! - `GET` reports server info, capabilities and session statistics.
//! - `DELETE` terminates the session named by the `Mcp-Session-Id` header.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::mcp::dispatcher::{ProtocolDispatcher, ServerInfo};
use crate::mcp::error::McpError;
use crate::mcp::session::{SessionStore, SessionTemplate};
use crate::models::{self, JsonRpcResponse};

const SESSION_HEADER: HeaderName = HeaderName::from_static(models::SESSION_HEADER);

/// The MCP server: a dispatcher over a session store, exposed over HTTP
#[derive(Debug, Clone)]
pub struct McpServer {
    dispatcher: ProtocolDispatcher,
    endpoint: String,
}

impl McpServer {
    /// Create a server whose sessions start from the builtin template
    pub fn new(config: &Config) -> Self {
        Self::with_template(config, SessionTemplate::builtin())
    }

    pub fn with_template(config: &Config, template: SessionTemplate) -> Self {
        let store = Arc::new(SessionStore::new(config.sessions.clone(), template));
        let info = ServerInfo {
            name: config.server.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let endpoint = if config.server.endpoint.starts_with('/') {
            config.server.endpoint.clone()
        } else {
            format!("/{}", config.server.endpoint)
        };

        Self {
            dispatcher: ProtocolDispatcher::with_server_info(store, info),
            endpoint,
        }
    }

    pub fn dispatcher(&self) -> &ProtocolDispatcher {
        &self.dispatcher
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.endpoint,
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .route("/health", get(health))
            .with_state(self.dispatcher.clone())
    }

    /// Serve on `addr` until Ctrl-C
    pub async fn run_http(&self, addr: &str) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        self.run_http_with_shutdown(addr, shutdown_signal()).await
    }

    /// Serve on `addr` until `shutdown` resolves.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    /// The session sweeper runs for as long as the server does.
    pub async fn run_http_with_shutdown<F>(
        &self,
        addr: &str,
        shutdown: F,
    ) -> std::io::Result<(SocketAddr, JoinHandle<()>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Starting MCP server on http://{}{}", local_addr, self.endpoint);

        let router = self.router();
        let sweeper = self.dispatcher.store().spawn_sweeper();

        let handle = tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("MCP server error: {}", e);
            }
            sweeper.shutdown().await;
            tracing::info!("MCP server stopped");
        });

        Ok((local_addr, handle))
    }
}

/// Create a server from configuration
pub fn create_mcp_server(config: &Config) -> McpServer {
    McpServer::new(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

fn session_id_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(&SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn request_metadata(headers: &HeaderMap, extensions: &Extensions) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    if let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        metadata.insert("user_agent".to_string(), agent.to_string());
    }
    if let Some(ConnectInfo(peer)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        metadata.insert("remote_addr".to_string(), peer.to_string());
    }
    metadata
}

fn rpc_response(status: StatusCode, session_id: Option<&str>, body: JsonRpcResponse) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn handle_post(
    State(dispatcher): State<ProtocolDispatcher>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> Response {
    let session_id = session_id_from(&headers);

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("Unparseable request body: {}", e);
            let err = McpError::Parse(e.to_string());
            return rpc_response(
                err.http_status(),
                session_id,
                JsonRpcResponse::failure(None, err.to_rpc_error()),
            );
        }
    };

    let metadata = request_metadata(&headers, &extensions);
    let requested = session_id.map(str::to_string);

    // Runs detached: a client that hangs up must not cancel the tool mid-call
    let task = {
        let requested = requested.clone();
        tokio::spawn(async move {
            dispatcher
                .process_request(raw, requested.as_deref(), metadata)
                .await
        })
    };

    match task.await {
        Ok(outcome) => {
            rpc_response(outcome.http_status(), outcome.session_id.as_deref(), outcome.response)
        }
        Err(e) => {
            tracing::error!("Request task failed: {}", e);
            let err = McpError::Internal(e.to_string());
            rpc_response(
                err.http_status(),
                requested.as_deref(),
                JsonRpcResponse::failure(None, err.to_rpc_error()),
            )
        }
    }
}

async fn handle_get(State(dispatcher): State<ProtocolDispatcher>) -> Json<Value> {
    Json(dispatcher.status().await)
}

async fn handle_delete(
    State(dispatcher): State<ProtocolDispatcher>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = session_id_from(&headers) else {
        let err = McpError::InvalidRequest("missing Mcp-Session-Id header".to_string());
        return rpc_response(
            err.http_status(),
            None,
            JsonRpcResponse::failure(None, err.to_rpc_error()),
        );
    };

    match dispatcher.terminate_session(session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "terminated": true, "sessionId": session_id })),
        )
            .into_response(),
        Err(err) => rpc_response(
            err.http_status(),
            None,
            JsonRpcResponse::failure(None, err.to_rpc_error()),
        ),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error_codes;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn server() -> McpServer {
        McpServer::new(&Config::default())
    }

    fn post(body: &str, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "router-test/1.0");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_sets_session_header() {
        let server = server();
        let response = server
            .router()
            .oneshot(post(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let sid = response.headers()[&SESSION_HEADER].to_str().unwrap().to_string();
        let body = body_json(response).await;
        assert_eq!(body["result"]["session"]["id"], sid.as_str());

        let session = server.dispatcher().store().get_session(&sid).await.unwrap();
        assert_eq!(session.metadata().await["user_agent"], "router-test/1.0");
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let response = server()
            .router()
            .oneshot(post("{not json", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(&SESSION_HEADER).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], error_codes::PARSE_ERROR);
        assert!(body["id"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_envelope_is_bad_request() {
        let response = server()
            .router()
            .oneshot(post(r#"{"jsonrpc":"2.0","id":3}"#, Some("abc")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[&SESSION_HEADER], "abc");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(body["id"], 3);
    }

    #[tokio::test]
    async fn test_unknown_header_gets_replacement_session() {
        let response = server()
            .router()
            .oneshot(post(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#, Some("stale-id")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_ne!(response.headers()[&SESSION_HEADER], "stale-id");
    }

    #[tokio::test]
    async fn test_get_reports_status() {
        let server = server();
        server.dispatcher().store().create_session().await;

        let response = server
            .router()
            .oneshot(Request::builder().uri("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sessions"]["total"], 1);
        assert_eq!(body["server"]["name"], "mcp-sessions");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let server = server();
        let session = server.dispatcher().store().create_session().await;
        let delete = |id: Option<String>| {
            let mut builder = Request::builder().method(Method::DELETE).uri("/mcp");
            if let Some(id) = id {
                builder = builder.header(SESSION_HEADER, id);
            }
            builder.body(Body::empty()).unwrap()
        };

        let response = server
            .router()
            .oneshot(delete(Some(session.id().to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["terminated"], true);

        let response = server
            .router()
            .oneshot(delete(Some(session.id().to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await["error"]["code"],
            error_codes::SESSION_NOT_FOUND
        );

        let response = server.router().oneshot(delete(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let response = server()
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_endpoint_is_normalized() {
        let mut config = Config::default();
        config.server.endpoint = "rpc".to_string();
        assert_eq!(McpServer::new(&config).endpoint(), "/rpc");
    }
}
