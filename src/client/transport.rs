//! Client-side request transport.
//!
//! [`RequestTransport`] frames JSON-RPC requests, retries transient failures
//! with exponential backoff and tracks the session id the server assigns.
//! The byte-level exchange sits behind the [`Wire`] trait; [`HttpWire`] is
//! the reqwest implementation.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use super::error::ClientError;
use crate::config::ClientConfig;
use crate::models::{JsonRpcRequest, JsonRpcResponse, RpcId, SESSION_HEADER};
use crate::utils::{with_retry, HttpClient, RetryConfig};

/// A raw response from the server
#[derive(Debug, Clone, Default)]
pub struct WireResponse {
    pub status: u16,
    /// Value of the session header, if the server sent one
    pub session_id: Option<String>,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One request/response exchange with the server
#[async_trait]
pub trait Wire: Send + Sync {
    /// Send a JSON-RPC request
    async fn post(
        &self,
        request: &JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<WireResponse, ClientError>;

    /// Ask the server to terminate a session
    async fn delete(&self, session_id: &str) -> Result<WireResponse, ClientError>;

    /// Fetch server status
    async fn get(&self) -> Result<WireResponse, ClientError>;
}

/// [`Wire`] over HTTP using reqwest
#[derive(Debug, Clone)]
pub struct HttpWire {
    http: HttpClient,
    endpoint: Url,
}

impl HttpWire {
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ClientError::Request(format!("invalid endpoint {}: {}", endpoint, e)))?;
        let http = HttpClient::new()?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn read(response: reqwest::Response) -> Result<WireResponse, ClientError> {
        let status = response.status().as_u16();
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(WireResponse {
            status,
            session_id,
            body,
        })
    }
}

#[async_trait]
impl Wire for HttpWire {
    async fn post(
        &self,
        request: &JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<WireResponse, ClientError> {
        let mut builder = self.http.client().post(self.endpoint.clone()).json(request);
        if let Some(id) = session_id {
            builder = builder.header(SESSION_HEADER, id);
        }
        Self::read(builder.send().await?).await
    }

    async fn delete(&self, session_id: &str) -> Result<WireResponse, ClientError> {
        let response = self
            .http
            .client()
            .delete(self.endpoint.clone())
            .header(SESSION_HEADER, session_id)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn get(&self) -> Result<WireResponse, ClientError> {
        let response = self.http.client().get(self.endpoint.clone()).send().await?;
        Self::read(response).await
    }
}

/// Derive retry settings from client configuration
pub fn retry_config(config: &ClientConfig) -> RetryConfig {
    RetryConfig::default()
        .max_attempts(config.max_retries)
        .initial_delay(config.initial_backoff())
        .attempt_timeout(config.timeout())
}

/// Sends requests with retries and session bookkeeping
pub struct RequestTransport {
    wire: Box<dyn Wire>,
    retry: RetryConfig,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
}

impl std::fmt::Debug for RequestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTransport")
            .field("retry", &self.retry)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl RequestTransport {
    pub fn new(wire: impl Wire + 'static, retry: RetryConfig) -> Self {
        Self {
            wire: Box::new(wire),
            retry,
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
        }
    }

    /// HTTP transport built from configuration
    pub fn http(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::new(HttpWire::new(&config.endpoint)?, retry_config(config)))
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// The session id last assigned by the server
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    /// Send `method` and return its result.
    ///
    /// Timeouts, network failures and non-JSON-RPC 5xx/429 responses are
    /// retried. JSON-RPC errors are returned as [`ClientError::Rpc`] without
    /// retrying.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        tracing::debug!(method = %method, id, "Sending request");
        with_retry(self.retry, || self.attempt(&request)).await
    }

    async fn attempt(&self, request: &JsonRpcRequest) -> Result<Value, ClientError> {
        let current = self.session_id().await;
        let response = self.wire.post(request, current.as_deref()).await?;

        if let Some(assigned) = response.session_id.as_deref().filter(|s| !s.is_empty()) {
            if current.as_deref() != Some(assigned) {
                match &current {
                    Some(old) => tracing::info!(old = %old, new = %assigned, "Server replaced session"),
                    None => tracing::debug!(session_id = %assigned, "Server assigned session"),
                }
                *self.session_id.lock().await = Some(assigned.to_string());
            }
        }

        interpret(&request.id, response)
    }

    /// Fetch the server's status document
    pub async fn server_status(&self) -> Result<Value, ClientError> {
        let limit = self.retry.attempt_timeout.unwrap_or(Duration::from_secs(30));
        let response = tokio::time::timeout(limit, self.wire.get())
            .await
            .map_err(|_| ClientError::Timeout(limit))??;
        if !response.is_success() {
            return Err(ClientError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Terminate the current session, if any.
    ///
    /// Best effort: failures are logged, and the local session id is cleared
    /// either way. Returns whether the server confirmed termination.
    pub async fn terminate(&self) -> bool {
        let Some(session_id) = self.session_id.lock().await.take() else {
            return false;
        };

        let limit = self.retry.attempt_timeout.unwrap_or(Duration::from_secs(30));
        match tokio::time::timeout(limit, self.wire.delete(&session_id)).await {
            Ok(Ok(response)) if response.is_success() => {
                tracing::debug!(session_id = %session_id, "Session terminated");
                true
            }
            Ok(Ok(response)) => {
                tracing::warn!(session_id = %session_id, status = response.status, "Server refused session termination");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, "Session termination failed: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!(session_id = %session_id, "Session termination timed out after {:?}", limit);
                false
            }
        }
    }
}

/// Turn a raw response into a result or classified error
fn interpret(expected: &RpcId, response: WireResponse) -> Result<Value, ClientError> {
    let envelope: JsonRpcResponse = match serde_json::from_slice(&response.body) {
        Ok(envelope) => envelope,
        Err(e) if response.is_success() => {
            return Err(ClientError::InvalidResponse(format!("not a JSON-RPC response: {}", e)));
        }
        Err(_) => {
            return Err(ClientError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
    };

    if let Some(error) = envelope.error {
        return Err(error.into());
    }

    if let Some(id) = &envelope.id {
        if id != expected {
            return Err(ClientError::InvalidResponse(format!(
                "response id {} does not match request id {}",
                id, expected
            )));
        }
    }

    Ok(envelope.result.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{error_codes, RpcError};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::time::Instant;

    type Scripted = Result<WireResponse, ClientError>;

    #[derive(Default)]
    struct Script {
        replies: std::sync::Mutex<VecDeque<Scripted>>,
        /// (time since start, session header sent)
        calls: std::sync::Mutex<Vec<(Duration, Option<String>)>>,
        deletes: std::sync::Mutex<Vec<String>>,
    }

    #[derive(Clone)]
    struct FakeWire {
        script: Arc<Script>,
        started: Instant,
    }

    impl FakeWire {
        fn new(replies: Vec<Scripted>) -> (Self, Arc<Script>) {
            let script = Arc::new(Script {
                replies: std::sync::Mutex::new(replies.into()),
                ..Script::default()
            });
            (
                Self {
                    script: script.clone(),
                    started: Instant::now(),
                },
                script,
            )
        }
    }

    #[async_trait]
    impl Wire for FakeWire {
        async fn post(
            &self,
            _request: &JsonRpcRequest,
            session_id: Option<&str>,
        ) -> Result<WireResponse, ClientError> {
            self.script
                .calls
                .lock()
                .unwrap()
                .push((self.started.elapsed(), session_id.map(str::to_string)));
            let next = self.script.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(response)) if response.status == 0 => {
                    // Never answers; exercises the per-attempt timeout
                    std::future::pending::<()>().await;
                    Ok(response)
                }
                Some(reply) => reply,
                None => Err(ClientError::Network("script exhausted".to_string())),
            }
        }

        async fn delete(&self, session_id: &str) -> Result<WireResponse, ClientError> {
            self.script.deletes.lock().unwrap().push(session_id.to_string());
            Ok(WireResponse {
                status: 200,
                session_id: None,
                body: br#"{"terminated":true}"#.to_vec(),
            })
        }

        async fn get(&self) -> Result<WireResponse, ClientError> {
            Ok(WireResponse {
                status: 200,
                session_id: None,
                body: br#"{"sessions":{"total":0}}"#.to_vec(),
            })
        }
    }

    fn ok(id: i64, session: &str, result: Value) -> Scripted {
        let body = serde_json::to_vec(&JsonRpcResponse::success(Some(RpcId::Number(id)), result)).unwrap();
        Ok(WireResponse {
            status: 200,
            session_id: Some(session.to_string()),
            body,
        })
    }

    fn rpc_error(id: i64, session: &str, code: i64) -> Scripted {
        let body = serde_json::to_vec(&JsonRpcResponse::failure(
            Some(RpcId::Number(id)),
            RpcError::new(code, "failed"),
        ))
        .unwrap();
        Ok(WireResponse {
            status: 200,
            session_id: Some(session.to_string()),
            body,
        })
    }

    fn hang() -> Scripted {
        Ok(WireResponse::default())
    }

    fn transport(wire: FakeWire) -> RequestTransport {
        RequestTransport::new(wire, retry_config(&ClientConfig::default()))
    }

    fn times(script: &Script) -> Vec<Duration> {
        script.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_with_backoff() {
        let (wire, script) = FakeWire::new(vec![hang(), hang(), hang()]);
        let transport = transport(wire);

        let err = transport.send_request("ping", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_secs(30)));

        // 30s timeout, 2s backoff, 30s timeout, 4s backoff
        assert_eq!(
            times(&script),
            vec![Duration::ZERO, Duration::from_secs(32), Duration::from_secs(66)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failures_then_success() {
        let (wire, script) = FakeWire::new(vec![
            Err(ClientError::Network("connection refused".into())),
            Err(ClientError::Network("connection reset".into())),
            ok(1, "s1", json!({"pong": true})),
        ]);
        let transport = transport(wire);

        let result = transport.send_request("ping", None).await.unwrap();
        assert_eq!(result["pong"], true);
        assert_eq!(
            times(&script),
            vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(6)]
        );
        assert_eq!(transport.session_id().await.as_deref(), Some("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_errors_are_not_retried() {
        let (wire, script) = FakeWire::new(vec![rpc_error(1, "s1", error_codes::TOOL_NOT_FOUND)]);
        let transport = transport(wire);

        let err = transport.send_request("callTool", Some(json!({"name": "x"}))).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(error_codes::TOOL_NOT_FOUND));
        assert_eq!(script.calls.lock().unwrap().len(), 1);
        // The header is still honored on error responses
        assert_eq!(transport.session_id().await.as_deref(), Some("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_server_errors_are_retried_but_envelopes_are_not() {
        let plain_503 = Ok(WireResponse {
            status: 503,
            session_id: None,
            body: b"upstream unavailable".to_vec(),
        });
        let enveloped_500 = Ok(WireResponse {
            status: 500,
            session_id: Some("s1".to_string()),
            body: serde_json::to_vec(&JsonRpcResponse::failure(
                Some(RpcId::Number(1)),
                RpcError::new(error_codes::INTERNAL_ERROR, "handler panicked"),
            ))
            .unwrap(),
        });
        let (wire, script) = FakeWire::new(vec![plain_503, enveloped_500]);
        let transport = transport(wire);

        let err = transport.send_request("callTool", None).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(error_codes::INTERNAL_ERROR));
        assert_eq!(script.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_session_header_is_adopted_and_replaced() {
        let (wire, script) = FakeWire::new(vec![
            ok(1, "s1", json!({})),
            ok(2, "s1", json!({})),
            ok(3, "s2", json!({})),
            ok(4, "s2", json!({})),
        ]);
        let transport = transport(wire);

        for _ in 0..4 {
            transport.send_request("listTools", None).await.unwrap();
        }

        let sent: Vec<Option<String>> = script
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        assert_eq!(
            sent,
            vec![None, Some("s1".into()), Some("s1".into()), Some("s2".into())]
        );
        assert_eq!(transport.session_id().await.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_mismatched_response_id_is_rejected() {
        let (wire, _script) = FakeWire::new(vec![ok(99, "s1", json!({}))]);
        let transport = transport(wire);
        let err = transport.send_request("ping", None).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_terminate_clears_session() {
        let (wire, script) = FakeWire::new(vec![ok(1, "s1", json!({}))]);
        let transport = transport(wire);

        assert!(!transport.terminate().await);
        transport.send_request("initialize", None).await.unwrap();
        assert!(transport.terminate().await);
        assert!(transport.session_id().await.is_none());
        assert_eq!(*script.deletes.lock().unwrap(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_server_status() {
        let (wire, _script) = FakeWire::new(vec![]);
        let status = transport(wire).server_status().await.unwrap();
        assert_eq!(status["sessions"]["total"], 0);
    }
}
