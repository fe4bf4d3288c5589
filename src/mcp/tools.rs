//! Tool registry for MCP tools.
//!
//! A tool is a [`ToolHandler`]: it declares its metadata, turns raw JSON
//! arguments into its own typed input with [`ToolHandler::validate`], and
//! handles that input asynchronously. Registries store tools type-erased
//! behind a [`ToolDescriptor`] and are owned by exactly one session.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp::error::McpError;
use crate::models::ToolResponse;

/// Descriptive data about a tool, as listed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetadata {
    /// Tool name, unique within a registry (e.g., "current_time")
    pub name: String,

    /// Human-readable title
    pub title: String,

    /// What the tool does
    pub description: String,

    /// Category tag used for grouping in listings
    pub category: String,

    /// JSON Schema for input parameters
    pub input_schema: Value,

    /// Free-form extra metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            description: description.into(),
            category: "general".to_string(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            meta: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Raw arguments did not match a tool's declared input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Failure reported by a tool handler
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Execution(String),

    /// A failure with its own wire code
    #[error("{message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl From<ToolError> for McpError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Validation(v) => McpError::InvalidParams(v.0),
            ToolError::Execution(msg) => McpError::Internal(msg),
            ToolError::Rpc {
                code,
                message,
                data,
            } => McpError::Coded {
                code,
                message,
                data,
            },
        }
    }
}

/// Deserialize raw arguments into a typed input, for use in
/// [`ToolHandler::validate`] implementations
pub fn parse_args<T: DeserializeOwned>(raw: Value) -> Result<T, ValidationError> {
    serde_json::from_value(raw).map_err(|e| ValidationError(e.to_string()))
}

/// A tool that can be invoked through the protocol
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Validated input type
    type Args: Send + 'static;

    /// Name, description and input schema
    fn metadata(&self) -> ToolMetadata;

    /// Check raw arguments and produce the typed input
    fn validate(&self, raw: Value) -> Result<Self::Args, ValidationError>;

    /// Execute the tool
    async fn handle(&self, args: Self::Args) -> Result<ToolResponse, ToolError>;
}

#[async_trait]
trait ErasedTool: Send + Sync {
    async fn invoke(&self, raw: Value) -> Result<ToolResponse, ToolError>;
}

struct Typed<T>(T);

#[async_trait]
impl<T: ToolHandler> ErasedTool for Typed<T> {
    async fn invoke(&self, raw: Value) -> Result<ToolResponse, ToolError> {
        let args = self.0.validate(raw)?;
        self.0.handle(args).await
    }
}

/// A tool backed by a closure over raw JSON arguments
struct FnTool<F> {
    metadata: ToolMetadata,
    func: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResponse, ToolError>> + Send + 'static,
{
    type Args = Value;

    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }

    fn validate(&self, raw: Value) -> Result<Value, ValidationError> {
        if raw.is_object() {
            Ok(raw)
        } else {
            Err(ValidationError("arguments must be a JSON object".to_string()))
        }
    }

    async fn handle(&self, args: Value) -> Result<ToolResponse, ToolError> {
        (self.func)(args).await
    }
}

/// A registered tool: metadata plus a type-erased handler
#[derive(Clone)]
pub struct ToolDescriptor {
    metadata: ToolMetadata,
    tool: Arc<dyn ErasedTool>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.metadata.name)
            .field("category", &self.metadata.category)
            .finish()
    }
}

impl ToolDescriptor {
    /// Wrap a typed handler
    pub fn new<T: ToolHandler>(handler: T) -> Self {
        Self {
            metadata: handler.metadata(),
            tool: Arc::new(Typed(handler)),
        }
    }

    /// Build a tool from a closure taking the raw argument object
    pub fn from_fn<F, Fut>(metadata: ToolMetadata, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResponse, ToolError>> + Send + 'static,
    {
        Self::new(FnTool { metadata, func })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    /// Validate `raw` (an empty object when absent) and run the handler.
    /// The response is returned verbatim.
    pub async fn invoke(&self, raw: Option<Value>) -> Result<ToolResponse, ToolError> {
        let raw = match raw {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(v) => v,
        };
        self.tool.invoke(raw).await
    }
}

/// The tools available to one session
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool with the same name
    pub fn register(&mut self, tool: ToolDescriptor) -> Option<ToolDescriptor> {
        let previous = self.tools.insert(tool.name().to_string(), tool);
        if let Some(ref old) = previous {
            tracing::debug!(tool = %old.name(), "Replaced tool registration");
        }
        previous
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Metadata for every tool, ordered by name
    pub fn list(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|t| t.metadata.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
