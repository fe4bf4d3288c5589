//! Builtin tools, resources and prompts seeded into every new session.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::catalog::{Prompt, Resource};
use super::session::SessionTemplate;
use super::tools::{parse_args, ToolDescriptor, ToolError, ToolHandler, ToolMetadata, ValidationError};
use crate::models::{ContentBlock, ToolResponse};

impl SessionTemplate {
    /// The default set every session starts with
    pub fn builtin() -> Self {
        let mut template = SessionTemplate::default();

        template.add_tool(ToolDescriptor::new(PingTool));
        template.add_tool(ToolDescriptor::new(EchoTool));
        template.add_tool(ToolDescriptor::new(CurrentTimeTool));
        template.add_tool(ToolDescriptor::new(SummarizeNumbersTool));

        template.add_resource(
            Resource::new(
                "server://info",
                "server-info",
                json!({
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                })
                .to_string(),
            )
            .description("Server name and version")
            .mime_type("application/json"),
        );

        template.add_prompt(
            Prompt::new(
                "summarize",
                "Summarize the following {{topic}} in {{style}} style, keeping the key figures.",
            )
            .description("Ask for a summary of a topic")
            .argument("topic", "What to summarize", true)
            .argument("style", "Tone of the summary", false),
        );

        template
    }
}

/// Liveness check that always answers the same way
#[derive(Debug)]
pub struct PingTool;

#[async_trait]
impl ToolHandler for PingTool {
    type Args = ();

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("ping", "Check that tool invocation works end to end")
            .title("Ping")
            .category("diagnostics")
    }

    fn validate(&self, _raw: Value) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn handle(&self, _args: ()) -> Result<ToolResponse, ToolError> {
        Ok(ToolResponse::text("pong"))
    }
}

#[derive(Debug, Deserialize)]
pub struct EchoArgs {
    pub message: String,
}

/// Returns its input
#[derive(Debug)]
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    type Args = EchoArgs;

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("echo", "Return the given message unchanged")
            .title("Echo")
            .category("diagnostics")
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Text to echo back"
                    }
                },
                "required": ["message"]
            }))
    }

    fn validate(&self, raw: Value) -> Result<EchoArgs, ValidationError> {
        parse_args(raw)
    }

    async fn handle(&self, args: EchoArgs) -> Result<ToolResponse, ToolError> {
        Ok(ToolResponse::text(args.message))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CurrentTimeArgs {
    /// Offset from UTC in minutes (e.g., 120 for UTC+2)
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

/// Reports the current date and time
#[derive(Debug)]
pub struct CurrentTimeTool;

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    type Args = FixedOffset;

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("current_time", "Get the current date and time, optionally at a UTC offset")
            .title("Current time")
            .category("datetime")
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "utc_offset_minutes": {
                        "type": "integer",
                        "description": "Offset from UTC in minutes",
                        "minimum": -1439,
                        "maximum": 1439,
                        "default": 0
                    }
                }
            }))
    }

    fn validate(&self, raw: Value) -> Result<FixedOffset, ValidationError> {
        let args: CurrentTimeArgs = parse_args(raw)?;
        let minutes = args.utc_offset_minutes.unwrap_or(0);
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ValidationError(format!("utc_offset_minutes out of range: {}", minutes)))
    }

    async fn handle(&self, offset: FixedOffset) -> Result<ToolResponse, ToolError> {
        let now = Utc::now().with_timezone(&offset);
        Ok(ToolResponse::text(now.to_rfc3339()).with_block(ContentBlock::json(json!({
            "iso": now.to_rfc3339(),
            "unix": now.timestamp(),
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "weekday": now.format("%A").to_string(),
        }))))
    }
}

#[derive(Debug, Deserialize)]
pub struct SummarizeArgs {
    pub values: Vec<f64>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Descriptive statistics for a list of numbers
#[derive(Debug)]
pub struct SummarizeNumbersTool;

#[async_trait]
impl ToolHandler for SummarizeNumbersTool {
    type Args = SummarizeArgs;

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("summarize_numbers", "Compute count, sum, mean, min, max and median")
            .title("Summarize numbers")
            .category("statistics")
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "values": {
                        "type": "array",
                        "items": { "type": "number" },
                        "description": "Numbers to summarize"
                    },
                    "label": {
                        "type": "string",
                        "description": "Name for the series in the text output"
                    }
                },
                "required": ["values"]
            }))
    }

    fn validate(&self, raw: Value) -> Result<SummarizeArgs, ValidationError> {
        parse_args(raw)
    }

    async fn handle(&self, args: SummarizeArgs) -> Result<ToolResponse, ToolError> {
        if args.values.is_empty() {
            return Ok(ToolResponse::error("values must contain at least one number"));
        }

        let mut sorted = args.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let mean = sum / count as f64;
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        let min = sorted[0];
        let max = sorted[count - 1];

        let label = args.label.as_deref().unwrap_or("values");
        Ok(ToolResponse::text(format!(
            "{}: n={} sum={} mean={:.4} median={} min={} max={}",
            label, count, sum, mean, median, min, max
        ))
        .with_block(ContentBlock::json(json!({
            "count": count,
            "sum": sum,
            "mean": mean,
            "median": median,
            "min": min,
            "max": max,
        }))))
    }
}
