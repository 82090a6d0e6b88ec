//! Tool registry and dispatch.
//!
//! Every failure inside dispatch (unknown tool, bad arguments, validator
//! rejection, store error, even a panic) comes back as an error-flagged
//! [`ToolResult`]. Nothing a tool does can abort the reasoning loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use datasage_core::analytics::{AnalyticsStore, QueryRows, StoreError};
use datasage_core::calculator::ExpressionError;
use datasage_core::domain::conversation::{ToolCall, ToolResult};
use datasage_core::sql_guard::SqlRejection;

pub mod calculate;
pub mod date;
pub mod query;
pub mod schema;

pub use calculate::CalculateTool;
pub use date::GetCurrentDateTool;
pub use query::QueryDatabaseTool;
pub use schema::GetSchemaTool;

/// What the model sees in the tool catalog.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("rejected: {0}")]
    ValidationRejected(String),
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl From<SqlRejection> for ToolError {
    fn from(value: SqlRejection) -> Self {
        Self::ValidationRejected(value.to_string())
    }
}

impl From<ExpressionError> for ToolError {
    fn from(value: ExpressionError) -> Self {
        Self::ValidationRejected(value.to_string())
    }
}

impl From<StoreError> for ToolError {
    fn from(value: StoreError) -> Self {
        Self::ExecutionFailed(value.to_string())
    }
}

/// Side data a tool hands back to the loop alongside its text.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolArtifact {
    Query { sql: String, rows: QueryRows },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub artifact: Option<ToolArtifact>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), artifact: None }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dispatched {
    pub result: ToolResult,
    pub artifact: Option<ToolArtifact>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// The four analytics tools over one store.
    pub fn standard(store: Arc<dyn AnalyticsStore>, max_result_rows: usize) -> Self {
        let mut registry = Self::default();
        registry.register(QueryDatabaseTool::new(store.clone(), max_result_rows));
        registry.register(GetSchemaTool::new(store));
        registry.register(CalculateTool);
        registry.register(GetCurrentDateTool);
        registry
    }

    /// Catalog sorted by name so prompts are stable.
    pub fn catalog(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        specs.sort_by(|left, right| left.name.cmp(&right.name));
        specs
    }

    pub async fn dispatch(&self, call: &ToolCall) -> Dispatched {
        let started = Instant::now();
        let outcome = self.try_dispatch(call).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                info!(
                    event_name = "agent.tool.dispatched",
                    tool = %call.name,
                    tool_call_id = %call.id,
                    duration_ms,
                    is_error = false,
                    "tool executed"
                );
                Dispatched {
                    result: ToolResult::success(&call.id, output.content),
                    artifact: output.artifact,
                }
            }
            Err(error) => {
                warn!(
                    event_name = "agent.tool.dispatched",
                    tool = %call.name,
                    tool_call_id = %call.id,
                    duration_ms,
                    is_error = true,
                    error = %error,
                    "tool failed"
                );
                Dispatched {
                    result: ToolResult::failure(&call.id, format!("Error: {error}")),
                    artifact: None,
                }
            }
        }
    }

    async fn try_dispatch(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        validate_arguments(&tool.parameters(), &call.arguments)?;

        // A spawned task turns a panic into a JoinError. Dropping the dispatch
        // (request deadline) aborts the task and with it the tool's work.
        let arguments = call.arguments.clone();
        let task = tokio::spawn(async move { tool.execute(arguments).await });
        let _abort = AbortOnDrop(task.abort_handle());
        task.await
            .map_err(|error| ToolError::ExecutionFailed(format!("tool task aborted: {error}")))?
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Checks the subset of JSON schema the tools declare: an object with typed
/// properties, `required` keys and `additionalProperties: false`.
pub(crate) fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let object = arguments
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments("arguments must be a JSON object".into()))?;
    let properties = schema["properties"].as_object();

    if let Some(required) = schema["required"].as_array() {
        for key in required.iter().filter_map(Value::as_str) {
            if object.get(key).map_or(true, Value::is_null) {
                return Err(ToolError::InvalidArguments(format!("missing required field `{key}`")));
            }
        }
    }

    for (key, value) in object {
        let Some(property) = properties.and_then(|props| props.get(key)) else {
            if schema["additionalProperties"] == Value::Bool(false) {
                return Err(ToolError::InvalidArguments(format!("unexpected field `{key}`")));
            }
            continue;
        };

        if value.is_null() {
            continue;
        }

        let matches = match property["type"].as_str() {
            Some("string") => value.is_string(),
            Some("number") => value.is_number(),
            Some("integer") => value.is_i64() || value.is_u64(),
            Some("boolean") => value.is_boolean(),
            _ => true,
        };
        if !matches {
            return Err(ToolError::InvalidArguments(format!(
                "field `{key}` must be of type {}",
                property["type"].as_str().unwrap_or("unknown")
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use datasage_core::domain::conversation::ToolCall;

    use super::{validate_arguments, Tool, ToolError, ToolOutput, ToolRegistry};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "Echo"
        }

        fn description(&self) -> &'static str {
            "Echoes its input."
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
                "additionalProperties": false
            })
        }

        async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(arguments["text"].as_str().unwrap_or_default()))
        }
    }

    /// Parks until aborted and records whether its work was dropped.
    struct HangingTool {
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Tool for HangingTool {
        fn name(&self) -> &'static str {
            "Hang"
        }

        fn description(&self) -> &'static str {
            "Never finishes."
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _arguments: Value) -> Result<ToolOutput, ToolError> {
            let _flag = DropFlag(self.dropped.clone());
            std::future::pending::<()>().await;
            Ok(ToolOutput::text("unreachable"))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &'static str {
            "Explode"
        }

        fn description(&self) -> &'static str {
            "Always panics."
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _arguments: Value) -> Result<ToolOutput, ToolError> {
            panic!("tool blew up");
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall { id: "call_1".into(), name: name.into(), arguments }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        registry.register(EchoTool);
        registry.register(PanickingTool);
        registry
    }

    #[tokio::test]
    async fn dispatch_runs_registered_tool() {
        let dispatched = registry().dispatch(&call("Echo", json!({"text": "hello"}))).await;

        assert!(!dispatched.result.is_error);
        assert_eq!(dispatched.result.content, "hello");
        assert_eq!(dispatched.result.tool_call_id, "call_1");
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result() {
        let dispatched = registry().dispatch(&call("DropTables", json!({}))).await;

        assert!(dispatched.result.is_error);
        assert_eq!(dispatched.result.content, "Error: unknown tool `DropTables`");
    }

    #[tokio::test]
    async fn argument_shape_is_checked_before_execution() {
        let registry = registry();

        let missing = registry.dispatch(&call("Echo", json!({}))).await;
        assert!(missing.result.content.contains("missing required field `text`"));

        let wrong_type = registry.dispatch(&call("Echo", json!({"text": 3}))).await;
        assert!(wrong_type.result.content.contains("must be of type string"));

        let extra = registry.dispatch(&call("Echo", json!({"text": "a", "shell": "rm"}))).await;
        assert!(extra.result.content.contains("unexpected field `shell`"));

        let not_object = registry.dispatch(&call("Echo", json!("text"))).await;
        assert!(not_object.result.is_error);
    }

    #[tokio::test]
    async fn panicking_tool_is_contained() {
        let dispatched = registry().dispatch(&call("Explode", json!({}))).await;

        assert!(dispatched.result.is_error);
        assert!(dispatched.result.content.starts_with("Error: execution failed"));
    }

    #[tokio::test]
    async fn dropped_dispatch_aborts_the_running_tool() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::default();
        registry.register(HangingTool { dropped: dropped.clone() });

        let call = call("Hang", json!({}));
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), registry.dispatch(&call)).await;
        assert!(outcome.is_err());

        for _ in 0..50 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst), "tool work should be dropped with the request");
    }

    #[test]
    fn catalog_is_sorted() {
        let names: Vec<String> = registry().catalog().into_iter().map(|spec| spec.name).collect();
        assert_eq!(names, vec!["Echo".to_string(), "Explode".to_string()]);
    }

    #[test]
    fn optional_null_fields_are_accepted() {
        let schema = json!({
            "type": "object",
            "properties": {"table_name": {"type": "string"}},
        });
        assert_eq!(validate_arguments(&schema, &json!({"table_name": null})), Ok(()));
    }
}
