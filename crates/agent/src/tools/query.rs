use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use datasage_core::analytics::AnalyticsStore;
use datasage_core::sql_guard;

use super::{Tool, ToolArtifact, ToolError, ToolOutput};
use crate::format::render_rows;

/// Runs one validated `SELECT` against the analytics store.
pub struct QueryDatabaseTool {
    store: Arc<dyn AnalyticsStore>,
    max_rows: usize,
}

impl QueryDatabaseTool {
    pub fn new(store: Arc<dyn AnalyticsStore>, max_rows: usize) -> Self {
        Self { store, max_rows: max_rows.max(1) }
    }
}

#[async_trait]
impl Tool for QueryDatabaseTool {
    fn name(&self) -> &'static str {
        "QueryDatabase"
    }

    fn description(&self) -> &'static str {
        "Execute a single read-only SQL SELECT statement against the sales database and return \
         the matching rows. Use GetSchema first if you are unsure of table or column names."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SQLite SELECT statement."
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let raw = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("`query` must be a string".into()))?;

        let validated = sql_guard::validate(raw)?;
        let rows = self.store.execute(&validated, self.max_rows).await?;

        Ok(ToolOutput {
            content: render_rows(&rows),
            artifact: Some(ToolArtifact::Query { sql: raw.trim().to_string(), rows }),
        })
    }
}
