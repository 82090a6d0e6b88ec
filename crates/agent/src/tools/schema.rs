use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use datasage_core::analytics::AnalyticsStore;

use super::{Tool, ToolError, ToolOutput};

pub struct GetSchemaTool {
    store: Arc<dyn AnalyticsStore>,
}

impl GetSchemaTool {
    pub fn new(store: Arc<dyn AnalyticsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetSchemaTool {
    fn name(&self) -> &'static str {
        "GetSchema"
    }

    fn description(&self) -> &'static str {
        "Describe the database tables and their columns. Pass table_name to describe a single table."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_name": {
                    "type": "string",
                    "description": "Optional table to describe; omit for all tables."
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let table = arguments["table_name"].as_str().map(str::trim).filter(|name| !name.is_empty());
        let schema = self.store.describe_schema(table).await?;
        Ok(ToolOutput::text(schema.render()))
    }
}
