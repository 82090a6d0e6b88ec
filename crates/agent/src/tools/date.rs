use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};
use serde_json::{json, Value};

use super::{Tool, ToolError, ToolOutput};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

pub struct GetCurrentDateTool;

#[async_trait]
impl Tool for GetCurrentDateTool {
    fn name(&self) -> &'static str {
        "GetCurrentDate"
    }

    fn description(&self) -> &'static str {
        "Return today's date. Useful for questions about recent periods such as 'last 30 days'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "description": "Optional strftime format, defaults to %Y-%m-%d."
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let format = arguments["format"].as_str().unwrap_or(DEFAULT_DATE_FORMAT);
        let rendered = render_date(&Local::now(), format)?;
        Ok(ToolOutput::text(format!("Current date: {rendered}")))
    }
}

/// Formats without panicking on malformed strftime input.
pub(crate) fn render_date<Tz>(now: &DateTime<Tz>, format: &str) -> Result<String, ToolError>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ToolError::InvalidArguments(format!("invalid date format `{format}`")));
    }

    let mut rendered = String::new();
    write!(rendered, "{}", now.format_with_items(items.into_iter()))
        .map_err(|_| ToolError::InvalidArguments(format!("invalid date format `{format}`")))?;
    Ok(rendered)
}
