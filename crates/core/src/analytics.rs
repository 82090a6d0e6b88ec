use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::sql_guard::ValidatedSql;

pub type Row = Map<String, Value>;

/// Stores stop counting result rows past this point.
pub const ROW_COUNT_LIMIT: usize = 10_000;

/// Rows returned by the analytics store, truncated to the caller's bound.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub rows: Vec<Row>,
    /// Rows the statement produced, counted up to [`ROW_COUNT_LIMIT`].
    pub total_rows: usize,
    /// Set when the statement had rows left after counting stopped.
    #[serde(default)]
    pub count_capped: bool,
}

impl QueryRows {
    pub fn truncated(&self) -> usize {
        self.total_rows.saturating_sub(self.rows.len())
    }

    /// The single cell of a one-row, one-column result, if that is its shape.
    pub fn scalar(&self) -> Option<&Value> {
        match self.rows.as_slice() {
            [row] if row.len() == 1 && self.total_rows == 1 && !self.count_capped => {
                row.values().next()
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableDescription>,
}

impl SchemaDescription {
    /// Text form handed to the model.
    pub fn render(&self) -> String {
        let mut output = String::new();
        for table in &self.tables {
            output.push_str(&format!("Table: {}\n", table.name));
            for column in &table.columns {
                output.push_str(&format!("  - {} ({})", column.name, column.data_type));
                if column.primary_key {
                    output.push_str(" PRIMARY KEY");
                }
                if !column.nullable && !column.primary_key {
                    output.push_str(" NOT NULL");
                }
                output.push('\n');
            }
            output.push('\n');
        }
        output.trim_end().to_string()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("unknown table `{0}`")]
    UnknownTable(String),
    #[error("could not decode column `{column}`: {message}")]
    Decode { column: String, message: String },
    #[error("data store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to the analytical dataset.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn execute(&self, sql: &ValidatedSql, max_rows: usize) -> Result<QueryRows, StoreError>;

    async fn describe_schema(&self, table: Option<&str>)
        -> Result<SchemaDescription, StoreError>;
}
