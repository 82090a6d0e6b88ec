pub mod analytics;
pub mod calculator;
pub mod config;
pub mod domain;
pub mod errors;
pub mod sql_guard;

pub use analytics::{
    AnalyticsStore, ColumnDescription, QueryRows, Row, SchemaDescription, StoreError,
    TableDescription,
};
pub use calculator::ExpressionError;
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::conversation::{AgentMode, Conversation, Message, Role, ToolCall, ToolResult};
pub use errors::{ApplicationError, InterfaceError};
pub use sql_guard::{SqlRejection, ValidatedSql};
