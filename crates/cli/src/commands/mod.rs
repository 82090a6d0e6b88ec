pub mod ask;
pub mod config;
pub mod migrate;
pub mod seed;

use datasage_core::config::{AppConfig, LoadOptions};
use datasage_db::{
    connect_from_config, connect_query_only, connect_sessions_from_config, migrations, DbPool,
};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::ok(command, message.into(), None)
    }

    pub fn success_with_details(
        command: &str,
        message: impl Into<String>,
        details: impl Serialize,
    ) -> Self {
        Self::ok(command, message.into(), serde_json::to_value(details).ok())
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn ok(command: &str, message: String, details: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message,
            details,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }
}

/// Exit codes shared by every command.
pub mod exit {
    pub const CONFIG: u8 = 2;
    pub const RUNTIME: u8 = 3;
    pub const DATABASE: u8 = 4;
    pub const MIGRATION: u8 = 5;
    pub const SEED: u8 = 6;
    pub const INVALID_REQUEST: u8 = 7;
    pub const RATE_LIMITED: u8 = 8;
    pub const UPSTREAM: u8 = 9;
    pub const DEADLINE: u8 = 10;
    pub const STORE: u8 = 11;
}

pub(crate) type Failure = (&'static str, String, u8);

/// Loads configuration and a current-thread runtime, or the failure to print.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            exit::CONFIG,
        )
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(
        |error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                exit::RUNTIME,
            )
        },
    )?;

    Ok((config, runtime))
}

pub(crate) async fn open_migrated(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_from_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), exit::DATABASE))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), exit::MIGRATION))?;
    Ok(pool)
}

pub(crate) async fn open_sessions_migrated(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_sessions_from_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), exit::DATABASE))?;
    migrations::run_session_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), exit::MIGRATION))?;
    Ok(pool)
}

/// Read-only view of a migrated analytics database for model-written queries.
pub(crate) async fn open_query_only(
    config: &AppConfig,
    writer: &DbPool,
) -> Result<DbPool, Failure> {
    connect_query_only(&config.database, writer)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), exit::DATABASE))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\
             \"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
