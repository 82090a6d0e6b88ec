use std::sync::Arc;

use datasage_agent::{AgentService, LlmError};
use datasage_core::analytics::AnalyticsStore;
use datasage_core::config::{AppConfig, ConfigError};
use datasage_db::{
    connect_from_config, connect_query_only, connect_sessions_from_config, migrations, DbPool,
    SessionStore, SqlAnalyticsStore, SqlSessionStore,
};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    /// Writable analytics pool: migrations, seeding and health checks.
    pub db_pool: DbPool,
    /// Read-only analytics pool behind the query tools.
    pub query_pool: DbPool,
    /// Chat history, a separate database the query tools cannot reach.
    pub sessions_pool: DbPool,
    pub service: Arc<AgentService>,
    pub store: Arc<dyn AnalyticsStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Application {
    pub fn api_state(&self) -> ApiState {
        ApiState {
            service: self.service.clone(),
            store: self.store.clone(),
            sessions: self.sessions.clone(),
            history_turns: self.config.agent.history_turns as usize,
        }
    }

    pub async fn shutdown(&self) {
        self.service.shutdown().await;
        self.query_pool.close().await;
        self.sessions_pool.close().await;
        self.db_pool.close().await;
        info!(
            event_name = "system.shutdown.completed",
            correlation_id = "shutdown",
            "resources released"
        );
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[source] LlmError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    let sessions_pool = connect_sessions_from_config(&config.database)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.sessions_connected",
        correlation_id = "bootstrap",
        "session database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    migrations::run_session_pending(&sessions_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let query_pool = connect_query_only(&config.database, &db_pool)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
    let store: Arc<dyn AnalyticsStore> = Arc::new(SqlAnalyticsStore::new(query_pool.clone()));
    let sessions: Arc<dyn SessionStore> = Arc::new(SqlSessionStore::new(sessions_pool.clone()));
    let service =
        Arc::new(AgentService::from_config(&config, store.clone()).map_err(BootstrapError::Llm)?);
    info!(
        event_name = "system.bootstrap.agent_ready",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        max_iterations = config.agent.max_iterations,
        cache_enabled = config.cache.enabled,
        "agent service initialized"
    );

    Ok(Application { config, db_pool, query_pool, sessions_pool, service, store, sessions })
}
