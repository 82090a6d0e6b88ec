use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use datasage_agent::AgentService;
use datasage_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    service: Arc<AgentService>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub dataset: HealthCheck,
    pub agent: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, service: Arc<AgentService>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, service })
}

/// Only the database gates readiness; an empty dataset is reported but still
/// serves schema and session routes.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let dataset = if ready {
        dataset_check(&state.db_pool).await
    } else {
        HealthCheck { status: "unknown", detail: "database unreachable".to_string() }
    };
    let agent = agent_check(&state.service).await;

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        dataset,
        agent,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn dataset_check(pool: &DbPool) -> HealthCheck {
    let counts = sqlx::query_as::<_, (i64, i64)>(
        "SELECT (SELECT COUNT(*) FROM products), (SELECT COUNT(*) FROM sales)",
    )
    .fetch_one(pool)
    .await;

    match counts {
        Ok((0, _)) => HealthCheck {
            status: "empty",
            detail: "no products loaded; run `datasage seed`".to_string(),
        },
        Ok((products, sales)) => HealthCheck {
            status: "ready",
            detail: format!("{products} products, {sales} sales"),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("dataset query failed: {error}") }
        }
    }
}

async fn agent_check(service: &AgentService) -> HealthCheck {
    let settings = service.runtime().settings();
    let cache = match service.cache_stats().await {
        Some(stats) => format!("cache {} entries", stats.entries),
        None => "cache disabled".to_string(),
    };
    HealthCheck {
        status: "ready",
        detail: format!("max {} iterations, {cache}", settings.max_iterations),
    }
}
