//! JSON API in front of the agent service.
//!
//! - `POST /api/agent`          answer a question (tool loop unless `mode` says otherwise)
//! - `POST /api/ask`            answer a question with the single-shot SQL chain
//! - `GET  /api/schema`         describe the analytics tables (`?table=` narrows it)
//! - `GET  /api/sessions/{id}`  conversation history for the caller's session
//! - `GET  /api/cache/stats`    response cache counters
//! - `GET  /api/rate-limit`     the caller's remaining quota
//!
//! Callers identify themselves with the `x-identity` header.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use datasage_agent::{AgentError, AgentRequest, AgentResponse, AgentService};
use datasage_core::analytics::{AnalyticsStore, SchemaDescription, StoreError};
use datasage_core::domain::conversation::{AgentMode, Message};
use datasage_core::errors::{ApplicationError, InterfaceError};
use datasage_db::{NewTurn, RepositoryError, SessionStore, SessionTurn};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

pub const IDENTITY_HEADER: &str = "x-identity";
pub const ANONYMOUS: &str = "anonymous";

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<AgentService>,
    pub store: Arc<dyn AnalyticsStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub history_turns: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/agent", post(agent))
        .route("/api/ask", post(ask))
        .route("/api/schema", get(schema))
        .route("/api/sessions/{session_id}", get(session_history))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/rate-limit", get(rate_limit))
        .with_state(state)
}

/// Caller identity taken from the `x-identity` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity(pub String);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(ANONYMOUS);
        Ok(Self(identity.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
    pub session_id: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuestionResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub response: AgentResponse,
}

#[derive(Debug, Deserialize)]
pub struct SchemaQuery {
    pub table: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub description: String,
    #[serde(flatten)]
    pub schema: SchemaDescription,
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryResponse {
    pub session_id: String,
    pub turns: Vec<SessionTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn not_found(message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                error: "not_found".to_string(),
                message: message.into(),
                correlation_id: correlation_id.to_string(),
            },
            retry_after_secs: None,
        }
    }
}

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        let (status, kind, retry_after_secs) = match &value {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request", None),
            InterfaceError::RateLimited { retry_after_secs, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limited", Some(*retry_after_secs))
            }
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", None)
            }
            InterfaceError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout", None),
            InterfaceError::Internal { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", None)
            }
        };

        Self {
            status,
            body: ErrorBody {
                error: kind.to_string(),
                message: value.user_message().to_string(),
                correlation_id: value.correlation_id().to_string(),
            },
            retry_after_secs,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(seconds) = self.retry_after_secs {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

fn application_error(error: ApplicationError, correlation_id: &str) -> ApiError {
    match &error {
        ApplicationError::UpstreamUnavailable(detail) | ApplicationError::Persistence(detail) => {
            error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error = %detail,
                "request failed on a dependency"
            );
        }
        other => {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = %correlation_id,
                error = %other,
                "request rejected"
            );
        }
    }
    ApiError::from(error.into_interface(correlation_id))
}

fn repository_error(error: RepositoryError, correlation_id: &str) -> ApiError {
    match error {
        RepositoryError::NotFound(what) => {
            ApiError::not_found(format!("{what} not found"), correlation_id)
        }
        other => {
            application_error(ApplicationError::Persistence(other.to_string()), correlation_id)
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn agent(
    State(state): State<ApiState>,
    identity: Identity,
    Json(body): Json<QuestionRequest>,
) -> Result<Json<QuestionResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let mode = match body.mode.as_deref() {
        Some(raw) => raw.parse::<AgentMode>().map_err(|message| {
            application_error(ApplicationError::InvalidRequest(message), &correlation_id)
        })?,
        None => AgentMode::ToolLoop,
    };
    answer(&state, identity, body, mode, &correlation_id).await.map(Json)
}

async fn ask(
    State(state): State<ApiState>,
    identity: Identity,
    Json(body): Json<QuestionRequest>,
) -> Result<Json<QuestionResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    answer(&state, identity, body, AgentMode::SqlChain, &correlation_id).await.map(Json)
}

async fn answer(
    state: &ApiState,
    Identity(identity): Identity,
    body: QuestionRequest,
    mode: AgentMode,
    correlation_id: &str,
) -> Result<QuestionResponse, ApiError> {
    let session_id = body
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let prior: Vec<Message> = state
        .sessions
        .recent_turns(&session_id, &identity, state.history_turns)
        .await
        .map_err(|error| repository_error(error, correlation_id))?
        .iter()
        .flat_map(SessionTurn::to_messages)
        .collect();

    let request = AgentRequest {
        question: body.question,
        identity: identity.clone(),
        session_id: Some(session_id.clone()),
        mode,
        prior_history: prior,
    };
    let question = request.question.trim().to_string();
    let response = state
        .service
        .handle(request)
        .await
        .map_err(|error: AgentError| application_error(error.into(), correlation_id))?;

    let turn = NewTurn {
        question,
        answer: response.answer.clone(),
        sql: response.sql.clone(),
        mode: mode.as_str().to_string(),
    };
    if let Err(error) = state.sessions.append_turn(&session_id, &identity, turn).await {
        warn!(
            event_name = "api.session.persist_failed",
            correlation_id = %correlation_id,
            session_id = %session_id,
            error = %error,
            "answer returned but the turn was not recorded"
        );
    }

    Ok(QuestionResponse { session_id, response })
}

async fn schema(
    State(state): State<ApiState>,
    Query(query): Query<SchemaQuery>,
) -> Result<Json<SchemaResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let schema = state.store.describe_schema(query.table.as_deref()).await.map_err(|error| {
        match error {
            StoreError::UnknownTable(table) => {
                ApiError::not_found(format!("table `{table}` not found"), &correlation_id)
            }
            other => {
                application_error(ApplicationError::Persistence(other.to_string()), &correlation_id)
            }
        }
    })?;

    Ok(Json(SchemaResponse { description: schema.render(), schema }))
}

async fn session_history(
    State(state): State<ApiState>,
    identity: Identity,
    Path(session_id): Path<String>,
) -> Result<Json<SessionHistoryResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let turns = state
        .sessions
        .session_history(&session_id, &identity.0)
        .await
        .map_err(|error| repository_error(error, &correlation_id))?;

    Ok(Json(SessionHistoryResponse { session_id, turns }))
}

async fn cache_stats(State(state): State<ApiState>) -> impl IntoResponse {
    match state.service.cache_stats().await {
        Some(stats) => Json(serde_json::json!({ "enabled": true, "stats": stats })),
        None => Json(serde_json::json!({ "enabled": false })),
    }
}

async fn rate_limit(State(state): State<ApiState>, identity: Identity) -> impl IntoResponse {
    Json(state.service.rate_limit_status(&identity.0).await)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use datasage_agent::{
        AgentService, Completion, CompletionRequest, LlmClient, LlmError, LlmErrorKind,
        TokenUsage,
    };
    use datasage_core::config::AppConfig;
    use datasage_core::domain::conversation::{Role, ToolCall};
    use datasage_db::{connect_with_settings, migrations, InMemorySessionStore, SqlAnalyticsStore};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, ApiState};

    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<Completion, LlmError>>>,
        seen_user_messages: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
            let users =
                request.messages.iter().filter(|message| message.role == Role::User).count();
            self.seen_user_messages.lock().expect("lock").push(users);
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok(text_reply("script exhausted")))
        }
    }

    fn text_reply(text: &str) -> Completion {
        Completion { text: text.to_string(), tool_calls: Vec::new(), usage: TokenUsage::default() }
    }

    fn query_reply(sql: &str) -> Completion {
        Completion {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "QueryDatabase".to_string(),
                arguments: json!({ "query": sql }),
            }],
            usage: TokenUsage::default(),
        }
    }

    async fn app_with(
        config: AppConfig,
        replies: Vec<Result<Completion, LlmError>>,
    ) -> (Router, Arc<ScriptedLlm>) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query(
            "INSERT INTO products (id, name, category, price) \
             VALUES (1, 'Laptop Pro', 'Electronics', 1299.99)",
        )
        .execute(&pool)
        .await
        .expect("seed product");
        sqlx::query(
            "INSERT INTO sales (product_id, quantity, total, sale_date, region) VALUES \
             (1, 80, 100000.00, '2024-01-05', 'North'), \
             (1, 80, 100000.00, '2024-02-11', 'South'), \
             (1, 4, 4593.89, '2024-03-20', 'East')",
        )
        .execute(&pool)
        .await
        .expect("seed sales");

        let llm =
            Arc::new(ScriptedLlm { replies: Mutex::new(replies.into()), ..ScriptedLlm::default() });
        let store = Arc::new(SqlAnalyticsStore::new(pool.clone()));
        let service = Arc::new(AgentService::with_llm(&config, llm.clone(), store.clone()));
        let state = ApiState {
            service,
            store,
            sessions: Arc::new(InMemorySessionStore::default()),
            history_turns: config.agent.history_turns as usize,
        };
        (router(state), llm)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body, retry_after)
    }

    fn post(uri: &str, identity: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(identity) = identity {
            builder = builder.header("x-identity", identity);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    fn get(uri: &str, identity: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(identity) = identity {
            builder = builder.header("x-identity", identity);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn agent_route_answers_total_sales_and_records_the_turn() {
        let (app, _) = app_with(
            AppConfig::default(),
            vec![
                Ok(query_reply("SELECT SUM(total) AS total_sales FROM sales;")),
                Ok(text_reply("Total sales are $204,593.89.")),
            ],
        )
        .await;

        let (status, body, _) = send(
            &app,
            post(
                "/api/agent",
                Some("analyst"),
                json!({"question": "What are the total sales?", "session_id": "s-1"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["answer"].as_str().expect("answer").contains("204,593.89"));
        assert_eq!(body["sql"], "SELECT SUM(total) AS total_sales FROM sales;");
        assert_eq!(body["tools_used"], json!(["QueryDatabase"]));
        assert_eq!(body["cache_hit"], false);
        assert_eq!(body["session_id"], "s-1");

        let (status, history, _) = send(&app, get("/api/sessions/s-1", Some("analyst"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history["turns"].as_array().map(Vec::len), Some(1));
        assert_eq!(history["turns"][0]["question"], "What are the total sales?");

        let (status, _, _) = send(&app, get("/api/sessions/s-1", Some("intruder"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn follow_up_questions_replay_session_history() {
        let (app, llm) = app_with(
            AppConfig::default(),
            vec![Ok(text_reply("There are 3 sales.")), Ok(text_reply("All in 2024."))],
        )
        .await;

        for question in ["How many sales?", "Which year were they in?"] {
            let (status, _, _) = send(
                &app,
                post("/api/agent", None, json!({"question": question, "session_id": "thread"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(*llm.seen_user_messages.lock().expect("lock"), vec![1, 2]);
    }

    #[tokio::test]
    async fn ask_route_uses_the_sql_chain() {
        let (app, _) = app_with(
            AppConfig::default(),
            vec![Ok(text_reply("SELECT SUM(total) FROM sales"))],
        )
        .await;

        let (status, body, _) =
            send(&app, post("/api/ask", None, json!({"question": "Total sales?"}))).await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["answer"], "The answer is: 204,593.89");
        assert_eq!(body["metrics"]["mode"], "sql_chain");
        assert!(body["session_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn quota_exhaustion_maps_to_429_with_retry_after() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_window = 1;
        let (app, _) = app_with(config, vec![Ok(text_reply("fine"))]).await;

        let (first, _, _) =
            send(&app, post("/api/agent", Some("burst"), json!({"question": "one"}))).await;
        let (second, body, retry_after) =
            send(&app, post("/api/agent", Some("burst"), json!({"question": "two"}))).await;

        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate_limited");
        let seconds: u64 = retry_after.expect("retry-after").parse().expect("seconds");
        assert!(seconds <= 60);
    }

    #[tokio::test]
    async fn provider_failure_maps_to_503_and_bad_input_to_400() {
        let (app, _) = app_with(
            AppConfig::default(),
            vec![Err(LlmError::new(LlmErrorKind::ServerError, "provider down"))],
        )
        .await;

        let (status, body, _) =
            send(&app, post("/api/agent", None, json!({"question": "anything"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "service_unavailable");
        assert!(!body["message"].as_str().unwrap_or_default().contains("provider down"));

        let (status, _, _) = send(&app, post("/api/agent", None, json!({"question": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app,
            post("/api/agent", None, json!({"question": "anything", "mode": "telepathy"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn schema_and_cache_routes_report_state() {
        let (app, _) = app_with(AppConfig::default(), Vec::new()).await;

        let (status, body, _) = send(&app, get("/api/schema?table=sales", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["description"].as_str().expect("description").contains("Table: sales"));
        assert_eq!(body["tables"].as_array().map(Vec::len), Some(1));

        let (status, _, _) = send(&app, get("/api/schema?table=chat_turns", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body, _) = send(&app, get("/api/cache/stats", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], true);
        assert_eq!(body["stats"]["entries"], 0);

        let (status, body, _) = send(&app, get("/api/rate-limit", Some("viewer"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remaining"], 10);
    }
}
