use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use datasage_core::analytics::{AnalyticsStore, QueryRows, Row, StoreError};
use datasage_core::config::AppConfig;
use datasage_core::domain::conversation::{AgentMode, Conversation, Message};
use datasage_core::errors::ApplicationError;
use datasage_core::sql_guard;

use crate::format::{format_amount, render_rows};
use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError, TokenUsage};
use crate::prompts::{sql_chain_system_prompt, strip_code_fences, TOOL_LOOP_SYSTEM_PROMPT};
use crate::tools::{ToolArtifact, ToolRegistry, ToolSpec};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_iterations: u32,
    pub request_timeout: Duration,
    pub max_output_tokens: u32,
    pub max_result_rows: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            request_timeout: Duration::from_secs(60),
            max_output_tokens: 1024,
            max_result_rows: 10,
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.agent.max_iterations.max(1),
            request_timeout: Duration::from_secs(config.agent.request_timeout_secs),
            max_output_tokens: config.llm.max_output_tokens,
            max_result_rows: config.agent.max_result_rows,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AgentAnswer {
    pub answer: String,
    pub sql: Option<String>,
    pub tools_used: Vec<String>,
    pub results: Vec<Row>,
    pub iterations: u32,
    /// Best-effort answer produced without a clean model conclusion.
    pub degraded: bool,
    pub usage: TokenUsage,
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub tool_errors: u32,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("llm capability unavailable: {0}")]
    Upstream(#[from] LlmError),
    #[error("request exceeded its {}s deadline", budget.as_secs())]
    DeadlineExceeded { budget: Duration },
    #[error("analytics store failure: {0}")]
    Store(#[from] StoreError),
}

impl From<AgentError> for ApplicationError {
    fn from(value: AgentError) -> Self {
        match value {
            AgentError::InvalidRequest(message) => Self::InvalidRequest(message),
            AgentError::RateLimited { retry_after } => Self::RateLimitExceeded { retry_after },
            AgentError::Upstream(error) => Self::UpstreamUnavailable(error.to_string()),
            AgentError::DeadlineExceeded { budget } => Self::DeadlineExceeded { budget },
            AgentError::Store(error) => Self::Persistence(error.to_string()),
        }
    }
}

/// Drives one question to an answer, either through the multi-step tool loop
/// or the single-shot SQL chain.
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn AnalyticsStore>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn AnalyticsStore>,
        settings: RuntimeSettings,
    ) -> Self {
        Self { llm, registry, store, settings }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        question: &str,
        prior: Vec<Message>,
        mode: AgentMode,
    ) -> Result<AgentAnswer, AgentError> {
        let deadline = Deadline::start(self.settings.request_timeout);
        match mode {
            AgentMode::ToolLoop => self.run_tool_loop(question, prior, &deadline).await,
            AgentMode::SqlChain => self.run_sql_chain(question, prior, &deadline).await,
        }
    }

    async fn run_tool_loop(
        &self,
        question: &str,
        prior: Vec<Message>,
        deadline: &Deadline,
    ) -> Result<AgentAnswer, AgentError> {
        let mut conversation = Conversation::new(TOOL_LOOP_SYSTEM_PROMPT, prior, question);
        let catalog = self.registry.catalog();
        let cap = self.settings.max_iterations;
        let mut answer = AgentAnswer::default();
        let mut last_success: Option<String> = None;

        while answer.iterations < cap {
            let completion = self.complete(&conversation, &catalog, deadline).await?;
            answer.iterations += 1;
            answer.llm_calls += 1;
            answer.usage.add(completion.usage);

            info!(
                event_name = "agent.loop.iteration",
                iteration = answer.iterations,
                max_iterations = cap,
                requested_tools = completion.tool_calls.len(),
                "reasoning step completed"
            );

            if completion.tool_calls.is_empty() {
                if completion.text.is_empty() {
                    break;
                }
                answer.answer = completion.text;
                return Ok(answer);
            }

            // sequential: later calls may depend on earlier results
            let mut results = Vec::with_capacity(completion.tool_calls.len());
            for call in &completion.tool_calls {
                let dispatched = deadline.run(self.registry.dispatch(call)).await?;
                answer.tool_calls += 1;
                if !answer.tools_used.iter().any(|name| name == &call.name) {
                    answer.tools_used.push(call.name.clone());
                }

                if dispatched.result.is_error {
                    answer.tool_errors += 1;
                } else {
                    last_success = Some(dispatched.result.content.clone());
                }
                if let Some(ToolArtifact::Query { sql, rows }) = dispatched.artifact {
                    answer.sql = Some(sql);
                    answer.results = rows.rows;
                }
                results.push(dispatched.result);
            }

            conversation.record_round(completion.text, completion.tool_calls, &results);
        }

        warn!(
            event_name = "agent.loop.degraded",
            iterations = answer.iterations,
            max_iterations = cap,
            has_partial_result = last_success.is_some(),
            "reasoning loop ended without a final answer"
        );
        answer.degraded = true;
        answer.answer = degraded_answer(cap, last_success.as_deref());
        Ok(answer)
    }

    async fn run_sql_chain(
        &self,
        question: &str,
        prior: Vec<Message>,
        deadline: &Deadline,
    ) -> Result<AgentAnswer, AgentError> {
        let schema = deadline.run(self.store.describe_schema(None)).await??;
        let conversation =
            Conversation::new(sql_chain_system_prompt(&schema.render()), prior, question);

        let completion = self.complete(&conversation, &[], deadline).await?;
        let sql = strip_code_fences(&completion.text);
        let mut answer = AgentAnswer {
            sql: Some(sql.clone()).filter(|sql| !sql.is_empty()),
            iterations: 1,
            llm_calls: 1,
            usage: completion.usage,
            ..AgentAnswer::default()
        };

        let validated = match sql_guard::validate(&sql) {
            Ok(validated) => validated,
            Err(rejection) => {
                warn!(
                    event_name = "agent.chain.rejected",
                    reason = %rejection,
                    "generated sql rejected"
                );
                answer.degraded = true;
                answer.answer = format!(
                    "I could not produce a safe query for that question ({rejection}). \
                     Try rephrasing it."
                );
                return Ok(answer);
            }
        };

        let executed =
            deadline.run(self.store.execute(&validated, self.settings.max_result_rows)).await?;
        match executed {
            Ok(rows) => {
                answer.answer = chain_answer(&rows);
                answer.results = rows.rows;
            }
            Err(error) => {
                warn!(event_name = "agent.chain.failed", error = %error, "generated sql failed");
                answer.degraded = true;
                answer.answer = format!("The generated query could not be executed: {error}");
            }
        }

        Ok(answer)
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        tools: &[ToolSpec],
        deadline: &Deadline,
    ) -> Result<Completion, AgentError> {
        let request = CompletionRequest {
            messages: conversation.messages(),
            tools,
            max_output_tokens: self.settings.max_output_tokens,
        };

        Ok(deadline.run(self.llm.complete(request)).await??)
    }
}

struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn start(budget: Duration) -> Self {
        Self { at: Instant::now() + budget, budget }
    }

    fn remaining(&self) -> Option<Duration> {
        let remaining = self.at.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Runs `work` in what is left of the budget. Work that overruns is
    /// dropped, which cancels in-flight tool tasks and queries.
    async fn run<F: Future>(&self, work: F) -> Result<F::Output, AgentError> {
        let exceeded = AgentError::DeadlineExceeded { budget: self.budget };
        let Some(remaining) = self.remaining() else {
            return Err(exceeded);
        };
        tokio::time::timeout(remaining, work).await.map_err(|_| exceeded)
    }
}

/// Direct rendering of a SQL-chain result: one cell becomes a sentence,
/// anything wider falls back to the row preview.
fn chain_answer(rows: &QueryRows) -> String {
    match rows.scalar() {
        Some(Value::Number(number)) => match number.as_f64() {
            Some(value) => format!("The answer is: {}", format_amount(value)),
            None => format!("The answer is: {number}"),
        },
        Some(Value::String(text)) => format!("The answer is: {text}"),
        Some(Value::Null) => "No results found for your query.".to_string(),
        Some(other) => format!("The answer is: {other}"),
        None if rows.total_rows == 0 => "No results found for your query.".to_string(),
        None => render_rows(rows),
    }
}

fn degraded_answer(cap: u32, last_success: Option<&str>) -> String {
    match last_success {
        Some(content) => format!(
            "I could not finish reasoning within {cap} steps. \
             The most recent data I retrieved was:\n{content}"
        ),
        None => format!(
            "I could not produce an answer within {cap} reasoning steps. \
             Please try rephrasing the question."
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use datasage_core::analytics::QueryRows;

    use super::{chain_answer, degraded_answer};

    fn single(value: Value) -> QueryRows {
        let mut row = Map::new();
        row.insert("value".to_string(), value);
        QueryRows { rows: vec![row], total_rows: 1, count_capped: false }
    }

    #[test]
    fn chain_answer_states_single_cells_directly() {
        assert_eq!(chain_answer(&single(json!(204593.89))), "The answer is: 204,593.89");
        assert_eq!(chain_answer(&single(json!("North"))), "The answer is: North");
        assert_eq!(chain_answer(&single(json!(null))), "No results found for your query.");
        assert_eq!(chain_answer(&QueryRows::default()), "No results found for your query.");
    }

    #[test]
    fn degraded_answer_is_never_empty() {
        assert!(degraded_answer(5, None).contains("5 reasoning steps"));
        let with_result = degraded_answer(3, Some("Result: 42.0"));
        assert!(with_result.ends_with("Result: 42.0"));
    }
}
