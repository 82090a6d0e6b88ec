//! Request pipeline in front of the runtime: admission, cache lookup,
//! execution, cache fill, metrics.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use datasage_core::analytics::{AnalyticsStore, Row};
use datasage_core::config::AppConfig;
use datasage_core::domain::conversation::{AgentMode, Message};

use crate::cache::{cache_key, CacheStats, CachedAnswer, ResponseCache};
use crate::llm::{LlmClient, LlmError, OpenAiCompatibleClient};
use crate::metrics::{CostRates, MetricsCollector, Observation, RequestMetrics};
use crate::rate_limit::{Admission, RateLimitStatus, RateLimiter};
use crate::runtime::{AgentError, AgentRuntime, RuntimeSettings};
use crate::tools::ToolRegistry;

#[derive(Clone, Debug, Default)]
pub struct AgentRequest {
    pub question: String,
    pub identity: String,
    pub session_id: Option<String>,
    pub mode: AgentMode,
    pub prior_history: Vec<Message>,
}

impl AgentRequest {
    pub fn new(question: impl Into<String>, identity: impl Into<String>) -> Self {
        Self { question: question.into(), identity: identity.into(), ..Self::default() }
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_history(mut self, session_id: impl Into<String>, prior: Vec<Message>) -> Self {
        self.session_id = Some(session_id.into());
        self.prior_history = prior;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentResponse {
    pub request_id: String,
    pub answer: String,
    pub sql: Option<String>,
    pub tools_used: Vec<String>,
    pub results: Vec<Row>,
    pub cache_hit: bool,
    pub degraded: bool,
    pub iterations: u32,
    pub metrics: RequestMetrics,
}

pub struct AgentService {
    runtime: AgentRuntime,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<ResponseCache>>,
    metrics: MetricsCollector,
}

impl AgentService {
    pub fn new(
        runtime: AgentRuntime,
        limiter: Arc<RateLimiter>,
        cache: Option<Arc<ResponseCache>>,
        metrics: MetricsCollector,
    ) -> Self {
        Self { runtime, limiter, cache, metrics }
    }

    /// Wires the OpenAI-compatible client and the standard tools over `store`.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn AnalyticsStore>,
    ) -> Result<Self, LlmError> {
        let llm = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
        Ok(Self::with_llm(config, llm, store))
    }

    pub fn with_llm(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn AnalyticsStore>,
    ) -> Self {
        let settings = RuntimeSettings::from_config(config);
        let registry = Arc::new(ToolRegistry::standard(store.clone(), settings.max_result_rows));
        let runtime = AgentRuntime::new(llm, registry, store, settings);

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.requests_per_window,
            Duration::from_secs(config.rate_limit.window_secs),
        ));
        let cache = config.cache.enabled.then(|| {
            Arc::new(ResponseCache::new(
                Duration::from_secs(config.cache.ttl_secs),
                config.cache.max_entries,
            ))
        });
        let metrics = MetricsCollector::tracing(CostRates::from_config(&config.llm));

        Self::new(runtime, limiter, cache, metrics)
    }

    pub async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let question = request.question.trim();
        if question.is_empty() {
            return Err(AgentError::InvalidRequest("question must not be empty".to_string()));
        }

        if let Admission::Denied { retry_after } = self.limiter.admit(&request.identity).await {
            return Err(AgentError::RateLimited { retry_after });
        }

        let key = cache_key(question, request.mode, &request.identity);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                debug!(
                    event_name = "agent.cache.hit",
                    request_id = %request_id,
                    "served from cache"
                );
                let metrics = self.metrics.record(Observation {
                    request_id: request_id.clone(),
                    mode: request.mode.as_str().to_string(),
                    elapsed: started.elapsed(),
                    tools_used: hit.tools_used.clone(),
                    cache_hit: true,
                    ..Observation::default()
                });
                return Ok(AgentResponse {
                    request_id,
                    answer: hit.answer,
                    sql: hit.sql,
                    tools_used: hit.tools_used,
                    results: hit.results,
                    cache_hit: true,
                    degraded: false,
                    iterations: 0,
                    metrics,
                });
            }
        }

        info!(
            event_name = "agent.request.started",
            request_id = %request_id,
            mode = request.mode.as_str(),
            has_history = !request.prior_history.is_empty(),
            "answering question"
        );
        let answer = self.runtime.run(question, request.prior_history, request.mode).await?;

        if let Some(cache) = &self.cache {
            if !answer.degraded {
                cache
                    .put(
                        key,
                        CachedAnswer {
                            answer: answer.answer.clone(),
                            sql: answer.sql.clone(),
                            tools_used: answer.tools_used.clone(),
                            results: answer.results.clone(),
                        },
                    )
                    .await;
            }
        }

        let metrics = self.metrics.record(Observation {
            request_id: request_id.clone(),
            mode: request.mode.as_str().to_string(),
            elapsed: started.elapsed(),
            usage: answer.usage,
            tools_used: answer.tools_used.clone(),
            llm_calls: answer.llm_calls,
            tool_calls: answer.tool_calls,
            errors: answer.tool_errors,
            cache_hit: false,
            degraded: answer.degraded,
        });

        Ok(AgentResponse {
            request_id,
            answer: answer.answer,
            sql: answer.sql,
            tools_used: answer.tools_used,
            results: answer.results,
            cache_hit: false,
            degraded: answer.degraded,
            iterations: answer.iterations,
            metrics,
        })
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    pub async fn clear_cache(&self) -> usize {
        match &self.cache {
            Some(cache) => cache.clear().await,
            None => 0,
        }
    }

    pub async fn rate_limit_status(&self, identity: &str) -> RateLimitStatus {
        self.limiter.status(identity).await
    }

    /// Drops idle limiter buckets; returns how many were collected.
    pub async fn maintain(&self) -> usize {
        self.limiter.collect_idle().await
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    pub async fn shutdown(&self) {
        let cleared = self.clear_cache().await;
        self.limiter.clear().await;
        info!(
            event_name = "agent.service.shutdown",
            cleared_cache_entries = cleared,
            "agent service stopped"
        );
    }
}
