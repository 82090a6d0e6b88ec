//! Agent runtime for answering analytics questions.
//!
//! A question flows through [`service::AgentService`]: rate limiting, the
//! response cache, then [`runtime::AgentRuntime`], which either runs the
//! tool-calling loop or the single-shot SQL chain. The model only chooses
//! tools and phrases answers; every query it proposes passes the SQL guard
//! before it reaches the store.

pub mod cache;
pub mod format;
pub mod llm;
pub mod metrics;
pub mod prompts;
pub mod rate_limit;
pub mod runtime;
pub mod service;
pub mod tools;

pub use cache::{cache_key, CacheStats, CachedAnswer, ResponseCache};
pub use llm::{
    Completion, CompletionRequest, LlmClient, LlmError, LlmErrorKind, OpenAiCompatibleClient,
    TokenUsage,
};
pub use metrics::{CostRates, MetricsCollector, MetricsSink, RequestMetrics, TracingMetricsSink};
pub use rate_limit::{Admission, RateLimitStatus, RateLimiter};
pub use runtime::{AgentAnswer, AgentError, AgentRuntime, RuntimeSettings};
pub use service::{AgentRequest, AgentResponse, AgentService};
pub use tools::{Tool, ToolError, ToolRegistry, ToolSpec};
