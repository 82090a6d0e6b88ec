use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use datasage_core::config::LlmConfig;

use crate::llm::TokenUsage;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CostRates {
    pub input_per_1k_usd: f64,
    pub output_per_1k_usd: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self { input_per_1k_usd: 0.0005, output_per_1k_usd: 0.0015 }
    }
}

impl CostRates {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            input_per_1k_usd: config.input_cost_per_1k_usd,
            output_per_1k_usd: config.output_cost_per_1k_usd,
        }
    }

    pub fn estimate(&self, usage: TokenUsage) -> f64 {
        usage.input_tokens as f64 / 1000.0 * self.input_per_1k_usd
            + usage.output_tokens as f64 / 1000.0 * self.output_per_1k_usd
    }
}

/// Per-request figures reported to the observability sink.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RequestMetrics {
    pub request_id: String,
    pub mode: String,
    pub duration_seconds: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    pub tools_used: Vec<String>,
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub errors: u32,
    pub cache_hit: bool,
    pub degraded: bool,
}

pub trait MetricsSink: Send + Sync {
    fn emit(&self, metrics: &RequestMetrics);
}

/// Writes one `agent.request.completed` event per request.
#[derive(Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn emit(&self, metrics: &RequestMetrics) {
        info!(
            event_name = "agent.request.completed",
            request_id = %metrics.request_id,
            mode = %metrics.mode,
            duration_seconds = metrics.duration_seconds,
            input_tokens = metrics.input_tokens,
            output_tokens = metrics.output_tokens,
            estimated_cost_usd = metrics.estimated_cost_usd,
            tools_used = ?metrics.tools_used,
            llm_calls = metrics.llm_calls,
            tool_calls = metrics.tool_calls,
            errors = metrics.errors,
            cache_hit = metrics.cache_hit,
            degraded = metrics.degraded,
            "request completed"
        );
    }
}

#[derive(Clone, Debug, Default)]
pub struct Observation {
    pub request_id: String,
    pub mode: String,
    pub elapsed: Duration,
    pub usage: TokenUsage,
    pub tools_used: Vec<String>,
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub errors: u32,
    pub cache_hit: bool,
    pub degraded: bool,
}

#[derive(Clone)]
pub struct MetricsCollector {
    rates: CostRates,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsCollector {
    pub fn new(rates: CostRates, sink: Arc<dyn MetricsSink>) -> Self {
        Self { rates, sink }
    }

    pub fn tracing(rates: CostRates) -> Self {
        Self::new(rates, Arc::new(TracingMetricsSink))
    }

    pub fn record(&self, observation: Observation) -> RequestMetrics {
        let metrics = RequestMetrics {
            estimated_cost_usd: self.rates.estimate(observation.usage),
            request_id: observation.request_id,
            mode: observation.mode,
            duration_seconds: observation.elapsed.as_secs_f64(),
            input_tokens: observation.usage.input_tokens,
            output_tokens: observation.usage.output_tokens,
            tools_used: observation.tools_used,
            llm_calls: observation.llm_calls,
            tool_calls: observation.tool_calls,
            errors: observation.errors,
            cache_hit: observation.cache_hit,
            degraded: observation.degraded,
        };
        self.sink.emit(&metrics);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{CostRates, MetricsCollector, MetricsSink, Observation, RequestMetrics};
    use crate::llm::TokenUsage;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<RequestMetrics>>,
    }

    impl MetricsSink for RecordingSink {
        fn emit(&self, metrics: &RequestMetrics) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(metrics.clone());
            }
        }
    }

    #[test]
    fn cost_uses_per_thousand_rates() {
        let cost = CostRates::default()
            .estimate(TokenUsage { input_tokens: 2_000, output_tokens: 1_000 });
        assert!((cost - 0.0025).abs() < 1e-12, "got {cost}");
    }

    #[test]
    fn record_emits_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let collector = MetricsCollector::new(CostRates::default(), sink.clone());

        let metrics = collector.record(Observation {
            request_id: "req-1".into(),
            mode: "tool_loop".into(),
            elapsed: Duration::from_millis(1_500),
            usage: TokenUsage { input_tokens: 1_000, output_tokens: 0 },
            tools_used: vec!["QueryDatabase".into()],
            llm_calls: 2,
            tool_calls: 1,
            ..Observation::default()
        });

        assert!((metrics.duration_seconds - 1.5).abs() < 1e-9);
        assert!((metrics.estimated_cost_usd - 0.0005).abs() < 1e-12);
        let seen = sink.seen.lock().expect("sink lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tools_used, vec!["QueryDatabase".to_string()]);
    }
}
