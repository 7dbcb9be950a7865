use std::sync::Arc;

use strand_core::observer::{LlmEnd, LlmStart, Observer, ToolEnd, ToolStart};

use crate::metrics::MetricsRecorder;

pub const LLM_CALLS: &str = "llm.calls";
pub const LLM_ERRORS: &str = "llm.errors";
pub const LLM_LATENCY_MS: &str = "llm.latency_ms";
pub const LLM_TOKENS: &str = "llm.tokens";
pub const TOOL_CALLS: &str = "tool.calls";
pub const TOOL_ERRORS: &str = "tool.errors";

/// [`Observer`] that records engine activity into a [`MetricsRecorder`].
pub struct MetricsObserver {
    metrics: Arc<MetricsRecorder>,
}

impl MetricsObserver {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl Observer for MetricsObserver {
    fn on_llm_start(&self, event: &LlmStart<'_>) {
        self.metrics
            .increment_counter(LLM_CALLS, &[("model", event.model)], 1);
    }

    fn on_llm_end(&self, event: &LlmEnd<'_>) {
        let labels = [("model", event.model)];
        self.metrics
            .observe_histogram(LLM_LATENCY_MS, &labels, event.duration.as_secs_f64() * 1000.0);
        if event.error.is_some() {
            self.metrics.increment_counter(LLM_ERRORS, &labels, 1);
        }
        if let Some(usage) = event.usage {
            self.metrics
                .increment_counter(LLM_TOKENS, &labels, usage.total_tokens);
        }
    }

    fn on_tool_start(&self, event: &ToolStart<'_>) {
        self.metrics
            .increment_counter(TOOL_CALLS, &[("tool", event.call.name.as_str())], 1);
    }

    fn on_tool_end(&self, event: &ToolEnd<'_>) {
        if event.result.is_error() {
            self.metrics
                .increment_counter(TOOL_ERRORS, &[("tool", event.call.name.as_str())], 1);
        }
    }
}
