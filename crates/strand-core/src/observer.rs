use std::time::Duration;

use crate::ids::{RunId, SpanId, StepId};
use crate::messages::{ToolCall, ToolResult};
use crate::model::Usage;

/// Correlation ids attached to every observer callback and trace span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceIds {
    pub run_id: RunId,
    pub step_id: StepId,
    pub span_id: SpanId,
}

#[derive(Clone, Debug)]
pub struct LlmStart<'a> {
    pub ids: &'a TraceIds,
    pub turn: u32,
    pub model: &'a str,
    pub message_count: usize,
}

#[derive(Clone, Debug)]
pub struct LlmEnd<'a> {
    pub ids: &'a TraceIds,
    pub turn: u32,
    pub model: &'a str,
    pub duration: Duration,
    pub usage: Option<Usage>,
    /// `None` on success.
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ToolStart<'a> {
    pub ids: &'a TraceIds,
    pub call: &'a ToolCall,
}

#[derive(Clone, Debug)]
pub struct ToolEnd<'a> {
    pub ids: &'a TraceIds,
    pub call: &'a ToolCall,
    pub result: &'a ToolResult,
}

/// Telemetry callbacks. Implementations must tolerate concurrent calls.
pub trait Observer: Send + Sync {
    fn on_llm_start(&self, _event: &LlmStart<'_>) {}
    fn on_llm_end(&self, _event: &LlmEnd<'_>) {}
    fn on_tool_start(&self, _event: &ToolStart<'_>) {}
    fn on_tool_end(&self, _event: &ToolEnd<'_>) {}
}

pub struct NoopObserver;

impl Observer for NoopObserver {}

/// An open trace span. Dropping without `end` still closes it.
pub trait TraceSpan: Send {
    fn record_error(&mut self, error: &str);
    fn end(self: Box<Self>);
}

pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, ids: &TraceIds) -> Box<dyn TraceSpan>;
}

pub struct NoopTracer;

struct NoopSpan;

impl TraceSpan for NoopSpan {
    fn record_error(&mut self, _error: &str) {}
    fn end(self: Box<Self>) {}
}

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str, _ids: &TraceIds) -> Box<dyn TraceSpan> {
        Box::new(NoopSpan)
    }
}
