use std::sync::Arc;

use strand_core::context::RunContext;
use strand_core::ids::{RunId, SpanId, StepId};
use strand_core::messages::{Message, ToolCall, ToolResult};
use strand_core::model::ModelResponse;
use strand_core::observer::TraceIds;

use crate::agent::Agent;

/// What hooks and middlewares see of one turn.
#[derive(Clone, Debug)]
pub struct State {
    pub ctx: RunContext,
    pub agent: Arc<Agent>,
    pub run_id: RunId,
    pub step_id: StepId,
    pub span_id: SpanId,
    pub turn: u32,
    pub input: Message,
    /// System prompt followed by the windowed history sent this turn.
    pub messages: Vec<Message>,
    /// Set once the model has answered.
    pub response: Option<ModelResponse>,
}

impl State {
    pub fn trace_ids(&self) -> TraceIds {
        TraceIds {
            run_id: self.run_id.clone(),
            step_id: self.step_id.clone(),
            span_id: self.span_id.clone(),
        }
    }
}

/// What tool hooks see of one call.
#[derive(Clone, Debug)]
pub struct ToolState {
    pub ctx: RunContext,
    pub agent: Arc<Agent>,
    pub run_id: RunId,
    pub step_id: StepId,
    pub span_id: SpanId,
    pub turn: u32,
    pub call: ToolCall,
    /// Set for `after_tool` hooks.
    pub result: Option<ToolResult>,
}

impl ToolState {
    pub fn trace_ids(&self) -> TraceIds {
        TraceIds {
            run_id: self.run_id.clone(),
            step_id: self.step_id.clone(),
            span_id: self.span_id.clone(),
        }
    }
}
