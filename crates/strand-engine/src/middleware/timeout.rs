use std::time::Duration;

use strand_core::context::RunContext;
use strand_core::messages::ToolCall;

use super::{ContextMiddleware, DerivedContext, Middleware};
use crate::state::State;

/// Puts a deadline on the LLM call and on each tool batch. A zero duration
/// leaves that stage unbounded.
#[derive(Clone, Debug, Default)]
pub struct TimeoutMiddleware {
    llm: Duration,
    tool: Duration,
}

impl TimeoutMiddleware {
    pub fn new(llm: Duration, tool: Duration) -> Self {
        Self { llm, tool }
    }

    pub fn llm_only(llm: Duration) -> Self {
        Self::new(llm, Duration::ZERO)
    }

    pub fn tool_only(tool: Duration) -> Self {
        Self::new(Duration::ZERO, tool)
    }
}

impl ContextMiddleware for TimeoutMiddleware {
    fn llm_context(&self, ctx: &RunContext, _state: &State) -> Option<DerivedContext> {
        (!self.llm.is_zero()).then(|| ctx.with_timeout(self.llm).into())
    }

    fn tool_context(
        &self,
        ctx: &RunContext,
        _state: &State,
        _calls: &[ToolCall],
    ) -> Option<DerivedContext> {
        (!self.tool.is_zero()).then(|| ctx.with_timeout(self.tool).into())
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &str {
        "timeout"
    }

    fn as_context(&self) -> Option<&dyn ContextMiddleware> {
        Some(self)
    }
}
