use std::time::Instant;

use async_trait::async_trait;
use strand_core::context::RunContext;
use strand_core::model::{ModelRequest, ModelResponse};
use tracing::{debug, warn};

use super::{LlmMiddleware, LlmNext, Middleware};
use crate::error::EngineError;
use crate::state::State;

/// Logs every pass through the LLM chain with its latency and outcome.
/// Registered after a retry middleware, it logs each attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl LlmMiddleware for LoggingMiddleware {
    async fn handle_llm(
        &self,
        ctx: &RunContext,
        state: &State,
        request: &ModelRequest,
        next: LlmNext<'_>,
    ) -> Result<ModelResponse, EngineError> {
        let start = Instant::now();
        debug!(
            run_id = %state.run_id,
            span_id = %state.span_id,
            turn = state.turn,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "model call started"
        );
        let result = next.run(ctx, state, request).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => debug!(
                run_id = %state.run_id,
                span_id = %state.span_id,
                duration_ms,
                tool_calls = response.message.tool_calls.len(),
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "model call finished"
            ),
            Err(e) => warn!(
                run_id = %state.run_id,
                span_id = %state.span_id,
                duration_ms,
                error_kind = e.error_kind(),
                error = %e,
                "model call failed"
            ),
        }
        result
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn as_llm_middleware(&self) -> Option<&dyn LlmMiddleware> {
        Some(self)
    }
}
