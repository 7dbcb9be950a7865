use std::time::Duration;

use async_trait::async_trait;
use strand_core::context::RunContext;
use strand_core::model::{ModelRequest, ModelResponse};
use tracing::warn;

use super::{LlmMiddleware, LlmNext, Middleware};
use crate::error::EngineError;
use crate::state::State;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total calls including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (0-based): `base * multiplier^retry`,
    /// capped at `max_delay`. A rate-limit hint overrides the computed value
    /// but is still capped.
    pub fn delay_for(&self, retry: u32, suggested: Option<Duration>) -> Duration {
        if let Some(hint) = suggested {
            return hint.min(self.max_delay);
        }
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let ms = self.base_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exp);
        let capped = ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Re-invokes the rest of the LLM chain on retryable model errors.
#[derive(Clone, Debug, Default)]
pub struct RetryMiddleware {
    config: RetryConfig,
}

impl RetryMiddleware {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl LlmMiddleware for RetryMiddleware {
    async fn handle_llm(
        &self,
        ctx: &RunContext,
        state: &State,
        request: &ModelRequest,
        next: LlmNext<'_>,
    ) -> Result<ModelResponse, EngineError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match next.run(ctx, state, request).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if attempt >= max_attempts || !err.is_retryable() {
                return Err(err);
            }

            let suggested = match &err {
                EngineError::Model(e) => e.suggested_delay(),
                _ => None,
            };
            let delay = self.config.delay_for(attempt - 1, suggested);
            warn!(
                run_id = %state.run_id,
                turn = state.turn,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying model call"
            );

            tokio::select! {
                biased;
                ctx_err = ctx.done() => return Err(ctx_err.into()),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    fn as_llm_middleware(&self) -> Option<&dyn LlmMiddleware> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::test_support::state;
    use crate::middleware::{MiddlewareChain, ModelCall};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use strand_core::errors::ModelError;
    use strand_core::messages::Message;
    use strand_core::model::Usage;

    struct Scripted {
        outcomes: Mutex<VecDeque<Result<&'static str, ModelError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<&'static str, ModelError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelCall for Scripted {
        async fn call(&self, _ctx: &RunContext, _request: &ModelRequest) -> Result<ModelResponse, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcomes.lock().pop_front() {
                Some(Ok(text)) => Ok(ModelResponse::new(Message::assistant(text), Usage::default())),
                Some(Err(e)) => Err(e.into()),
                None => Err(EngineError::Internal("script exhausted".into())),
            }
        }
    }

    fn chain(config: RetryConfig) -> MiddlewareChain {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(RetryMiddleware::new(config)));
        chain
    }

    fn server_error(body: &str) -> ModelError {
        ModelError::ServerError {
            status: 503,
            body: body.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let terminal = Scripted::new(vec![Err(server_error("first")), Ok("recovered")]);
        let chain = chain(RetryConfig::default());
        let out = chain
            .llm_next(&terminal)
            .run(&RunContext::new(), &state(), &ModelRequest::default())
            .await
            .unwrap();
        assert_eq!(out.message.content, "recovered");
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_last_error() {
        let terminal = Scripted::new(vec![
            Err(server_error("first")),
            Err(server_error("second")),
            Ok("never reached"),
        ]);
        let chain = chain(RetryConfig::default());
        let err = chain
            .llm_next(&terminal)
            .run(&RunContext::new(), &state(), &ModelRequest::default())
            .await
            .unwrap_err();
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, EngineError::Model(ModelError::ServerError { ref body, .. }) if body == "second"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_immediately() {
        let terminal = Scripted::new(vec![Err(ModelError::AuthenticationFailed("bad key".into()))]);
        let chain = chain(RetryConfig::default());
        let err = chain
            .llm_next(&terminal)
            .run(&RunContext::new(), &state(), &ModelRequest::default())
            .await
            .unwrap_err();
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, EngineError::Model(ModelError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_aborts() {
        let terminal = Scripted::new(vec![Err(server_error("x")), Ok("late")]);
        let chain = chain(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(3600),
            ..Default::default()
        });
        let ctx = RunContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = chain
            .llm_next(&terminal)
            .run(&ctx, &state(), &ModelRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 10,
            ..Default::default()
        };
        assert_eq!(config.delay_for(0, None), Duration::from_millis(200));
        assert_eq!(config.delay_for(1, None), Duration::from_millis(400));
        assert_eq!(config.delay_for(2, None), Duration::from_millis(800));
        assert_eq!(config.delay_for(10, None), Duration::from_secs(2));
        assert_eq!(
            config.delay_for(0, Some(Duration::from_secs(30))),
            Duration::from_secs(2)
        );
    }
}
