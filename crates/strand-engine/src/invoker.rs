use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use strand_core::context::RunContext;
use strand_core::messages::{ToolCall, ToolResult};
use strand_core::tools::Tool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::EngineError;
use crate::registry::ToolRegistry;

const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Executes one turn's batch of tool calls.
///
/// Results come back in call order with `result.id == call.id`. A failing or
/// panicking tool becomes an error result; an unknown tool name or a
/// finished context fails the whole batch.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        ctx: &RunContext,
        registry: &ToolRegistry,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolResult>, EngineError>;
}

fn resolve(
    registry: &ToolRegistry,
    calls: &[ToolCall],
) -> Result<Vec<(Arc<dyn Tool>, ToolCall)>, EngineError> {
    calls
        .iter()
        .map(|call| {
            registry
                .get(&call.name)
                .map(|tool| (tool, call.clone()))
                .ok_or_else(|| EngineError::UnknownTool(call.name.clone()))
        })
        .collect()
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

async fn execute_one(
    ctx: &RunContext,
    tool: Arc<dyn Tool>,
    call: &ToolCall,
) -> Result<ToolResult, EngineError> {
    let start = Instant::now();
    let guarded = AssertUnwindSafe(tool.execute(ctx, call.args.clone())).catch_unwind();
    let outcome = ctx.run(guarded).await?;
    let result = match outcome {
        Ok(Ok(value)) => ToolResult::ok(call.id.clone(), value),
        Ok(Err(e)) => ToolResult::err(call.id.clone(), e.to_string()),
        Err(panic) => {
            let msg = panic_message(&panic);
            error!(tool = %call.name, panic = %msg, "tool panicked during execution");
            ToolResult::err(call.id.clone(), format!("tool panicked: {msg}"))
        }
    };
    debug!(
        tool = %call.name,
        call_id = %call.id,
        duration_ms = start.elapsed().as_millis() as u64,
        is_error = result.is_error(),
        "tool finished"
    );
    Ok(result)
}

/// Runs calls one after another.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialInvoker;

#[async_trait]
impl ToolInvoker for SerialInvoker {
    async fn invoke(
        &self,
        ctx: &RunContext,
        registry: &ToolRegistry,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolResult>, EngineError> {
        let resolved = resolve(registry, calls)?;
        let mut results = Vec::with_capacity(resolved.len());
        for (tool, call) in resolved {
            results.push(execute_one(ctx, tool, &call).await?);
        }
        Ok(results)
    }
}

/// Runs calls on spawned tasks, at most `max_concurrency` at a time. A
/// finished parent context aborts the outstanding tasks.
#[derive(Clone, Copy, Debug)]
pub struct ParallelInvoker {
    max_concurrency: usize,
}

impl ParallelInvoker {
    /// `0` is treated as `1`.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

impl Default for ParallelInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

#[async_trait]
impl ToolInvoker for ParallelInvoker {
    async fn invoke(
        &self,
        ctx: &RunContext,
        registry: &ToolRegistry,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolResult>, EngineError> {
        let resolved = resolve(registry, calls)?;
        let total = resolved.len();
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for (index, (tool, call)) in resolved.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, execute_one(&ctx, tool, &call).await)
            });
        }

        let mut slots: Vec<Option<ToolResult>> = vec![None; total];
        loop {
            tokio::select! {
                biased;
                err = ctx.done() => {
                    tasks.abort_all();
                    return Err(err.into());
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((index, outcome))) => slots[index] = Some(outcome?),
                    Some(Err(join_err)) => {
                        return Err(EngineError::Internal(format!("tool task failed: {join_err}")));
                    }
                },
            }
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| EngineError::Internal("tool batch finished with empty result slot".into()))
    }
}
