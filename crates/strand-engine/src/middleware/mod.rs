//! Interception points around the turn loop.
//!
//! A [`Middleware`] advertises the capabilities it implements through the
//! accessor methods; [`MiddlewareChain`] sorts registrations into one list
//! per capability when they are added, so the loop never inspects them at call time.
//!
//! Hooks run sequentially in registration order and the first error aborts
//! the run. LLM middlewares nest like an onion: the first registered is the
//! outermost wrapper and sees the call before (and the result after) every
//! later one.

pub mod hitl;
pub mod logging;
pub mod policy;
pub mod retry;
pub mod timeout;

use std::sync::Arc;

use async_trait::async_trait;
use strand_core::context::{CancelFn, RunContext};
use strand_core::messages::ToolCall;
use strand_core::model::{ModelRequest, ModelResponse};

use crate::error::EngineError;
use crate::state::{State, ToolState};

pub use hitl::{ApprovalDecision, ApprovalRequest, Approver, HitlMiddleware};
pub use logging::LoggingMiddleware;
pub use policy::{ToolAccessPolicy, ToolAllowlist, ToolCapabilityPolicy};
pub use retry::{RetryConfig, RetryMiddleware};
pub use timeout::TimeoutMiddleware;

#[async_trait]
pub trait BeforeLlmHook: Send + Sync {
    async fn before_llm(&self, state: &mut State) -> Result<(), EngineError>;
}

#[async_trait]
pub trait AfterLlmHook: Send + Sync {
    /// `state.response` is set.
    async fn after_llm(&self, state: &mut State) -> Result<(), EngineError>;
}

#[async_trait]
pub trait BeforeToolHook: Send + Sync {
    async fn before_tool(&self, state: &mut ToolState) -> Result<(), EngineError>;
}

#[async_trait]
pub trait AfterToolHook: Send + Sync {
    /// `state.result` is set.
    async fn after_tool(&self, state: &mut ToolState) -> Result<(), EngineError>;
}

/// Wraps the model call. Call `next.run(..)` to continue inward; it may be
/// called more than once.
#[async_trait]
pub trait LlmMiddleware: Send + Sync {
    async fn handle_llm(
        &self,
        ctx: &RunContext,
        state: &State,
        request: &ModelRequest,
        next: LlmNext<'_>,
    ) -> Result<ModelResponse, EngineError>;
}

/// Context produced by a [`ContextMiddleware`]. `cancel`, when present, is
/// released once the LLM call or tool batch returns.
pub struct DerivedContext {
    pub ctx: RunContext,
    pub cancel: Option<CancelFn>,
}

impl DerivedContext {
    /// Swap in `ctx` with nothing to release afterwards.
    pub fn replace(ctx: RunContext) -> Self {
        Self { ctx, cancel: None }
    }
}

impl From<(RunContext, CancelFn)> for DerivedContext {
    fn from((ctx, cancel): (RunContext, CancelFn)) -> Self {
        Self {
            ctx,
            cancel: Some(cancel),
        }
    }
}

/// Derives the context for the LLM call or a tool batch. `None` leaves the
/// context unchanged.
pub trait ContextMiddleware: Send + Sync {
    fn llm_context(&self, _ctx: &RunContext, _state: &State) -> Option<DerivedContext> {
        None
    }

    fn tool_context(
        &self,
        _ctx: &RunContext,
        _state: &State,
        _calls: &[ToolCall],
    ) -> Option<DerivedContext> {
        None
    }
}

/// A registrable unit. Override the accessor for each capability the type
/// implements, returning `Some(self)`.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn as_before_llm(&self) -> Option<&dyn BeforeLlmHook> {
        None
    }

    fn as_after_llm(&self) -> Option<&dyn AfterLlmHook> {
        None
    }

    fn as_before_tool(&self) -> Option<&dyn BeforeToolHook> {
        None
    }

    fn as_after_tool(&self) -> Option<&dyn AfterToolHook> {
        None
    }

    fn as_llm_middleware(&self) -> Option<&dyn LlmMiddleware> {
        None
    }

    fn as_context(&self) -> Option<&dyn ContextMiddleware> {
        None
    }
}

/// The innermost step of the LLM chain: the actual model call.
#[async_trait]
pub trait ModelCall: Send + Sync {
    async fn call(&self, ctx: &RunContext, request: &ModelRequest) -> Result<ModelResponse, EngineError>;
}

/// Continuation handed to an [`LlmMiddleware`]. Cheap to copy, so a
/// middleware can invoke it repeatedly.
#[derive(Clone, Copy)]
pub struct LlmNext<'a> {
    chain: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn ModelCall,
}

impl<'a> LlmNext<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>], terminal: &'a dyn ModelCall) -> Self {
        Self { chain, terminal }
    }

    pub async fn run(
        self,
        ctx: &RunContext,
        state: &State,
        request: &ModelRequest,
    ) -> Result<ModelResponse, EngineError> {
        let mut chain = self.chain;
        while let Some((head, rest)) = chain.split_first() {
            if let Some(handler) = head.as_llm_middleware() {
                let next = LlmNext {
                    chain: rest,
                    terminal: self.terminal,
                };
                return handler.handle_llm(ctx, state, request, next).await;
            }
            chain = rest;
        }
        self.terminal.call(ctx, request).await
    }
}

/// Cancel functions collected while deriving contexts. Released in reverse
/// acquisition order, at the latest on drop.
#[derive(Default)]
pub struct CancelStack {
    cancels: Vec<CancelFn>,
}

impl CancelStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cancel: CancelFn) {
        self.cancels.push(cancel);
    }

    /// Keep the cancel of `derived`, if any, and hand back its context.
    pub fn adopt(&mut self, derived: DerivedContext) -> RunContext {
        if let Some(cancel) = derived.cancel {
            self.cancels.push(cancel);
        }
        derived.ctx
    }

    pub fn len(&self) -> usize {
        self.cancels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cancels.is_empty()
    }

    pub fn release(&mut self) {
        while let Some(cancel) = self.cancels.pop() {
            cancel();
        }
    }
}

impl Drop for CancelStack {
    fn drop(&mut self) {
        self.release();
    }
}

/// Registered middlewares, pre-sorted by capability.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    all: Vec<Arc<dyn Middleware>>,
    before_llm: Vec<Arc<dyn Middleware>>,
    after_llm: Vec<Arc<dyn Middleware>>,
    before_tool: Vec<Arc<dyn Middleware>>,
    after_tool: Vec<Arc<dyn Middleware>>,
    llm: Vec<Arc<dyn Middleware>>,
    context: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        if middleware.as_before_llm().is_some() {
            self.before_llm.push(Arc::clone(&middleware));
        }
        if middleware.as_after_llm().is_some() {
            self.after_llm.push(Arc::clone(&middleware));
        }
        if middleware.as_before_tool().is_some() {
            self.before_tool.push(Arc::clone(&middleware));
        }
        if middleware.as_after_tool().is_some() {
            self.after_tool.push(Arc::clone(&middleware));
        }
        if middleware.as_llm_middleware().is_some() {
            self.llm.push(Arc::clone(&middleware));
        }
        if middleware.as_context().is_some() {
            self.context.push(Arc::clone(&middleware));
        }
        self.all.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.all.iter().map(|m| m.name().to_string()).collect()
    }

    pub async fn before_llm(&self, state: &mut State) -> Result<(), EngineError> {
        for mw in &self.before_llm {
            if let Some(hook) = mw.as_before_llm() {
                hook.before_llm(state).await?;
            }
        }
        Ok(())
    }

    pub async fn after_llm(&self, state: &mut State) -> Result<(), EngineError> {
        for mw in &self.after_llm {
            if let Some(hook) = mw.as_after_llm() {
                hook.after_llm(state).await?;
            }
        }
        Ok(())
    }

    pub async fn before_tool(&self, state: &mut ToolState) -> Result<(), EngineError> {
        for mw in &self.before_tool {
            if let Some(hook) = mw.as_before_tool() {
                hook.before_tool(state).await?;
            }
        }
        Ok(())
    }

    pub async fn after_tool(&self, state: &mut ToolState) -> Result<(), EngineError> {
        for mw in &self.after_tool {
            if let Some(hook) = mw.as_after_tool() {
                hook.after_tool(state).await?;
            }
        }
        Ok(())
    }

    /// Entry point of the LLM onion around `terminal`.
    pub fn llm_next<'a>(&'a self, terminal: &'a dyn ModelCall) -> LlmNext<'a> {
        LlmNext::new(&self.llm, terminal)
    }

    /// Fold every context middleware over `ctx` in registration order.
    pub fn llm_context(&self, ctx: &RunContext, state: &State, cancels: &mut CancelStack) -> RunContext {
        let mut current = ctx.clone();
        for mw in &self.context {
            if let Some(derived) = mw.as_context().and_then(|c| c.llm_context(&current, state)) {
                current = cancels.adopt(derived);
            }
        }
        current
    }

    pub fn tool_context(
        &self,
        ctx: &RunContext,
        state: &State,
        calls: &[ToolCall],
        cancels: &mut CancelStack,
    ) -> RunContext {
        let mut current = ctx.clone();
        for mw in &self.context {
            if let Some(derived) = mw
                .as_context()
                .and_then(|c| c.tool_context(&current, state, calls))
            {
                current = cancels.adopt(derived);
            }
        }
        current
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middlewares", &self.names())
            .finish()
    }
}
