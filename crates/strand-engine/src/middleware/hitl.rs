use std::sync::Arc;

use async_trait::async_trait;
use strand_core::context::RunContext;
use strand_core::ids::{AgentId, RunId, SpanId, StepId};
use strand_core::messages::ToolCall;
use strand_core::model::{ModelRequest, ModelResponse};
use tracing::info;

use super::{BeforeToolHook, LlmMiddleware, LlmNext, Middleware};
use crate::error::{EngineError, HitlError, HitlStage};
use crate::state::{State, ToolState};

/// What the approver is asked to decide on.
#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    pub stage: HitlStage,
    pub run_id: RunId,
    pub step_id: StepId,
    pub span_id: SpanId,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub turn: u32,
    /// Set at the tool stage.
    pub tool_call: Option<ToolCall>,
}

impl ApprovalRequest {
    fn into_interrupt(self, reason: String) -> HitlError {
        HitlError {
            stage: self.stage,
            run_id: self.run_id,
            step_id: self.step_id,
            span_id: self.span_id,
            agent_id: self.agent_id,
            agent_name: self.agent_name,
            tool_name: self.tool_call.map(|c| c.name),
            reason,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Allow,
    Interrupt { reason: String },
}

impl ApprovalDecision {
    pub fn interrupt(reason: impl Into<String>) -> Self {
        Self::Interrupt {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(
        &self,
        ctx: &RunContext,
        request: &ApprovalRequest,
    ) -> Result<ApprovalDecision, EngineError>;
}

#[async_trait]
impl<F> Approver for F
where
    F: Fn(&ApprovalRequest) -> ApprovalDecision + Send + Sync,
{
    async fn approve(
        &self,
        _ctx: &RunContext,
        request: &ApprovalRequest,
    ) -> Result<ApprovalDecision, EngineError> {
        Ok(self(request))
    }
}

/// Pauses the run for a human decision before model calls and/or tool calls.
/// An interrupt surfaces as [`EngineError::Interrupted`]; the run can be
/// resumed from its last checkpoint once the decision is made.
#[derive(Clone)]
pub struct HitlMiddleware {
    approver: Arc<dyn Approver>,
    gate_llm: bool,
    gate_tools: bool,
}

impl HitlMiddleware {
    pub fn new(approver: Arc<dyn Approver>) -> Self {
        Self {
            approver,
            gate_llm: true,
            gate_tools: true,
        }
    }

    pub fn tools_only(approver: Arc<dyn Approver>) -> Self {
        Self {
            gate_llm: false,
            ..Self::new(approver)
        }
    }

    pub fn llm_only(approver: Arc<dyn Approver>) -> Self {
        Self {
            gate_tools: false,
            ..Self::new(approver)
        }
    }

    async fn decide(&self, ctx: &RunContext, request: ApprovalRequest) -> Result<(), EngineError> {
        match self.approver.approve(ctx, &request).await? {
            ApprovalDecision::Allow => Ok(()),
            ApprovalDecision::Interrupt { reason } => {
                info!(
                    run_id = %request.run_id,
                    span_id = %request.span_id,
                    stage = %request.stage,
                    reason = %reason,
                    "run interrupted for approval"
                );
                Err(request.into_interrupt(reason).into())
            }
        }
    }
}

#[async_trait]
impl LlmMiddleware for HitlMiddleware {
    async fn handle_llm(
        &self,
        ctx: &RunContext,
        state: &State,
        request: &ModelRequest,
        next: LlmNext<'_>,
    ) -> Result<ModelResponse, EngineError> {
        self.decide(
            ctx,
            ApprovalRequest {
                stage: HitlStage::Llm,
                run_id: state.run_id.clone(),
                step_id: state.step_id.clone(),
                span_id: state.span_id.clone(),
                agent_id: state.agent.id().clone(),
                agent_name: state.agent.name().to_string(),
                turn: state.turn,
                tool_call: None,
            },
        )
        .await?;
        next.run(ctx, state, request).await
    }
}

#[async_trait]
impl BeforeToolHook for HitlMiddleware {
    async fn before_tool(&self, state: &mut ToolState) -> Result<(), EngineError> {
        self.decide(
            &state.ctx,
            ApprovalRequest {
                stage: HitlStage::Tool,
                run_id: state.run_id.clone(),
                step_id: state.step_id.clone(),
                span_id: state.span_id.clone(),
                agent_id: state.agent.id().clone(),
                agent_name: state.agent.name().to_string(),
                turn: state.turn,
                tool_call: Some(state.call.clone()),
            },
        )
        .await
    }
}

impl Middleware for HitlMiddleware {
    fn name(&self) -> &str {
        "hitl"
    }

    fn as_llm_middleware(&self) -> Option<&dyn LlmMiddleware> {
        self.gate_llm.then_some(self as &dyn LlmMiddleware)
    }

    fn as_before_tool(&self) -> Option<&dyn BeforeToolHook> {
        self.gate_tools.then_some(self as &dyn BeforeToolHook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_hitl_interrupt;
    use crate::middleware::test_support::{state, tool_state, Answer};
    use crate::middleware::MiddlewareChain;

    fn deny_deploys(request: &ApprovalRequest) -> ApprovalDecision {
        match &request.tool_call {
            Some(call) if call.name == "deploy" => ApprovalDecision::interrupt("deploy needs sign-off"),
            _ => ApprovalDecision::Allow,
        }
    }

    #[tokio::test]
    async fn tool_interrupt_carries_correlation() {
        let mw = HitlMiddleware::tools_only(Arc::new(deny_deploys));
        let mut state = tool_state(ToolCall::new("deploy", serde_json::json!({"env": "prod"})));
        let err = BeforeToolHook::before_tool(&mw, &mut state).await.unwrap_err();

        assert!(is_hitl_interrupt(&err));
        let hitl = err.as_hitl().unwrap();
        assert_eq!(hitl.stage, HitlStage::Tool);
        assert_eq!(hitl.run_id.as_str(), "run_test");
        assert_eq!(hitl.span_id.as_str(), "run_test.step.1.tool.0");
        assert_eq!(hitl.agent_name, "tester");
        assert_eq!(hitl.tool_name.as_deref(), Some("deploy"));
        assert_eq!(hitl.reason, "deploy needs sign-off");
    }

    #[tokio::test]
    async fn allowed_tool_passes() {
        let mw = HitlMiddleware::tools_only(Arc::new(deny_deploys));
        let mut state = tool_state(ToolCall::new("read", serde_json::json!({})));
        assert!(BeforeToolHook::before_tool(&mw, &mut state).await.is_ok());
    }

    #[tokio::test]
    async fn llm_interrupt_skips_model() {
        let approver = |_req: &ApprovalRequest| ApprovalDecision::interrupt("review prompt");
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(HitlMiddleware::llm_only(Arc::new(approver))));

        let terminal = Answer::new("unused");
        let err = chain
            .llm_next(&terminal)
            .run(&RunContext::new(), &state(), &ModelRequest::default())
            .await
            .unwrap_err();
        assert_eq!(terminal.count(), 0);
        let hitl = err.as_hitl().unwrap();
        assert_eq!(hitl.stage, HitlStage::Llm);
        assert!(hitl.tool_name.is_none());
        assert_eq!(hitl.span_id.as_str(), "run_test.step.1.llm");
    }

    #[test]
    fn capability_flags() {
        let allow = |_req: &ApprovalRequest| ApprovalDecision::Allow;
        let both = HitlMiddleware::new(Arc::new(allow));
        assert!(both.as_llm_middleware().is_some() && both.as_before_tool().is_some());
        let tools = HitlMiddleware::tools_only(Arc::new(allow));
        assert!(tools.as_llm_middleware().is_none());
        let llm = HitlMiddleware::llm_only(Arc::new(allow));
        assert!(llm.as_before_tool().is_none());
    }
}
