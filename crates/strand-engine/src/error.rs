use std::fmt;

use serde::{Deserialize, Serialize};
use strand_core::errors::{CheckpointError, ContextError, MemoryError, ModelError};
use strand_core::guardrail::GuardrailStage;
use strand_core::ids::{AgentId, RunId, SpanId, StepId};

/// Which interception point raised a human-in-the-loop interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlStage {
    Llm,
    Tool,
}

impl fmt::Display for HitlStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm => f.write_str("llm"),
            Self::Tool => f.write_str("tool"),
        }
    }
}

/// A run paused for a human decision. Carries everything a caller needs to
/// present the decision and later resume from the run's last checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("interrupted for approval at {stage} stage (run {run_id}, span {span_id}): {reason}")]
pub struct HitlError {
    pub stage: HitlStage,
    pub run_id: RunId,
    pub step_id: StepId,
    pub span_id: SpanId,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub tool_name: Option<String>,
    pub reason: String,
}

/// A guardrail refused the input or the final output.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("guardrail {guardrail} blocked {stage}: {reason}")]
pub struct GuardrailViolation {
    pub guardrail: String,
    pub stage: GuardrailStage,
    pub reason: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("tool {tool} denied: {reason}")]
    ToolDenied { tool: String, reason: String },

    #[error(transparent)]
    Interrupted(#[from] HitlError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailViolation),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("checkpoint not found for run {0}")]
    CheckpointNotFound(RunId),

    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(CheckpointError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("hook {hook} failed: {reason}")]
    Hook { hook: String, reason: String },

    #[error("exceeded max turns ({max_turns}) for run {run_id}")]
    MaxTurnsExceeded { max_turns: u32, run_id: RunId },

    #[error("run cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Internal(String),
}

impl From<ContextError> for EngineError {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

impl From<CheckpointError> for EngineError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::NotFound(run_id) => Self::CheckpointNotFound(RunId::from_raw(run_id)),
            CheckpointError::Invalid(reason) => Self::InvalidCheckpoint(reason),
            other => Self::Checkpoint(other),
        }
    }
}

impl EngineError {
    pub fn hook(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Hook {
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    /// Only model errors classified retryable qualify; interrupts, policy
    /// denials and structural failures never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Model(e) if e.is_retryable())
    }

    pub fn as_hitl(&self) -> Option<&HitlError> {
        match self {
            Self::Interrupted(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_guardrail(&self) -> Option<&GuardrailViolation> {
        match self {
            Self::Guardrail(e) => Some(e),
            _ => None,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Model(e) => e.error_kind(),
            Self::ToolDenied { .. } => "tool_denied",
            Self::Interrupted(_) => "interrupted",
            Self::Guardrail(_) => "guardrail",
            Self::Config(_) => "config",
            Self::UnknownTool(_) => "unknown_tool",
            Self::CheckpointNotFound(_) => "checkpoint_not_found",
            Self::InvalidCheckpoint(_) => "invalid_checkpoint",
            Self::Checkpoint(_) => "checkpoint",
            Self::Memory(_) => "memory",
            Self::Hook { .. } => "hook",
            Self::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Internal(_) => "internal",
        }
    }
}

/// True when `err` is a human-in-the-loop interrupt rather than a failure.
pub fn is_hitl_interrupt(err: &EngineError) -> bool {
    err.as_hitl().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hitl() -> HitlError {
        let run_id = RunId::from_raw("run_1");
        let step_id = StepId::for_turn(&run_id, 1);
        HitlError {
            stage: HitlStage::Tool,
            span_id: SpanId::tool(&step_id, 0),
            step_id,
            run_id,
            agent_id: AgentId::from_raw("agent_1"),
            agent_name: "ops".into(),
            tool_name: Some("deploy".into()),
            reason: "needs sign-off".into(),
        }
    }

    #[test]
    fn hitl_detection() {
        let err = EngineError::from(hitl());
        assert!(is_hitl_interrupt(&err));
        assert_eq!(err.as_hitl().unwrap().tool_name.as_deref(), Some("deploy"));
        assert!(!err.is_retryable());

        let plain = EngineError::Model(ModelError::ServerError { status: 500, body: "x".into() });
        assert!(!is_hitl_interrupt(&plain));
        assert!(plain.is_retryable());
    }

    #[test]
    fn hitl_display_names_stage_and_reason() {
        let msg = EngineError::from(hitl()).to_string();
        assert!(msg.contains("tool stage"), "{msg}");
        assert!(msg.contains("needs sign-off"), "{msg}");
    }

    #[test]
    fn guardrail_display() {
        let err = EngineError::from(GuardrailViolation {
            guardrail: "keywords".into(),
            stage: GuardrailStage::Input,
            reason: "banned word".into(),
            details: None,
        });
        assert_eq!(err.to_string(), "guardrail keywords blocked input: banned word");
        assert!(err.as_guardrail().is_some());
    }

    #[test]
    fn context_errors_map() {
        assert!(matches!(EngineError::from(ContextError::Cancelled), EngineError::Cancelled));
        assert!(matches!(
            EngineError::from(ContextError::DeadlineExceeded),
            EngineError::DeadlineExceeded
        ));
    }

    #[test]
    fn checkpoint_not_found_maps_to_structural_error() {
        let err = EngineError::from(CheckpointError::NotFound("run_9".into()));
        assert!(matches!(err, EngineError::CheckpointNotFound(ref id) if id.as_str() == "run_9"));
    }

    #[test]
    fn timeout_model_error_is_retryable() {
        assert!(EngineError::Model(ModelError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(!EngineError::ToolDenied { tool: "x".into(), reason: "no".into() }.is_retryable());
    }
}
