use strand_core::ids::{RunId, SpanId, StepId};
use strand_core::messages::{Message, ToolCall, ToolResult};
use strand_core::model::ModelEvent;
use strand_core::run::RunResult;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::EngineError;

/// One item on the `run_stream` channel, stamped with the ids of the span
/// that produced it.
#[derive(Debug)]
pub struct RunEvent {
    pub run_id: RunId,
    pub step_id: Option<StepId>,
    pub span_id: Option<SpanId>,
    pub turn: u32,
    pub kind: RunEventKind,
}

#[derive(Debug)]
pub enum RunEventKind {
    /// Text and tool-call deltas relayed from the model stream. The model's
    /// own `Done`/`Error` surface as `AssistantMessage` or the run's `Error`.
    Model(ModelEvent),
    /// The aggregated assistant message once the model stream is done. A
    /// final answer is only emitted after the output guardrails pass.
    AssistantMessage(Message),
    ToolCallStart { call: ToolCall },
    ToolResult { result: ToolResult },
    /// Last event of a successful run. Terminal events carry the last turn
    /// entered and its step id, or turn 0 when the run failed before one.
    Completed(Box<RunResult>),
    /// Last event of a failed run. Nothing follows it.
    Error(EngineError),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, RunEventKind::Completed(_) | RunEventKind::Error(_))
    }

    pub fn text_delta(&self) -> Option<&str> {
        match &self.kind {
            RunEventKind::Model(ModelEvent::TextDelta { delta }) => Some(delta),
            _ => None,
        }
    }
}

/// Adapt a `run_stream` receiver into a `Stream` for `StreamExt` combinators.
pub fn into_stream(rx: mpsc::Receiver<RunEvent>) -> ReceiverStream<RunEvent> {
    ReceiverStream::new(rx)
}
