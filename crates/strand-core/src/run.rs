use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RunId;
use crate::messages::{Message, ToolCall, ToolResult};
use crate::model::Usage;

/// Final output of a run plus every tool call/result pair it produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub message: Message,
    pub usage: Usage,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    /// Turn on which the final message was produced.
    pub turns: u32,
}

/// Self-contained snapshot taken after a completed turn; enough to resume at
/// `turn + 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub turn: u32,
    pub input: Message,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub usage: Usage,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Messages to rehydrate into a fresh memory store. System messages are
    /// re-derived from the agent on resume.
    pub fn conversation(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| !m.is_system())
            .cloned()
            .collect()
    }
}
