pub mod checkpoint;
pub mod context;
pub mod errors;
pub mod guardrail;
pub mod ids;
pub mod memory;
pub mod messages;
pub mod model;
pub mod observer;
pub mod run;
pub mod tools;

pub use context::{CancelFn, RunContext};
pub use ids::{AgentId, MessageId, RunId, SpanId, StepId, ToolCallId};
pub use messages::{Message, Role, ToolCall, ToolResult};
pub use run::{Checkpoint, RunResult};
