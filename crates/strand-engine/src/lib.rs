//! Agent execution engine: the turn loop, its middleware pipeline, tool
//! dispatch and checkpoint/resume.
//!
//! ```text
//! Runner::run ─► input guardrails ─► [turn loop] ─► output guardrails
//!                                      │
//!              before_llm ─► LLM chain (onion) ─► after_llm
//!                                      │ tool calls?
//!              before_tool ─► ToolInvoker ─► after_tool ─► checkpoint
//! ```

pub mod agent;
pub mod checkpoint;
pub mod error;
pub mod guardrails;
pub mod invoker;
pub mod memory;
pub mod middleware;
pub mod mock;
pub mod registry;
pub mod runner;
pub mod settings;
pub mod state;
pub mod stream;

pub use agent::{Agent, AgentBuilder};
pub use checkpoint::InMemoryCheckpointer;
pub use error::{is_hitl_interrupt, EngineError, GuardrailViolation, HitlError, HitlStage};
pub use guardrails::{KeywordGuardrail, MaxLengthGuardrail};
pub use invoker::{ParallelInvoker, SerialInvoker, ToolInvoker};
pub use memory::InMemoryStore;
pub use middleware::{Middleware, MiddlewareChain};
pub use registry::ToolRegistry;
pub use runner::{Runner, RunnerBuilder};
pub use settings::{RunnerSettings, SettingsError};
pub use state::{State, ToolState};
pub use stream::{RunEvent, RunEventKind};

pub use strand_core as core;
pub use strand_telemetry as telemetry;
