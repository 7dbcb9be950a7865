#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use strand_engine::core::observer::{LlmEnd, LlmStart, Observer, ToolEnd, ToolStart};
use strand_engine::core::tools::FunctionTool;
use strand_engine::Agent;

/// Agent exposing an `add` tool that sums `a` and `b`.
pub fn calculator() -> Arc<Agent> {
    Agent::builder("calculator")
        .system_prompt("You add numbers.")
        .tool(Arc::new(
            FunctionTool::new("add", "Adds two integers", |args: Value| async move {
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(Value::from(a + b))
            })
            .with_capabilities(["math"]),
        ))
        .tool(Arc::new(
            FunctionTool::new("shell", "Runs a shell command", |_args: Value| async move {
                Ok(Value::from("ran"))
            })
            .with_capabilities(["exec"]),
        ))
        .build()
}

/// Counts observer callbacks.
#[derive(Default)]
pub struct CountingObserver {
    pub llm_starts: AtomicUsize,
    pub llm_ends: AtomicUsize,
    pub tool_starts: AtomicUsize,
    pub tool_ends: AtomicUsize,
    pub spans: Mutex<Vec<String>>,
}

impl CountingObserver {
    pub fn llm_starts(&self) -> usize {
        self.llm_starts.load(Ordering::SeqCst)
    }

    pub fn tool_starts(&self) -> usize {
        self.tool_starts.load(Ordering::SeqCst)
    }
}

impl Observer for CountingObserver {
    fn on_llm_start(&self, e: &LlmStart<'_>) {
        self.llm_starts.fetch_add(1, Ordering::SeqCst);
        self.spans.lock().push(e.ids.span_id.to_string());
    }

    fn on_llm_end(&self, _e: &LlmEnd<'_>) {
        self.llm_ends.fetch_add(1, Ordering::SeqCst);
    }

    fn on_tool_start(&self, e: &ToolStart<'_>) {
        self.tool_starts.fetch_add(1, Ordering::SeqCst);
        self.spans.lock().push(e.ids.span_id.to_string());
    }

    fn on_tool_end(&self, _e: &ToolEnd<'_>) {
        self.tool_ends.fetch_add(1, Ordering::SeqCst);
    }
}
