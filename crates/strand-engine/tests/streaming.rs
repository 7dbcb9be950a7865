//! `run_stream` follows the same loop as `run` and terminates cleanly.

mod common;

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use strand_engine::core::context::RunContext;
use strand_engine::core::errors::ModelError;
use strand_engine::core::ids::{SpanId, StepId};
use strand_engine::core::guardrail::GuardrailStage;
use strand_engine::core::messages::Message;
use strand_engine::middleware::ToolAccessPolicy;
use strand_engine::mock::{MockModel, MockResponse};
use strand_engine::stream::into_stream;
use strand_engine::{Agent, EngineError, MaxLengthGuardrail, RunEvent, RunEventKind, Runner};

use common::calculator;

fn script() -> Vec<MockResponse> {
    vec![
        MockResponse::tool_call("add", json!({"a": 20, "b": 22})),
        MockResponse::text("the answer is 42"),
    ]
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn stream_and_blocking_runs_agree() {
    let blocking = Runner::builder()
        .model(Arc::new(MockModel::new(script())))
        .build()
        .unwrap()
        .run_with_result(&RunContext::new(), &calculator(), Message::user("ask"))
        .await
        .unwrap();

    let runner = Runner::builder()
        .model(Arc::new(MockModel::new(script())))
        .build()
        .unwrap();
    let events = collect(runner.run_stream(&RunContext::new(), &calculator(), Message::user("ask"))).await;

    let last = events.last().unwrap();
    let RunEventKind::Completed(result) = &last.kind else {
        panic!("stream did not complete: {:?}", last.kind);
    };
    assert_eq!(result.message.content, blocking.message.content);
    assert_eq!(result.turns, blocking.turns);
    assert_eq!(result.usage, blocking.usage);
    assert_eq!(result.tool_results[0].result, blocking.tool_results[0].result);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let text: String = events
        .iter()
        .filter(|e| e.turn == 2)
        .filter_map(RunEvent::text_delta)
        .collect();
    assert_eq!(text, "the answer is 42");
}

#[tokio::test]
async fn events_carry_turn_scoped_ids() {
    let runner = Runner::builder()
        .model(Arc::new(MockModel::new(script())))
        .build()
        .unwrap();
    let events = collect(runner.run_stream(&RunContext::new(), &calculator(), Message::user("ask"))).await;

    let run_id = events[0].run_id.clone();
    assert!(events.iter().all(|e| e.run_id == run_id));

    let step1 = StepId::for_turn(&run_id, 1);
    for event in events.iter().filter(|e| e.turn == 1) {
        assert_eq!(event.step_id.as_ref(), Some(&step1));
        let expected_span = match event.kind {
            RunEventKind::ToolCallStart { .. } | RunEventKind::ToolResult { .. } => SpanId::tool(&step1, 0),
            _ => SpanId::llm(&step1),
        };
        assert_eq!(event.span_id.as_ref(), Some(&expected_span));
    }

    let kinds: Vec<&str> = events
        .iter()
        .filter(|e| e.turn == 1)
        .map(|e| match &e.kind {
            RunEventKind::Model(_) => "model",
            RunEventKind::AssistantMessage(_) => "assistant",
            RunEventKind::ToolCallStart { .. } => "tool_start",
            RunEventKind::ToolResult { .. } => "tool_result",
            RunEventKind::Completed(_) => "completed",
            RunEventKind::Error(_) => "error",
        })
        .collect();
    assert_eq!(kinds, vec!["model", "assistant", "tool_start", "tool_result"]);
}

#[tokio::test]
async fn mid_stream_failure_ends_with_single_error() {
    let model = Arc::new(MockModel::new(vec![MockResponse::StreamError {
        partial: "half an ans".into(),
        error: ModelError::AuthenticationFailed("revoked".into()),
    }]));
    let runner = Runner::builder().model(model).build().unwrap();
    let events = collect(runner.run_stream(&RunContext::new(), &calculator(), Message::user("ask"))).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].text_delta(), Some("half an ans"));
    assert!(matches!(
        events[1].kind,
        RunEventKind::Error(EngineError::Model(ModelError::AuthenticationFailed(_)))
    ));
}

#[tokio::test]
async fn exhausted_stream_reports_max_turns() {
    let model = Arc::new(MockModel::repeating(MockResponse::tool_call(
        "add",
        json!({"a": 1, "b": 1}),
    )));
    let runner = Runner::builder().model(model).max_turns(2).build().unwrap();
    let events: Vec<RunEvent> = into_stream(runner.run_stream(&RunContext::new(), &calculator(), Message::user("loop")))
        .collect()
        .await;

    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.kind, RunEventKind::Error(_)))
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(events.last().unwrap().is_terminal());
    assert!(matches!(
        events.last().unwrap().kind,
        RunEventKind::Error(EngineError::MaxTurnsExceeded { max_turns: 2, .. })
    ));
}

#[tokio::test]
async fn blocked_final_answer_is_never_streamed() {
    let agent = Agent::builder("terse")
        .output_guardrail(Arc::new(MaxLengthGuardrail::new(5)))
        .build();
    let model = Arc::new(MockModel::new(vec![MockResponse::text("far too long secret")]));
    let runner = Runner::builder().model(model).build().unwrap();
    let events = collect(runner.run_stream(&RunContext::new(), &agent, Message::user("hi"))).await;

    assert!(!events
        .iter()
        .any(|e| matches!(e.kind, RunEventKind::AssistantMessage(_))));
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            RunEventKind::Error(err) => Some(err),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].as_guardrail().unwrap().stage, GuardrailStage::Output);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn terminal_error_carries_the_failing_turn() {
    let model = Arc::new(MockModel::new(vec![
        MockResponse::tool_call("add", json!({"a": 1, "b": 1})),
        MockResponse::tool_call("shell", json!({"cmd": "rm"})),
    ]));
    let runner = Runner::builder()
        .model(model)
        .middleware(Arc::new(ToolAccessPolicy::new().allow_tool("add")))
        .build()
        .unwrap();
    let events = collect(runner.run_stream(&RunContext::new(), &calculator(), Message::user("go"))).await;

    let last = events.last().unwrap();
    assert!(matches!(last.kind, RunEventKind::Error(EngineError::ToolDenied { ref tool, .. }) if tool == "shell"));
    assert_eq!(last.turn, 2);
    assert_eq!(last.step_id.as_ref(), Some(&StepId::for_turn(&last.run_id, 2)));
}

#[tokio::test]
async fn completed_event_carries_the_final_step() {
    let runner = Runner::builder()
        .model(Arc::new(MockModel::new(script())))
        .build()
        .unwrap();
    let events = collect(runner.run_stream(&RunContext::new(), &calculator(), Message::user("ask"))).await;

    let last = events.last().unwrap();
    assert!(matches!(last.kind, RunEventKind::Completed(_)));
    assert_eq!(last.turn, 2);
    assert_eq!(last.step_id.as_ref(), Some(&StepId::for_turn(&last.run_id, 2)));
}
