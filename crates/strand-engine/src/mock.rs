//! Scripted [`Model`] for deterministic tests without a real LLM.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use strand_core::context::RunContext;
use strand_core::errors::ModelError;
use strand_core::messages::{Message, ToolCall};
use strand_core::model::{Model, ModelEvent, ModelRequest, ModelResponse, ModelStream, Usage};

/// Pre-programmed answers, consumed one per model call.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    /// Assistant message requesting tools. Each call gets a fresh call id.
    ToolCalls {
        content: String,
        calls: Vec<(String, serde_json::Value)>,
    },
    /// `generate`/`generate_stream` fails outright.
    Error(ModelError),
    /// Streaming only: emit `partial` as a delta, then fail mid-stream.
    StreamError { partial: String, error: ModelError },
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn tool_call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::ToolCalls {
            content: String::new(),
            calls: vec![(name.into(), args)],
        }
    }

    pub fn tool_calls<I, S>(calls: I) -> Self
    where
        I: IntoIterator<Item = (S, serde_json::Value)>,
        S: Into<String>,
    {
        Self::ToolCalls {
            content: String::new(),
            calls: calls.into_iter().map(|(n, a)| (n.into(), a)).collect(),
        }
    }

    pub fn error(error: ModelError) -> Self {
        Self::Error(error)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Returns responses in sequence and records every request it receives.
pub struct MockModel {
    responses: Vec<MockResponse>,
    repeat_last: bool,
    supports_tools: bool,
    usage: Usage,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockModel {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            repeat_last: false,
            supports_tools: true,
            usage: Usage::new(10, 5),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `response`.
    pub fn repeating(response: MockResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    pub fn without_tool_support(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    fn next_response(&self, request: &ModelRequest) -> Result<MockResponse, ModelError> {
        self.requests.lock().push(request.clone());
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let picked = match self.responses.get(idx) {
            Some(response) => Some(response),
            None if self.repeat_last => self.responses.last(),
            None => None,
        };
        picked.cloned().ok_or_else(|| {
            ModelError::InvalidRequest(format!("MockModel: no response configured for call {idx}"))
        })
    }

    /// Unrolls nested delays, then builds the assistant message.
    async fn resolve(&self, ctx: &RunContext, mut response: MockResponse) -> Result<Resolved, ModelError> {
        loop {
            match response {
                MockResponse::Delay(delay, inner) => {
                    if ctx.run(tokio::time::sleep(delay)).await.is_err() {
                        return Err(ModelError::Cancelled);
                    }
                    response = *inner;
                }
                MockResponse::Text(text) => {
                    return Ok(Resolved::Message(Message::assistant(text)));
                }
                MockResponse::ToolCalls { content, calls } => {
                    let calls = calls
                        .into_iter()
                        .map(|(name, args)| ToolCall::new(name, args))
                        .collect();
                    return Ok(Resolved::Message(Message::assistant_with_tools(content, calls)));
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::StreamError { partial, error } => {
                    return Ok(Resolved::Broken { partial, error });
                }
            }
        }
    }
}

enum Resolved {
    Message(Message),
    Broken { partial: String, error: ModelError },
}

#[async_trait]
impl Model for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        ctx: &RunContext,
        request: &ModelRequest,
    ) -> Result<ModelResponse, ModelError> {
        let response = self.next_response(request)?;
        match self.resolve(ctx, response).await? {
            Resolved::Message(message) => Ok(ModelResponse::new(message, self.usage)),
            Resolved::Broken { error, .. } => Err(error),
        }
    }

    async fn generate_stream(
        &self,
        ctx: &RunContext,
        request: &ModelRequest,
    ) -> Result<ModelStream, ModelError> {
        let response = self.next_response(request)?;
        let mut events = Vec::new();
        match self.resolve(ctx, response).await? {
            Resolved::Message(message) => {
                for word in message.content.split_inclusive(' ') {
                    events.push(ModelEvent::TextDelta {
                        delta: word.to_string(),
                    });
                }
                for (index, call) in message.tool_calls.iter().enumerate() {
                    events.push(ModelEvent::ToolCallDelta {
                        index,
                        id: Some(call.id.clone()),
                        name: Some(call.name.clone()),
                        args_delta: call.args.to_string(),
                    });
                }
                events.push(ModelEvent::Done(ModelResponse::new(message, self.usage)));
            }
            Resolved::Broken { partial, error } => {
                events.push(ModelEvent::TextDelta { delta: partial });
                events.push(ModelEvent::Error(error));
            }
        }
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
