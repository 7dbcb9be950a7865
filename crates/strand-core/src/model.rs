use std::ops::AddAssign;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::errors::ModelError;
use crate::ids::ToolCallId;
use crate::messages::Message;

/// Token usage reported by the model, summed across every call in a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// Tool definition sent to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool { name: String },
}

/// Structured-output override attached to every request when configured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema { name: String, schema: serde_json::Value },
}

#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
}

#[derive(Clone, Debug)]
pub struct ModelResponse {
    pub message: Message,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn new(message: Message, usage: Usage) -> Self {
        Self { message, usage }
    }
}

/// Events yielded by [`Model::generate_stream`]. A well-formed stream ends
/// with exactly one `Done` or `Error`.
#[derive(Clone, Debug)]
pub enum ModelEvent {
    TextDelta {
        delta: String,
    },
    ToolCallDelta {
        index: usize,
        id: Option<ToolCallId>,
        name: Option<String>,
        args_delta: String,
    },
    Done(ModelResponse),
    Error(ModelError),
}

impl ModelEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }
}

pub type ModelStream = BoxStream<'static, ModelEvent>;

/// The LLM capability consumed by the engine. The transport behind it is
/// not the engine's concern.
#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;
    fn supports_tools(&self) -> bool;
    fn supports_streaming(&self) -> bool;

    async fn generate(
        &self,
        ctx: &RunContext,
        request: &ModelRequest,
    ) -> Result<ModelResponse, ModelError>;

    /// Models without native streaming get a one-shot stream built from
    /// [`Model::generate`].
    async fn generate_stream(
        &self,
        ctx: &RunContext,
        request: &ModelRequest,
    ) -> Result<ModelStream, ModelError> {
        let response = self.generate(ctx, request).await?;
        let mut events = Vec::with_capacity(2);
        if !response.message.content.is_empty() {
            events.push(ModelEvent::TextDelta {
                delta: response.message.content.clone(),
            });
        }
        events.push(ModelEvent::Done(response));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Echo;

    #[async_trait]
    impl Model for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn supports_tools(&self) -> bool {
            false
        }
        fn supports_streaming(&self) -> bool {
            false
        }
        async fn generate(
            &self,
            _ctx: &RunContext,
            request: &ModelRequest,
        ) -> Result<ModelResponse, ModelError> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ModelResponse::new(Message::assistant(last), Usage::new(1, 1)))
        }
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total += Usage::new(10, 5);
        total += Usage::new(3, 2);
        assert_eq!(total, Usage { input_tokens: 13, output_tokens: 7, total_tokens: 20 });
    }

    #[tokio::test]
    async fn default_stream_wraps_generate() {
        let request = ModelRequest {
            messages: vec![Message::user("ping")],
            ..Default::default()
        };
        let events: Vec<ModelEvent> = Echo
            .generate_stream(&RunContext::new(), &request)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ModelEvent::TextDelta { delta } if delta == "ping"));
        assert!(events[1].is_terminal());
    }

    #[test]
    fn response_format_serde() {
        let fmt = ResponseFormat::JsonSchema {
            name: "answer".into(),
            schema: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_value(&fmt).unwrap();
        assert_eq!(json["type"], "json_schema");
        let back: ResponseFormat = serde_json::from_value(json).unwrap();
        assert_eq!(back, fmt);
    }
}
