use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ToolCallId};

/// Metadata key set on tool messages whose call failed.
pub const ERROR_METADATA_KEY: &str = "error";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation message. Treated as an immutable snapshot: every
/// field is owned, so `clone()` yields a fully independent copy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-role messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// A tool invocation requested by an assistant message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub args: serde_json::Value,
}

/// Outcome of one tool call. `id` is the join key back to the [`ToolCall`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub id: ToolCallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Wrap a tool result as a tool-role message. Failed calls carry the
    /// error string as content and `error: true` in metadata.
    pub fn tool_result(result: &ToolResult) -> Self {
        let content = match (&result.error, &result.result) {
            (Some(err), _) => err.clone(),
            (None, Some(serde_json::Value::String(s))) => s.clone(),
            (None, Some(value)) => value.to_string(),
            (None, None) => String::new(),
        };
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(result.id.clone());
        if result.error.is_some() {
            msg.metadata
                .insert(ERROR_METADATA_KEY.to_string(), serde_json::Value::Bool(true));
        }
        msg
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self.metadata.get(ERROR_METADATA_KEY),
            Some(serde_json::Value::Bool(true))
        )
    }
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: ToolCallId::new(),
            name: name.into(),
            args,
        }
    }
}

impl ToolResult {
    pub fn ok(id: ToolCallId, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: ToolCallId, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_serializes_role() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn assistant_tool_calls_detected() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall::new("search", serde_json::json!({"q": "rust"}))],
        );
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls[0].name, "search");
    }

    #[test]
    fn tool_result_message_success() {
        let call = ToolCall::new("add", serde_json::json!({"a": 1, "b": 2}));
        let msg = Message::tool_result(&ToolResult::ok(call.id.clone(), serde_json::json!(3)));
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, "3");
        assert_eq!(msg.tool_call_id.as_ref(), Some(&call.id));
        assert!(!msg.is_error());
    }

    #[test]
    fn tool_result_message_string_unquoted() {
        let msg = Message::tool_result(&ToolResult::ok(ToolCallId::new(), serde_json::json!("sunny")));
        assert_eq!(msg.content, "sunny");
    }

    #[test]
    fn tool_result_message_error_flagged() {
        let msg = Message::tool_result(&ToolResult::err(ToolCallId::new(), "boom"));
        assert_eq!(msg.content, "boom");
        assert!(msg.is_error());
        assert_eq!(msg.metadata[ERROR_METADATA_KEY], serde_json::Value::Bool(true));
    }

    #[test]
    fn clone_is_independent() {
        let original = Message::assistant_with_tools(
            "x",
            vec![ToolCall::new("t", serde_json::json!({"k": [1, 2]}))],
        )
        .with_metadata("trace", serde_json::json!({"a": 1}));
        let mut copy = original.clone();
        copy.tool_calls[0].args["k"][0] = serde_json::json!(99);
        copy.metadata.insert("trace".into(), serde_json::json!(null));
        assert_eq!(original.tool_calls[0].args["k"][0], 1);
        assert_eq!(original.metadata["trace"]["a"], 1);
    }

    #[test]
    fn role_serialization() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), r#""system""#);
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), r#""tool""#);
    }
}
