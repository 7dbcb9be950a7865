use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(RunId, "run");
branded_id!(MessageId, "msg");
branded_id!(ToolCallId, "call");
branded_id!(AgentId, "agent");

/// One turn of a run: `<run>.step.<N>`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn for_turn(run_id: &RunId, turn: u32) -> Self {
        Self(format!("{run_id}.step.{turn}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One LLM call (`<step>.llm`) or one tool call (`<step>.tool.<I>`) within a step.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(String);

impl SpanId {
    pub fn llm(step_id: &StepId) -> Self {
        Self(format!("{step_id}.llm"))
    }

    pub fn tool(step_id: &StepId, index: usize) -> Self {
        Self(format!("{step_id}.tool.{index}"))
    }

    /// Span covering a whole tool batch; individual calls use [`SpanId::tool`].
    pub fn tools(step_id: &StepId) -> Self {
        Self(format!("{step_id}.tools"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_prefix() {
        let id = RunId::new();
        assert!(id.as_str().starts_with("run_"), "got: {id}");
    }

    #[test]
    fn tool_call_id_has_prefix() {
        let id = ToolCallId::new();
        assert!(id.as_str().starts_with("call_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = RunId::new();
        let b = RunId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = AgentId::new();
        let parsed: AgentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = RunId::from_raw("custom-run");
        assert_eq!(id.as_str(), "custom-run");
        assert!(RunId::from_raw("").is_empty());
    }

    #[test]
    fn step_and_span_hierarchy() {
        let run = RunId::from_raw("run_1");
        let step = StepId::for_turn(&run, 3);
        assert_eq!(step.as_str(), "run_1.step.3");
        assert_eq!(SpanId::llm(&step).as_str(), "run_1.step.3.llm");
        assert_eq!(SpanId::tool(&step, 0).as_str(), "run_1.step.3.tool.0");
        assert_eq!(SpanId::tool(&step, 2).as_str(), "run_1.step.3.tool.2");
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<RunId> = (0..100).map(|_| RunId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
