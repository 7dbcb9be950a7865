//! Built-in [`Guardrail`]s.
//!
//! Both checks can be attached on either side of the run: register them with
//! `AgentBuilder::input_guardrail` and/or `AgentBuilder::output_guardrail`.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::json;
use strand_core::context::RunContext;
use strand_core::guardrail::{Guardrail, GuardrailResult};
use strand_core::messages::Message;

use crate::error::EngineError;

/// Blocks messages containing any banned keyword, matched
/// case-insensitively as a literal substring.
#[derive(Clone, Debug)]
pub struct KeywordGuardrail {
    name: String,
    keywords: Vec<String>,
    pattern: Regex,
}

impl KeywordGuardrail {
    pub fn new<I, S>(keywords: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(Into::into)
            .filter(|k| !k.trim().is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(EngineError::Config(
                "keyword guardrail needs at least one keyword".into(),
            ));
        }
        let alternation = keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()
            .map_err(|e| EngineError::Config(format!("invalid keyword pattern: {e}")))?;
        Ok(Self {
            name: "keyword".into(),
            keywords,
            pattern,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn check(&self, message: &Message) -> GuardrailResult {
        match self.pattern.find(&message.content) {
            Some(hit) => GuardrailResult::block(format!("banned keyword {:?}", hit.as_str()))
                .with_details(json!({ "keyword": hit.as_str().to_lowercase(), "offset": hit.start() })),
            None => GuardrailResult::pass(),
        }
    }
}

#[async_trait]
impl Guardrail for KeywordGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_input(&self, _ctx: &RunContext, message: &Message) -> GuardrailResult {
        self.check(message)
    }

    async fn validate_output(&self, _ctx: &RunContext, message: &Message) -> GuardrailResult {
        self.check(message)
    }
}

/// Blocks messages longer than `max_chars` characters.
#[derive(Clone, Debug)]
pub struct MaxLengthGuardrail {
    name: String,
    max_chars: usize,
}

impl MaxLengthGuardrail {
    pub fn new(max_chars: usize) -> Self {
        Self {
            name: "max_length".into(),
            max_chars,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn check(&self, message: &Message) -> GuardrailResult {
        let len = message.content.chars().count();
        if len > self.max_chars {
            GuardrailResult::block(format!("message is {len} characters, limit is {}", self.max_chars))
                .with_details(json!({ "length": len, "limit": self.max_chars }))
        } else {
            GuardrailResult::pass()
        }
    }
}

#[async_trait]
impl Guardrail for MaxLengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_input(&self, _ctx: &RunContext, message: &Message) -> GuardrailResult {
        self.check(message)
    }

    async fn validate_output(&self, _ctx: &RunContext, message: &Message) -> GuardrailResult {
        self.check(message)
    }
}
