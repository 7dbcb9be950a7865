//! Tool access policies. Each one is a `before_tool` hook that fails the run
//! with [`EngineError::ToolDenied`] when a call is not permitted.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{BeforeToolHook, Middleware};
use crate::error::EngineError;
use crate::state::ToolState;

fn declared_capabilities(state: &ToolState) -> Vec<String> {
    state
        .agent
        .tools()
        .get(&state.call.name)
        .map(|tool| tool.capabilities())
        .unwrap_or_default()
}

fn deny(state: &ToolState, policy: &str, reason: String) -> EngineError {
    warn!(
        run_id = %state.run_id,
        tool = %state.call.name,
        policy,
        reason = %reason,
        "tool call denied"
    );
    EngineError::ToolDenied {
        tool: state.call.name.clone(),
        reason,
    }
}

/// Only tools named in the list may run. An empty list denies everything.
#[derive(Clone, Debug, Default)]
pub struct ToolAllowlist {
    allowed: HashSet<String>,
}

impl ToolAllowlist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl BeforeToolHook for ToolAllowlist {
    async fn before_tool(&self, state: &mut ToolState) -> Result<(), EngineError> {
        if self.allowed.contains(&state.call.name) {
            return Ok(());
        }
        Err(deny(state, "allowlist", "not in allowlist".into()))
    }
}

impl Middleware for ToolAllowlist {
    fn name(&self) -> &str {
        "tool_allowlist"
    }

    fn as_before_tool(&self) -> Option<&dyn BeforeToolHook> {
        Some(self)
    }
}

/// Deny by default. A call passes when the tool's name is allowed or when
/// the tool declares at least one allowed capability.
#[derive(Clone, Debug, Default)]
pub struct ToolAccessPolicy {
    allowed_tools: HashSet<String>,
    allowed_capabilities: HashSet<String>,
}

impl ToolAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_tool(mut self, name: impl Into<String>) -> Self {
        self.allowed_tools.insert(name.into());
        self
    }

    pub fn allow_capability(mut self, capability: impl Into<String>) -> Self {
        self.allowed_capabilities.insert(capability.into());
        self
    }

    pub fn permits(&self, name: &str, capabilities: &[String]) -> bool {
        self.allowed_tools.contains(name)
            || capabilities
                .iter()
                .any(|c| self.allowed_capabilities.contains(c))
    }
}

#[async_trait]
impl BeforeToolHook for ToolAccessPolicy {
    async fn before_tool(&self, state: &mut ToolState) -> Result<(), EngineError> {
        let capabilities = declared_capabilities(state);
        if self.permits(&state.call.name, &capabilities) {
            return Ok(());
        }
        Err(deny(
            state,
            "access_policy",
            "no allowed tool name or capability".into(),
        ))
    }
}

impl Middleware for ToolAccessPolicy {
    fn name(&self) -> &str {
        "tool_access_policy"
    }

    fn as_before_tool(&self) -> Option<&dyn BeforeToolHook> {
        Some(self)
    }
}

pub type CapabilityPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Predicates over the capability tags a tool declares. A tool passes when
/// no tag matches `deny` and, if an `allow` predicate is set, at least one
/// tag matches it. Deny wins over allow.
#[derive(Clone, Default)]
pub struct ToolCapabilityPolicy {
    allow: Option<CapabilityPredicate>,
    deny: Option<CapabilityPredicate>,
}

impl ToolCapabilityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.allow = Some(Arc::new(predicate));
        self
    }

    pub fn deny(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.deny = Some(Arc::new(predicate));
        self
    }

    /// `Err(capability)` names the tag that caused the refusal, if any.
    pub fn check(&self, capabilities: &[String]) -> Result<(), Option<String>> {
        if let Some(deny) = &self.deny {
            if let Some(hit) = capabilities.iter().find(|c| deny(c)) {
                return Err(Some(hit.clone()));
            }
        }
        match &self.allow {
            Some(allow) if !capabilities.iter().any(|c| allow(c)) => Err(None),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl BeforeToolHook for ToolCapabilityPolicy {
    async fn before_tool(&self, state: &mut ToolState) -> Result<(), EngineError> {
        let capabilities = declared_capabilities(state);
        match self.check(&capabilities) {
            Ok(()) => Ok(()),
            Err(Some(tag)) => Err(deny(state, "capability_policy", format!("capability {tag} denied"))),
            Err(None) => Err(deny(
                state,
                "capability_policy",
                "no allowed capability".into(),
            )),
        }
    }
}

impl Middleware for ToolCapabilityPolicy {
    fn name(&self) -> &str {
        "tool_capability_policy"
    }

    fn as_before_tool(&self) -> Option<&dyn BeforeToolHook> {
        Some(self)
    }
}

impl std::fmt::Debug for ToolCapabilityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCapabilityPolicy")
            .field("allow", &self.allow.is_some())
            .field("deny", &self.deny.is_some())
            .finish()
    }
}
