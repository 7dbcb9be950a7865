use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::errors::ToolError;
use crate::model::ToolSpec;

/// Trait implemented by each tool an agent exposes.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Capability tags (e.g. `"network"`, `"fs.write"`) consulted by access policies.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;

    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// A [`Tool`] backed by an async closure.
pub struct FunctionTool<F, Fut> {
    name: String,
    description: String,
    schema: serde_json::Value,
    capabilities: Vec<String>,
    handler: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FunctionTool<F, Fut>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({"type": "object"}),
            capabilities: Vec::new(),
            handler,
            _fut: PhantomData,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl<F, Fut> Tool for FunctionTool<F, Fut>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    async fn execute(
        &self,
        _ctx: &RunContext,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        (self.handler)(args).await
    }
}
