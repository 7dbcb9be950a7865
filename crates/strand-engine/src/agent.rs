use std::sync::Arc;

use strand_core::guardrail::Guardrail;
use strand_core::ids::AgentId;
use strand_core::tools::Tool;

use crate::registry::ToolRegistry;

/// Passive agent configuration. The runner reads it; nothing here executes.
pub struct Agent {
    id: AgentId,
    name: String,
    system_prompt: String,
    tools: ToolRegistry,
    input_guardrails: Vec<Arc<dyn Guardrail>>,
    output_guardrails: Vec<Arc<dyn Guardrail>>,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            id: None,
            name: name.into(),
            system_prompt: String::new(),
            tools: ToolRegistry::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn input_guardrails(&self) -> &[Arc<dyn Guardrail>] {
        &self.input_guardrails
    }

    pub fn output_guardrails(&self) -> &[Arc<dyn Guardrail>] {
        &self.output_guardrails
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tools", &self.tools)
            .field("input_guardrails", &self.input_guardrails.len())
            .field("output_guardrails", &self.output_guardrails.len())
            .finish()
    }
}

pub struct AgentBuilder {
    id: Option<AgentId>,
    name: String,
    system_prompt: String,
    tools: ToolRegistry,
    input_guardrails: Vec<Arc<dyn Guardrail>>,
    output_guardrails: Vec<Arc<dyn Guardrail>>,
}

impl AgentBuilder {
    pub fn id(mut self, id: AgentId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn input_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn output_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn build(self) -> Arc<Agent> {
        Arc::new(Agent {
            id: self.id.unwrap_or_default(),
            name: self.name,
            system_prompt: self.system_prompt,
            tools: self.tools,
            input_guardrails: self.input_guardrails,
            output_guardrails: self.output_guardrails,
        })
    }
}
