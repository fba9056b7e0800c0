use std::sync::{Arc, OnceLock};

use concierge_core::domain::context::{ContextScope, SharedContext};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::json;

use crate::llm::{ChatMessage, ChatRequest, LlmClient, LlmError, ModelEvent, ModelSettings, ToolCall, ToolSpec};
use crate::registry::{AgentRegistry, RegistryError};
use crate::tools::{Tool, ToolRegistry};

const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn handoff_tool_name(target: &AgentId) -> String {
    format!("{HANDOFF_TOOL_PREFIX}{target}")
}

/// The agent a `transfer_to_<id>` tool call points at, if `name` is one.
pub fn parse_handoff_tool(name: &str) -> Option<AgentId> {
    name.strip_prefix(HANDOFF_TOOL_PREFIX)
        .filter(|target| !target.is_empty())
        .map(AgentId::new)
}

pub type InstructionsFn = fn(&SharedContext, &AgentDefinition) -> String;
pub type HandoffHook = fn(&SharedContext, &AgentDefinition);

#[derive(Clone)]
pub struct ModelBinding {
    pub client: Arc<dyn LlmClient>,
    pub settings: ModelSettings,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnEvent {
    Text(String),
    AgentSwitch { target: AgentId, call: ToolCall },
    ToolInvocation(ToolCall),
}

pub type TurnStream = BoxStream<'static, Result<TurnEvent, LlmError>>;

/// Everything one turn needs besides the agent itself.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub context: SharedContext,
    /// Persisted dialogue, oldest first, including the latest customer input.
    pub history: Vec<ChatMessage>,
    /// Tool calls and their results from earlier turns of the same submission.
    pub transcript: Vec<ChatMessage>,
}

pub struct AgentDefinition {
    pub id: AgentId,
    pub name: String,
    pub handoff_description: String,
    pub model: ModelBinding,
    pub scope: ContextScope,
    tools: ToolRegistry,
    instructions: InstructionsFn,
    handoffs: OnceLock<Vec<AgentId>>,
    on_handoff: Option<HandoffHook>,
}

impl AgentDefinition {
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        scope: ContextScope,
        model: ModelBinding,
        instructions: InstructionsFn,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            handoff_description: String::new(),
            model,
            scope,
            tools: ToolRegistry::default(),
            instructions,
            handoffs: OnceLock::new(),
            on_handoff: None,
        }
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = description.into();
        self
    }

    pub fn with_tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.tools.register(tool);
        self
    }

    pub fn with_on_handoff(mut self, hook: HandoffHook) -> Self {
        self.on_handoff = Some(hook);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Wired handoff targets; empty until the registry wires this agent.
    pub fn handoffs(&self) -> &[AgentId] {
        self.handoffs.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn can_hand_off_to(&self, target: &AgentId) -> bool {
        self.handoffs().contains(target)
    }

    pub(crate) fn set_handoffs(&self, targets: Vec<AgentId>) -> Result<(), RegistryError> {
        self.handoffs.set(targets).map_err(|_| RegistryError::AlreadyWired(self.id.to_string()))
    }

    pub fn build_instructions(&self, context: &SharedContext) -> String {
        (self.instructions)(context, self)
    }

    pub fn run_on_handoff(&self, context: &SharedContext) {
        if let Some(hook) = self.on_handoff {
            hook(context, self);
        }
    }

    /// Tool specs offered to the model: this agent's tools plus one transfer
    /// tool per wired handoff target.
    pub fn tool_specs(&self, registry: &AgentRegistry) -> Vec<ToolSpec> {
        let mut specs = self.tools.specs();
        for target in self.handoffs() {
            let description = match registry.get(target) {
                Some(agent) => format!(
                    "Handoff to the {} to handle the request. {}",
                    agent.name, agent.handoff_description
                ),
                None => format!("Handoff to the {target} agent to handle the request."),
            };
            specs.push(ToolSpec {
                name: handoff_tool_name(target),
                description: description.trim_end().to_string(),
                parameters: json!({"type": "object", "properties": {}, "additionalProperties": false}),
            });
        }
        specs
    }

    pub fn chat_request(&self, request: TurnRequest, registry: &AgentRegistry) -> ChatRequest {
        let mut messages = Vec::with_capacity(1 + request.history.len() + request.transcript.len());
        messages.push(ChatMessage::system(self.build_instructions(&request.context)));
        messages.extend(request.history);
        messages.extend(request.transcript);

        ChatRequest { messages, tools: self.tool_specs(registry), settings: self.model.settings }
    }

    /// Starts a model turn and maps its events: text stays text, a
    /// `transfer_to_*` call becomes an agent switch, any other call a tool
    /// invocation.
    pub async fn start_turn(
        &self,
        request: TurnRequest,
        registry: &AgentRegistry,
    ) -> Result<TurnStream, LlmError> {
        let chat = self.chat_request(request, registry);
        let stream = self.model.client.stream_chat(chat).await?;

        Ok(Box::pin(stream.map(|event| event.map(turn_event))))
    }
}

fn turn_event(event: ModelEvent) -> TurnEvent {
    match event {
        ModelEvent::TextDelta(text) => TurnEvent::Text(text),
        ModelEvent::ToolCall(call) => match parse_handoff_tool(&call.name) {
            Some(target) => TurnEvent::AgentSwitch { target, call },
            None => TurnEvent::ToolInvocation(call),
        },
    }
}
