use std::sync::Arc;

use concierge_core::config::AgentsConfig;
use concierge_core::domain::context::{ContextScope, SharedContext};

use crate::definition::{AgentDefinition, AgentId, ModelBinding};
use crate::instructions::{intent_instructions, scheduler_instructions};
use crate::llm::{LlmClient, ModelSettings};
use crate::registry::{AgentRegistry, RegistryError};
use crate::tools::{FinishConversationTool, GetAppointmentInfoTool, RecordIntentTool, SelectTimeslotTool};

pub const INTENT_AGENT_ID: &str = "intent";
pub const SCHEDULER_AGENT_ID: &str = "scheduler";

pub fn intent_agent(client: Arc<dyn LlmClient>, settings: ModelSettings) -> AgentDefinition {
    AgentDefinition::new(
        AgentId::new(INTENT_AGENT_ID),
        "Intent investigator agent",
        ContextScope::Intent,
        ModelBinding { client, settings },
        intent_instructions,
    )
    .with_handoff_description(
        "A helpful agent that maintains a dialogue with customers to understand if their objective is related to personal mortgages.",
    )
    .with_tool(RecordIntentTool)
    .with_tool(FinishConversationTool)
}

pub fn scheduler_agent(client: Arc<dyn LlmClient>, settings: ModelSettings) -> AgentDefinition {
    AgentDefinition::new(
        AgentId::new(SCHEDULER_AGENT_ID),
        "Appointment scheduler agent",
        ContextScope::Scheduler,
        ModelBinding { client, settings },
        scheduler_instructions,
    )
    .with_handoff_description(
        "A helpful agent that maintains a dialogue with customers to help them schedule an appointment, or retrieve info about previously scheduled appointments.",
    )
    .with_tool(SelectTimeslotTool)
    .with_tool(GetAppointmentInfoTool)
    .with_tool(FinishConversationTool)
    .with_on_handoff(log_handed_off_account)
}

fn log_handed_off_account(context: &SharedContext, agent: &AgentDefinition) {
    tracing::info!(
        event_name = "agent.handoff_received",
        agent = %agent.id,
        account_number = context.intent().account_number.as_deref().unwrap_or("<none>"),
        "handing off request from account number"
    );
}

/// Intent and scheduler agents sharing one model client, each allowed to hand
/// the conversation to the other. The intent agent is the entry point.
pub fn default_registry(
    client: Arc<dyn LlmClient>,
    agents: &AgentsConfig,
) -> Result<AgentRegistry, RegistryError> {
    let intent = AgentId::new(INTENT_AGENT_ID);
    let scheduler = AgentId::new(SCHEDULER_AGENT_ID);

    let mut registry = AgentRegistry::new(intent.clone());
    registry.register(intent_agent(client.clone(), ModelSettings::from(&agents.intent)))?;
    registry.register(scheduler_agent(client, ModelSettings::from(&agents.scheduler)))?;
    registry.wire(&intent, vec![scheduler.clone()])?;
    registry.wire(&scheduler, vec![intent])?;
    Ok(registry)
}
