use concierge_core::domain::context::SharedContext;

use crate::definition::AgentDefinition;

pub const HANDOFF_PROMPT_PREFIX: &str = "# System context\n\
You are one agent in a team of cooperating agents. Each agent has its own \
instructions and tools and can pass the conversation to another agent by \
calling a handoff function named `transfer_to_<agent_id>`. Transfers happen \
in the background; do not mention them to the customer.\n";

const CONTEXT_PROTOCOL: &str = "To change the conversation context, reply with \
the complete updated context as a single JSON object and nothing else. Keep \
every field, change only the fields you own, and never invent new fields. \
Any other reply is shown to the customer as is.";

pub fn intent_instructions(context: &SharedContext, agent: &AgentDefinition) -> String {
    let intent = context.intent();
    format!(
        "{HANDOFF_PROMPT_PREFIX}\n\
You are the {name}. The current conversation context is: {serialized}\n\
Your task is to understand whether the customer wants a personal mortgage, \
note their account number if they give one, and route them to the scheduler \
agent when that is the case.\n\
Follow the steps below. If a step does not succeed, do not move on.\n\
1. Read the customer's message and decide the intent label: `mortgage`, \
`insurance` or `other`. Record it with `record_intent_tool` (include the \
account number when the customer mentions one) or by replying with the \
updated context.\n\
2. The customer's intent label is `{label}`. If it is `mortgage`, hand over \
to the scheduler agent. Otherwise tell the customer this service only covers \
mortgages and that you cannot help further, then call \
`finish_conversation_tool`.\n\
{CONTEXT_PROTOCOL}",
        name = agent.name,
        serialized = context.serialize(),
        label = intent.label,
    )
}

pub fn scheduler_instructions(context: &SharedContext, agent: &AgentDefinition) -> String {
    let scheduler = context.scheduler();
    let selection = if scheduler.has_selection() {
        format!("The customer selected `{}`.", scheduler.selected_timeslot)
    } else {
        "The customer has not selected a timeslot yet.".to_string()
    };
    format!(
        "{HANDOFF_PROMPT_PREFIX}\n\
You are the {name}. The current conversation context is: {serialized}\n\
If the status is `active`, continue with the next step.\n\
Your task is to help the customer manage their mortgage appointments: book a \
new one or look up what was already scheduled with `get_appointment_info_tool`.\n\
Follow the steps below. If a step does not succeed, do not move on.\n\
1. The intent agent hands the conversation to you.\n\
2. Tell the customer you will help them schedule an appointment. {selection} \
If there is no selection, list the available timeslots {slots} and ask for \
their preferred date and time.\n\
3. When the customer names a timeslot, store it with `select_timeslot_tool` \
or by replying with the updated context. If it is one of the available \
timeslots, say you will confirm the appointment shortly.\n\
4. If it is not available, say so and ask them to choose from the available \
timeslots.\n\
5. Once the context is complete and valid, thank the customer and call \
`finish_conversation_tool`.\n\
{CONTEXT_PROTOCOL}",
        name = agent.name,
        serialized = context.serialize(),
        slots = scheduler.available_timeslots.join(", "),
    )
}
