use std::collections::HashMap;

use async_trait::async_trait;
use concierge_core::domain::context::{IntentLabel, SharedContext};
use concierge_core::domain::session::SessionId;
use concierge_db::{RepositoryError, SessionStore};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::ToolSpec;

/// What a tool sees while it runs: the live session and a snapshot of the
/// context at the moment of the call.
pub struct ToolContext<'a> {
    pub session_id: &'a SessionId,
    pub context: &'a SharedContext,
    pub store: &'a dyn SessionStore,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    /// A proposed context; the loop merges it with the calling agent's scope.
    ContextUpdate { context: SharedContext, summary: String },
    Data(Value),
}

impl ToolOutcome {
    /// Text returned to the model as the tool result.
    pub fn to_model_result(&self) -> String {
        match self {
            Self::ContextUpdate { summary, .. } => summary.clone(),
            Self::Data(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("tool `{0}` is not available to this agent")]
    Unknown(String),
    #[error("session store failed during tool call: {0}")]
    Session(#[from] RepositoryError),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;
    async fn execute(&self, ctx: ToolContext<'_>, input: Value) -> Result<ToolOutcome, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    /// Specs sorted by name so requests are stable across runs.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        specs.sort_by(|left, right| left.name.cmp(&right.name));
        specs
    }

    /// Parses the streamed argument text and runs the named tool.
    pub async fn invoke(
        &self,
        name: &str,
        ctx: ToolContext<'_>,
        arguments: &str,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        let input = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments).map_err(|error| ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: error.to_string(),
            })?
        };
        tool.execute(ctx, input).await
    }
}

fn no_parameters() -> Value {
    json!({"type": "object", "properties": {}, "additionalProperties": false})
}

fn parse_input<T>(tool: &str, input: Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(input).map_err(|error| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: error.to_string(),
    })
}

pub struct FinishConversationTool;

#[async_trait]
impl Tool for FinishConversationTool {
    fn name(&self) -> &'static str {
        "finish_conversation_tool"
    }

    fn description(&self) -> &'static str {
        "Finishes the conversation"
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, ctx: ToolContext<'_>, _input: Value) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::ContextUpdate {
            context: ctx.context.completed(),
            summary: "conversation marked completed".to_string(),
        })
    }
}

pub struct GetAppointmentInfoTool;

#[async_trait]
impl Tool for GetAppointmentInfoTool {
    fn name(&self) -> &'static str {
        "get_appointment_info_tool"
    }

    fn description(&self) -> &'static str {
        "Retrieves information about a scheduled appointment"
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, ctx: ToolContext<'_>, _input: Value) -> Result<ToolOutcome, ToolError> {
        let records = ctx.store.read_all(ctx.session_id).await?;
        let history: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "sequence": record.sequence,
                    "role": record.role.as_str(),
                    "agent": record.agent,
                    "content": record.content,
                })
            })
            .collect();

        Ok(ToolOutcome::Data(json!({
            "session_id": ctx.session_id.as_str(),
            "selected_timeslot": ctx.context.scheduler().selected_timeslot,
            "status": ctx.context.status(),
            "history": history,
        })))
    }
}

pub struct SelectTimeslotTool;

#[derive(Deserialize)]
struct SelectTimeslotInput {
    timeslot: String,
}

#[async_trait]
impl Tool for SelectTimeslotTool {
    fn name(&self) -> &'static str {
        "select_timeslot_tool"
    }

    fn description(&self) -> &'static str {
        "Records the timeslot the customer chose. Only offered timeslots are accepted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timeslot": {
                    "type": "string",
                    "description": "One of the available timeslots, verbatim"
                }
            },
            "required": ["timeslot"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: ToolContext<'_>, input: Value) -> Result<ToolOutcome, ToolError> {
        let input: SelectTimeslotInput = parse_input(self.name(), input)?;
        let timeslot = input.timeslot.trim();
        let scheduler = ctx.context.scheduler();

        if !scheduler.is_available(timeslot) {
            return Ok(ToolOutcome::Data(json!({
                "accepted": false,
                "requested": timeslot,
                "available_timeslots": scheduler.available_timeslots,
            })));
        }

        Ok(ToolOutcome::ContextUpdate {
            context: ctx.context.with_selected_timeslot(timeslot),
            summary: format!("timeslot {timeslot} selected"),
        })
    }
}

pub struct RecordIntentTool;

#[derive(Deserialize)]
struct RecordIntentInput {
    label: IntentLabel,
    #[serde(default)]
    account_number: Option<String>,
}

#[async_trait]
impl Tool for RecordIntentTool {
    fn name(&self) -> &'static str {
        "record_intent_tool"
    }

    fn description(&self) -> &'static str {
        "Records what the customer wants and, when given, their account number"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "label": {"type": "string", "enum": ["mortgage", "insurance", "other"]},
                "account_number": {"type": "string"}
            },
            "required": ["label"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: ToolContext<'_>, input: Value) -> Result<ToolOutcome, ToolError> {
        let input: RecordIntentInput = parse_input(self.name(), input)?;
        let account_number = input
            .account_number
            .map(|account| account.trim().to_string())
            .filter(|account| !account.is_empty())
            .or_else(|| ctx.context.intent().account_number.clone());

        Ok(ToolOutcome::ContextUpdate {
            context: ctx.context.with_intent(input.label, account_number),
            summary: format!("intent recorded as {}", input.label),
        })
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::context::{ConversationStatus, IntentLabel, SharedContext};
    use concierge_core::domain::session::{NewSessionRecord, SessionId};
    use concierge_db::{InMemorySessionStore, SessionStore};
    use serde_json::json;

    use crate::tools::{
        FinishConversationTool, GetAppointmentInfoTool, RecordIntentTool, SelectTimeslotTool,
        ToolContext, ToolError, ToolOutcome, ToolRegistry,
    };

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::default();
        tools.register(FinishConversationTool);
        tools.register(GetAppointmentInfoTool);
        tools.register(SelectTimeslotTool);
        tools.register(RecordIntentTool);
        tools
    }

    #[tokio::test]
    async fn finish_marks_the_context_completed() {
        let store = InMemorySessionStore::default();
        let session = SessionId::new("session_123");
        let context = SharedContext::default();

        let outcome = registry()
            .invoke(
                "finish_conversation_tool",
                ToolContext { session_id: &session, context: &context, store: &store },
                "",
            )
            .await
            .expect("finish should succeed");

        match outcome {
            ToolOutcome::ContextUpdate { context, .. } => {
                assert_eq!(context.status(), ConversationStatus::Completed)
            }
            other => panic!("expected context update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn selecting_an_unoffered_slot_lists_the_offer() {
        let store = InMemorySessionStore::default();
        let session = SessionId::new("session_123");
        let context = SharedContext::default();

        let outcome = registry()
            .invoke(
                "select_timeslot_tool",
                ToolContext { session_id: &session, context: &context, store: &store },
                r#"{"timeslot":"2023-10-02 09:00"}"#,
            )
            .await
            .expect("rejection is not an error");

        let ToolOutcome::Data(value) = outcome else {
            panic!("expected data outcome");
        };
        assert_eq!(value["accepted"], json!(false));
        assert_eq!(value["available_timeslots"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn selecting_an_offered_slot_updates_the_selection() {
        let store = InMemorySessionStore::default();
        let session = SessionId::new("session_123");
        let context = SharedContext::default();

        let outcome = registry()
            .invoke(
                "select_timeslot_tool",
                ToolContext { session_id: &session, context: &context, store: &store },
                r#"{"timeslot":" 2023-10-01 11:00 "}"#,
            )
            .await
            .expect("selection should succeed");

        let ToolOutcome::ContextUpdate { context, .. } = outcome else {
            panic!("expected context update");
        };
        assert_eq!(context.scheduler().selected_timeslot, "2023-10-01 11:00");
    }

    #[tokio::test]
    async fn record_intent_keeps_a_known_account_number() {
        let store = InMemorySessionStore::default();
        let session = SessionId::new("session_123");
        let context =
            SharedContext::default().with_intent(IntentLabel::Unknown, Some("ACC-7".to_string()));

        let outcome = registry()
            .invoke(
                "record_intent_tool",
                ToolContext { session_id: &session, context: &context, store: &store },
                r#"{"label":"mortgage"}"#,
            )
            .await
            .expect("record should succeed");

        let ToolOutcome::ContextUpdate { context, summary } = outcome else {
            panic!("expected context update");
        };
        assert_eq!(context.intent().label, IntentLabel::Mortgage);
        assert_eq!(context.intent().account_number.as_deref(), Some("ACC-7"));
        assert_eq!(summary, "intent recorded as mortgage");
    }

    #[tokio::test]
    async fn appointment_info_reads_the_live_session() {
        let store = InMemorySessionStore::default();
        let session = SessionId::new("session-live");
        store
            .append(&session, NewSessionRecord::user("book me in"))
            .await
            .expect("append should succeed");
        store
            .append(&SessionId::new("session_123"), NewSessionRecord::user("someone else"))
            .await
            .expect("append should succeed");
        let context = SharedContext::default();

        let outcome = registry()
            .invoke(
                "get_appointment_info_tool",
                ToolContext { session_id: &session, context: &context, store: &store },
                "{}",
            )
            .await
            .expect("lookup should succeed");

        let ToolOutcome::Data(value) = outcome else {
            panic!("expected data outcome");
        };
        assert_eq!(value["session_id"], json!("session-live"));
        assert_eq!(value["history"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["history"][0]["content"], json!("book me in"));
    }

    #[tokio::test]
    async fn bad_arguments_and_unknown_tools_are_errors() {
        let store = InMemorySessionStore::default();
        let session = SessionId::new("session_123");
        let context = SharedContext::default();
        let tools = registry();

        let invalid = tools
            .invoke(
                "record_intent_tool",
                ToolContext { session_id: &session, context: &context, store: &store },
                r#"{"label":"pension"}"#,
            )
            .await;
        assert!(matches!(invalid, Err(ToolError::InvalidArguments { .. })));

        let unknown = tools
            .invoke(
                "book_flight",
                ToolContext { session_id: &session, context: &context, store: &store },
                "{}",
            )
            .await;
        assert!(matches!(unknown, Err(ToolError::Unknown(name)) if name == "book_flight"));
    }

    #[test]
    fn specs_are_sorted_by_name() {
        let names: Vec<String> = registry().specs().into_iter().map(|spec| spec.name).collect();
        assert_eq!(
            names,
            vec![
                "finish_conversation_tool",
                "get_appointment_info_tool",
                "record_intent_tool",
                "select_timeslot_tool",
            ]
        );
    }
}
