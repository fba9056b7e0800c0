use std::sync::Arc;
use std::time::Duration;

use concierge_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use concierge_core::config::ConversationConfig;
use concierge_core::domain::context::{may_be_context, SharedContext};
use concierge_core::domain::session::{NewSessionRecord, RecordRole, SessionId, SessionRecord};
use concierge_core::errors::ConversationError;
use concierge_core::flows::{HandoffFlow, LoopEngine, LoopEvent, LoopState};
use concierge_db::{RepositoryError, SessionStore};
use futures_util::StreamExt;
use serde_json::json;

use crate::definition::{AgentDefinition, AgentId, TurnEvent, TurnRequest};
use crate::llm::{ChatMessage, LlmError, ToolCall};
use crate::registry::{AgentRegistry, RegistryError};
use crate::tools::{ToolContext, ToolError, ToolOutcome};

/// Receives what the customer should see while a turn streams.
pub trait ConversationSink {
    fn dialogue(&mut self, text: &str);
    fn handoff(&mut self, agent_name: &str);
    fn turn_finished(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSettings {
    pub turn_timeout: Duration,
    pub max_follow_up_turns: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self { turn_timeout: Duration::from_secs(60), max_follow_up_turns: 4 }
    }
}

impl From<&ConversationConfig> for LoopSettings {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
            max_follow_up_turns: config.max_follow_up_turns,
        }
    }
}

#[derive(Default)]
struct TurnProgress {
    /// Text not yet shown: either still arriving as a possible context or
    /// waiting to be flushed.
    pending_text: String,
    shown_text: String,
    calls: Vec<ToolCall>,
    results: Vec<ChatMessage>,
    follow_up: bool,
}

/// One conversation: the active agent, the shared context and the loop state.
///
/// Turns are strictly sequential. `submit` takes the customer's answer, runs
/// the active agent and any follow-up turns, and reports where the loop ended
/// up. Completion and failure are terminal.
pub struct HandoffLoop {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    engine: LoopEngine<HandoffFlow>,
    settings: LoopSettings,
    session_id: SessionId,
    audit_context: AuditContext,
    submissions: u64,
    state: LoopState,
    active: Arc<AgentDefinition>,
    context: SharedContext,
}

impl HandoffLoop {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        session_id: SessionId,
        context: SharedContext,
        settings: LoopSettings,
    ) -> Result<Self, RegistryError> {
        let active = registry.require(registry.entry())?;
        let engine = LoopEngine::default();
        let state = engine.initial_state();
        let audit_context =
            AuditContext::new(Some(session_id.clone()), session_id.to_string(), active.id.as_str());

        Ok(Self {
            registry,
            store,
            audit,
            engine,
            settings,
            session_id,
            audit_context,
            submissions: 0,
            state,
            active,
            context,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn active_agent(&self) -> &AgentId {
        &self.active.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Picks up an existing session: the last stored context and the agent of
    /// the last handoff become current. Returns whether anything was stored.
    pub async fn restore(&mut self) -> Result<bool, ConversationError> {
        let records = self.store.read_all(&self.session_id).await.map_err(session_unavailable)?;

        let last_context = records.iter().rev().find(|record| record.role == RecordRole::Context);
        if let Some(record) = last_context {
            match SharedContext::deserialize(&record.content) {
                Ok(stored) => self.context = stored,
                Err(error) => tracing::warn!(
                    event_name = "conversation.restore_skipped_context",
                    session_id = %self.session_id,
                    sequence = record.sequence,
                    error = %error,
                    "stored context could not be read; keeping the current one"
                ),
            }
        }

        let last_handoff = records.iter().rev().find(|record| record.role == RecordRole::Handoff);
        if let Some(agent) = last_handoff.and_then(|record| record.agent.as_deref()) {
            if let Some(definition) = self.registry.get(&AgentId::new(agent)) {
                self.set_active(definition);
            }
        }

        if self.context.status().is_completed() && !self.state.is_terminal() {
            self.transition(LoopEvent::RestoredCompleted)?;
        }

        tracing::info!(
            event_name = "conversation.restored",
            session_id = %self.session_id,
            records = records.len(),
            agent = %self.active.id,
            state = ?self.state,
            "conversation restored"
        );
        Ok(!records.is_empty())
    }

    /// Runs the customer's input through the active agent and every follow-up
    /// turn it triggers.
    pub async fn submit(
        &mut self,
        input: &str,
        sink: &mut dyn ConversationSink,
    ) -> Result<LoopState, ConversationError> {
        if self.state.is_terminal() {
            return Err(ConversationError::Terminated { state: self.state });
        }

        self.submissions += 1;
        self.audit_context.correlation_id = format!("{}:{}", self.session_id, self.submissions);
        self.transition(LoopEvent::InputReceived)?;

        if let Err(error) = self.store.append(&self.session_id, NewSessionRecord::user(input)).await
        {
            return Err(self.fail(session_unavailable(error)));
        }

        // Earlier submits come from the store; this submit's turns travel in
        // the transcript in the order they happened.
        let history = match self.store.read_all(&self.session_id).await {
            Ok(records) => dialogue_history(&records),
            Err(error) => return Err(self.fail(session_unavailable(error))),
        };

        let turn_timeout = self.settings.turn_timeout;
        let mut transcript = Vec::new();
        let mut follow_ups = 0;
        loop {
            let turn = self.run_turn(&history, &mut transcript, sink);
            let follow_up = match tokio::time::timeout(turn_timeout, turn).await {
                Ok(Ok(follow_up)) => follow_up,
                Ok(Err(error)) => return Err(self.fail(error)),
                Err(_) => {
                    return Err(self.fail(ConversationError::ModelTimeout {
                        after_secs: turn_timeout.as_secs(),
                    }))
                }
            };

            if self.context.status().is_completed() {
                self.transition(LoopEvent::ConversationCompleted)?;
                self.emit(
                    "conversation.completed",
                    AuditCategory::Conversation,
                    AuditOutcome::Success,
                    &[("agent", self.active.id.as_str())],
                );
                tracing::info!(
                    event_name = "conversation.completed",
                    session_id = %self.session_id,
                    agent = %self.active.id,
                    "conversation completed"
                );
                return Ok(self.state);
            }

            if follow_up {
                if follow_ups < self.settings.max_follow_up_turns {
                    follow_ups += 1;
                    self.transition(LoopEvent::FollowUpScheduled)?;
                    continue;
                }
                tracing::warn!(
                    event_name = "conversation.follow_up_cap_reached",
                    session_id = %self.session_id,
                    agent = %self.active.id,
                    max_follow_up_turns = self.settings.max_follow_up_turns,
                    "follow-up limit reached; waiting for customer input"
                );
            }

            self.transition(LoopEvent::TurnFinished)?;
            return Ok(self.state);
        }
    }

    async fn run_turn(
        &mut self,
        history: &[ChatMessage],
        transcript: &mut Vec<ChatMessage>,
        sink: &mut dyn ConversationSink,
    ) -> Result<bool, ConversationError> {
        let agent = Arc::clone(&self.active);
        let request = TurnRequest {
            context: self.context.clone(),
            history: history.to_vec(),
            transcript: transcript.clone(),
        };

        tracing::debug!(
            event_name = "conversation.turn_started",
            session_id = %self.session_id,
            correlation_id = %self.audit_context.correlation_id,
            agent = %agent.id,
            model = agent.model.client.model_name(),
            "starting agent turn"
        );
        let mut events = agent.start_turn(request, &self.registry).await.map_err(model_failure)?;

        let mut turn = TurnProgress::default();
        while let Some(event) = events.next().await {
            match event.map_err(model_failure)? {
                TurnEvent::Text(delta) => self.on_text(&agent, &mut turn, &delta, sink).await?,
                TurnEvent::AgentSwitch { target, call } => {
                    let call = with_call_id(call, turn.calls.len());
                    self.on_agent_switch(&mut turn, target, call, sink).await?
                }
                TurnEvent::ToolInvocation(call) => {
                    let call = with_call_id(call, turn.calls.len());
                    self.on_tool_invocation(&agent, &mut turn, call).await?
                }
            }
        }

        if !turn.pending_text.is_empty() {
            let leftover = std::mem::take(&mut turn.pending_text);
            show(&mut turn, &leftover, sink);
        }
        let said = Some(turn.shown_text.trim().to_string()).filter(|text| !text.is_empty());
        if let Some(text) = &said {
            sink.turn_finished();
            self.store
                .append(&self.session_id, NewSessionRecord::assistant(agent.id.as_str(), text.as_str()))
                .await
                .map_err(session_unavailable)?;
        }
        if !turn.calls.is_empty() {
            transcript.push(ChatMessage::assistant_tool_calls(said, turn.calls));
            transcript.extend(turn.results);
        } else if let Some(text) = said {
            transcript.push(ChatMessage::assistant(text));
        }

        Ok(turn.follow_up)
    }

    async fn on_text(
        &mut self,
        agent: &AgentDefinition,
        turn: &mut TurnProgress,
        delta: &str,
        sink: &mut dyn ConversationSink,
    ) -> Result<(), ConversationError> {
        turn.pending_text.push_str(delta);

        match SharedContext::deserialize(&turn.pending_text) {
            Ok(proposed) => {
                turn.pending_text.clear();
                turn.follow_up = true;
                self.commit_context(agent, &proposed, "model_reply").await
            }
            Err(_) if may_be_context(&turn.pending_text) => Ok(()),
            Err(_) => {
                let text = std::mem::take(&mut turn.pending_text);
                show(turn, &text, sink);
                Ok(())
            }
        }
    }

    async fn on_agent_switch(
        &mut self,
        turn: &mut TurnProgress,
        target: AgentId,
        call: ToolCall,
        sink: &mut dyn ConversationSink,
    ) -> Result<(), ConversationError> {
        let from = self.active.id.clone();
        let next = self
            .registry
            .get(&target)
            .filter(|_| self.active.can_hand_off_to(&target));
        let Some(next) = next else {
            self.emit(
                "conversation.handoff_rejected",
                AuditCategory::Handoff,
                AuditOutcome::Rejected,
                &[("from", from.as_str()), ("to", target.as_str())],
            );
            return Err(ConversationError::ProtocolViolation {
                from: from.to_string(),
                to: target.to_string(),
            });
        };

        next.run_on_handoff(&self.context);
        self.set_active(Arc::clone(&next));
        self.store
            .append(&self.session_id, NewSessionRecord::handoff(from.as_str(), next.id.as_str()))
            .await
            .map_err(session_unavailable)?;
        sink.handoff(&next.name);

        self.emit(
            "conversation.handoff_applied",
            AuditCategory::Handoff,
            AuditOutcome::Success,
            &[("from", from.as_str()), ("to", next.id.as_str())],
        );
        tracing::info!(
            event_name = "conversation.handoff_applied",
            session_id = %self.session_id,
            from = %from,
            agent = %next.id,
            "handed off conversation"
        );

        turn.results.push(ChatMessage::tool_result(
            call.id.clone(),
            json!({ "assistant": next.name }).to_string(),
        ));
        turn.calls.push(call);
        turn.follow_up = true;
        Ok(())
    }

    async fn on_tool_invocation(
        &mut self,
        agent: &AgentDefinition,
        turn: &mut TurnProgress,
        call: ToolCall,
    ) -> Result<(), ConversationError> {
        let outcome = agent
            .tools()
            .invoke(
                &call.name,
                ToolContext {
                    session_id: &self.session_id,
                    context: &self.context,
                    store: self.store.as_ref(),
                },
                &call.arguments,
            )
            .await;

        let (result, outcome_kind) = match outcome {
            Ok(ToolOutcome::ContextUpdate { context, summary }) => {
                self.commit_context(agent, &context, call.name.as_str()).await?;
                (summary, AuditOutcome::Success)
            }
            Ok(data @ ToolOutcome::Data(_)) => (data.to_model_result(), AuditOutcome::Success),
            Err(ToolError::Session(error)) => return Err(session_unavailable(error)),
            Err(error) => {
                tracing::warn!(
                    event_name = "conversation.tool_failed",
                    session_id = %self.session_id,
                    agent = %agent.id,
                    tool = %call.name,
                    error = %error,
                    "tool call failed; returning the error to the model"
                );
                (json!({ "error": error.to_string() }).to_string(), AuditOutcome::Rejected)
            }
        };

        let record = json!({ "tool": call.name, "arguments": call.arguments, "result": result });
        self.store
            .append(&self.session_id, NewSessionRecord::tool(agent.id.as_str(), record.to_string()))
            .await
            .map_err(session_unavailable)?;
        self.emit(
            "conversation.tool_invoked",
            AuditCategory::Tool,
            outcome_kind,
            &[("agent", agent.id.as_str()), ("tool", call.name.as_str())],
        );

        turn.results.push(ChatMessage::tool_result(call.id.clone(), result));
        turn.calls.push(call);
        turn.follow_up = true;
        Ok(())
    }

    /// Merges a proposed context under the agent's scope and persists the result.
    async fn commit_context(
        &mut self,
        agent: &AgentDefinition,
        proposed: &SharedContext,
        source: &str,
    ) -> Result<(), ConversationError> {
        let merged = self.context.merge(proposed, agent.scope);
        if !merged.scheduler().selection_is_valid() {
            tracing::warn!(
                event_name = "conversation.invalid_selection",
                session_id = %self.session_id,
                agent = %agent.id,
                selected_timeslot = %merged.scheduler().selected_timeslot,
                "context carries a timeslot that was never offered"
            );
            self.emit(
                "conversation.invalid_selection",
                AuditCategory::Context,
                AuditOutcome::Rejected,
                &[
                    ("agent", agent.id.as_str()),
                    ("selected_timeslot", merged.scheduler().selected_timeslot.as_str()),
                ],
            );
        }

        self.context = merged;
        let serialized = self.context.serialize();
        self.store
            .append(&self.session_id, NewSessionRecord::context(agent.id.as_str(), serialized))
            .await
            .map_err(session_unavailable)?;
        self.emit(
            "conversation.context_replaced",
            AuditCategory::Context,
            AuditOutcome::Success,
            &[
                ("agent", agent.id.as_str()),
                ("source", source),
                ("status", if self.context.status().is_completed() { "completed" } else { "active" }),
            ],
        );
        Ok(())
    }

    fn set_active(&mut self, agent: Arc<AgentDefinition>) {
        self.audit_context = self.audit_context.with_actor(agent.id.as_str());
        self.active = agent;
    }

    fn transition(&mut self, event: LoopEvent) -> Result<(), ConversationError> {
        let outcome = self.engine.apply_with_audit(
            &self.state,
            &event,
            self.audit.as_ref(),
            &self.audit_context,
        )?;
        self.state = outcome.to;
        Ok(())
    }

    fn fail(&mut self, error: ConversationError) -> ConversationError {
        self.state = match self.engine.apply_with_audit(
            &self.state,
            &LoopEvent::FaultRaised,
            self.audit.as_ref(),
            &self.audit_context,
        ) {
            Ok(outcome) => outcome.to,
            Err(_) => LoopState::Failed,
        };

        let reason = error.to_string();
        self.emit(
            "conversation.failed",
            AuditCategory::Conversation,
            AuditOutcome::Failed,
            &[("error_class", error.error_class()), ("reason", reason.as_str())],
        );
        tracing::error!(
            event_name = "conversation.failed",
            session_id = %self.session_id,
            correlation_id = %self.audit_context.correlation_id,
            agent = %self.active.id,
            error_class = error.error_class(),
            error = %error,
            "conversation failed"
        );
        error
    }

    fn emit(
        &self,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, &str)],
    ) {
        let event = metadata.iter().fold(
            AuditEvent::new(&self.audit_context, event_type, category, outcome),
            |event, (key, value)| event.with_metadata(*key, *value),
        );
        self.audit.emit(event);
    }
}

fn show(turn: &mut TurnProgress, text: &str, sink: &mut dyn ConversationSink) {
    sink.dialogue(text);
    turn.shown_text.push_str(text);
}

fn with_call_id(mut call: ToolCall, position: usize) -> ToolCall {
    if call.id.is_empty() {
        call.id = format!("call_{position}");
    }
    call
}

fn dialogue_history(records: &[SessionRecord]) -> Vec<ChatMessage> {
    records
        .iter()
        .filter(|record| record.role.is_dialogue())
        .map(|record| match record.role {
            RecordRole::User => ChatMessage::user(record.content.clone()),
            _ => ChatMessage::assistant(record.content.clone()),
        })
        .collect()
}

fn session_unavailable(error: RepositoryError) -> ConversationError {
    ConversationError::SessionUnavailable(error.to_string())
}

fn model_failure(error: LlmError) -> ConversationError {
    ConversationError::Model(error.to_string())
}
