use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{LoopEvent, LoopState, TransitionOutcome};

pub trait LoopDefinition {
    fn initial_state(&self) -> LoopState;
    fn transition(
        &self,
        current: &LoopState,
        event: &LoopEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Turn-by-turn lifecycle of one conversation.
#[derive(Clone, Debug, Default)]
pub struct HandoffFlow;

impl LoopDefinition for HandoffFlow {
    fn initial_state(&self) -> LoopState {
        LoopState::AwaitingInput
    }

    fn transition(
        &self,
        current: &LoopState,
        event: &LoopEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_handoff(current, event)
    }
}

pub struct LoopEngine<F> {
    flow: F,
}

impl<F> LoopEngine<F>
where
    F: LoopDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> LoopState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &LoopState,
        event: &LoopEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &LoopState,
        event: &LoopEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "loop.transition_applied",
                        AuditCategory::Conversation,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "loop.transition_rejected",
                        AuditCategory::Conversation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for LoopEngine<HandoffFlow> {
    fn default() -> Self {
        Self::new(HandoffFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: LoopState, event: LoopEvent },
}

fn transition_handoff(
    current: &LoopState,
    event: &LoopEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use LoopEvent::{
        ConversationCompleted, FaultRaised, FollowUpScheduled, InputReceived, RestoredCompleted,
        TurnFinished,
    };
    use LoopState::{AwaitingInput, Completed, Failed, Processing};

    let to = match (current, event) {
        (AwaitingInput, InputReceived) | (Processing, FollowUpScheduled) => Processing,
        (Processing, TurnFinished) => AwaitingInput,
        (Processing, ConversationCompleted) | (AwaitingInput, RestoredCompleted) => Completed,
        (AwaitingInput, FaultRaised) | (Processing, FaultRaised) => Failed,
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: *event,
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::SessionId;
    use crate::flows::engine::{FlowTransitionError, HandoffFlow, LoopDefinition, LoopEngine};
    use crate::flows::states::{LoopEvent, LoopState};

    const ALL_STATES: [LoopState; 4] =
        [LoopState::AwaitingInput, LoopState::Processing, LoopState::Completed, LoopState::Failed];
    const ALL_EVENTS: [LoopEvent; 6] = [
        LoopEvent::InputReceived,
        LoopEvent::FollowUpScheduled,
        LoopEvent::TurnFinished,
        LoopEvent::ConversationCompleted,
        LoopEvent::RestoredCompleted,
        LoopEvent::FaultRaised,
    ];

    #[test]
    fn input_turn_then_prompt_again() {
        let engine = LoopEngine::default();
        let mut state = engine.initial_state();
        assert_eq!(state, LoopState::AwaitingInput);

        state = engine.apply(&state, &LoopEvent::InputReceived).expect("awaiting -> processing").to;
        assert_eq!(state, LoopState::Processing);

        state = engine
            .apply(&state, &LoopEvent::FollowUpScheduled)
            .expect("processing -> processing")
            .to;
        let awaiting = engine.apply(&state, &LoopEvent::TurnFinished).expect("processing -> awaiting");

        assert_eq!(awaiting.from, LoopState::Processing);
        assert_eq!(awaiting.to, LoopState::AwaitingInput);
        assert!(engine.apply(&awaiting.to, &LoopEvent::FollowUpScheduled).is_err());
    }

    #[test]
    fn a_restored_completion_closes_an_idle_loop_only() {
        let engine = LoopEngine::default();
        let closed = engine
            .apply(&LoopState::AwaitingInput, &LoopEvent::RestoredCompleted)
            .expect("awaiting -> completed");

        assert_eq!(closed.to, LoopState::Completed);
        assert!(engine.apply(&LoopState::Processing, &LoopEvent::RestoredCompleted).is_err());
    }

    #[test]
    fn completion_and_failure_are_absorbing() {
        let engine = LoopEngine::default();
        for terminal in [LoopState::Completed, LoopState::Failed] {
            for event in ALL_EVENTS {
                let error = engine.apply(&terminal, &event).expect_err("terminal state must not move");
                assert_eq!(
                    error,
                    FlowTransitionError::InvalidTransition { state: terminal, event }
                );
            }
        }
    }

    #[test]
    fn any_live_state_can_fail() {
        let engine = LoopEngine::default();
        for state in ALL_STATES.iter().filter(|state| !state.is_terminal()) {
            let outcome = engine.apply(state, &LoopEvent::FaultRaised).expect("live state can fail");
            assert_eq!(outcome.to, LoopState::Failed);
        }
    }

    #[test]
    fn completion_only_happens_after_a_turn() {
        let engine = LoopEngine::default();
        assert!(engine.apply(&LoopState::AwaitingInput, &LoopEvent::ConversationCompleted).is_err());
        assert_eq!(
            engine
                .apply(&LoopState::Processing, &LoopEvent::ConversationCompleted)
                .expect("processing -> completed")
                .to,
            LoopState::Completed
        );
    }

    #[test]
    fn transition_table_is_deterministic() {
        let flow = HandoffFlow;
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                assert_eq!(flow.transition(&state, &event), flow.transition(&state, &event));
            }
        }
    }

    #[test]
    fn transitions_emit_audit_events() {
        let engine = LoopEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(SessionId::new("session-7")), "req-42", "intent");

        engine
            .apply_with_audit(&LoopState::AwaitingInput, &LoopEvent::InputReceived, &sink, &audit)
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(&LoopState::Failed, &LoopEvent::InputReceived, &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "loop.transition_applied");
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].session_id.as_ref().map(SessionId::as_str), Some("session-7"));
        assert_eq!(events[1].event_type, "loop.transition_rejected");
    }
}
