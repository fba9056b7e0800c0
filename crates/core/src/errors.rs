use thiserror::Error;

use crate::flows::{FlowTransitionError, LoopState};

/// Text that does not parse as a serialized conversation context. Callers treat
/// it as dialogue.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("not a serialized conversation context: {reason}")]
pub struct MalformedContextError {
    pub reason: String,
}

impl MalformedContextError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("agent `{from}` requested a handoff to `{to}`, which is not one of its handoff targets")]
    ProtocolViolation { from: String, to: String },
    #[error("session store unavailable: {0}")]
    SessionUnavailable(String),
    #[error("model did not finish the turn within {after_secs}s")]
    ModelTimeout { after_secs: u64 },
    #[error("model call failed: {0}")]
    Model(String),
    #[error("conversation has already ended ({state:?})")]
    Terminated { state: LoopState },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

impl ConversationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::SessionUnavailable(_) => "session_unavailable",
            Self::ModelTimeout { .. } => "model_timeout",
            Self::Model(_) => "model_failure",
            Self::Terminated { .. } => "conversation_terminated",
            Self::FlowTransition(_) => "invalid_transition",
        }
    }

    /// Terminal message for the operator, with enough detail to resume by hand.
    pub fn operator_message(&self) -> String {
        match self {
            Self::ProtocolViolation { from, to } => format!(
                "The `{from}` agent tried to hand the conversation to `{to}`, which is not wired as one of its handoff targets. The conversation was stopped; start a new session to continue."
            ),
            Self::SessionUnavailable(detail) => format!(
                "Conversation history could not be read or written ({detail}). Check the database and resume with the same session id."
            ),
            Self::ModelTimeout { after_secs } => format!(
                "The model did not answer within {after_secs}s. Check the model endpoint and resume with the same session id."
            ),
            Self::Model(detail) => format!(
                "The model call failed ({detail}). Check the model endpoint and credentials, then resume with the same session id."
            ),
            Self::Terminated { state } => {
                format!("This conversation already ended ({state:?}). Start a new session.")
            }
            Self::FlowTransition(error) => {
                format!("The conversation loop rejected a state change: {error}.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ConversationError, MalformedContextError};
    use crate::flows::{FlowTransitionError, LoopEvent, LoopState};

    #[test]
    fn protocol_violation_names_both_agents() {
        let error =
            ConversationError::ProtocolViolation { from: "intent".into(), to: "billing".into() };

        assert_eq!(error.error_class(), "protocol_violation");
        assert!(error.to_string().contains("`intent`"));
        assert!(error.operator_message().contains("`billing`"));
    }

    #[test]
    fn recoverable_failures_point_to_session_resume() {
        for error in [
            ConversationError::SessionUnavailable("database is locked".into()),
            ConversationError::ModelTimeout { after_secs: 30 },
            ConversationError::Model("status 500".into()),
        ] {
            assert!(error.operator_message().contains("same session id"), "{error}");
        }
    }

    #[test]
    fn flow_errors_convert_transparently() {
        let flow = FlowTransitionError::InvalidTransition {
            state: LoopState::Completed,
            event: LoopEvent::InputReceived,
        };
        let error = ConversationError::from(flow.clone());

        assert_eq!(error.to_string(), flow.to_string());
        assert_eq!(error.error_class(), "invalid_transition");
    }

    #[test]
    fn malformed_context_error_keeps_reason() {
        let error = MalformedContextError::new("missing field `status`");
        assert!(error.to_string().ends_with("missing field `status`"));
    }
}
