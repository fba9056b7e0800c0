use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopState {
    AwaitingInput,
    Processing,
    Completed,
    Failed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopEvent {
    /// The customer answered.
    InputReceived,
    /// A turn ended with a context replacement, handoff or tool result, so the
    /// active agent runs again without new input.
    FollowUpScheduled,
    TurnFinished,
    ConversationCompleted,
    /// A resumed session had already been completed.
    RestoredCompleted,
    FaultRaised,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: LoopState,
    pub to: LoopState,
    pub event: LoopEvent,
}
