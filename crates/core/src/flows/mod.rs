pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, HandoffFlow, LoopDefinition, LoopEngine};
pub use states::{LoopEvent, LoopState, TransitionOutcome};
