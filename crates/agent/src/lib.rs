//! Agent runtime - two cooperating LLM agents behind one conversation loop
//!
//! This crate wires the customer-facing half of concierge:
//! - Streams chat completions from an OpenAI-compatible endpoint (`llm`)
//! - Describes each agent: instructions, tools, handoff targets (`definition`)
//! - Resolves cyclic handoffs through ids in a registry (`registry`)
//! - Executes agent tools against the shared context and session store (`tools`)
//! - Drives turns, handoffs and context replacements to completion (`runtime`)
//!
//! # Architecture
//!
//! Each customer answer runs one turn of the active agent:
//! 1. **Instructions** (`instructions`) - embed the serialized `SharedContext`
//! 2. **Streaming** (`definition`) - model deltas become `TurnEvent`s
//! 3. **Dispatch** (`runtime`) - dialogue, context replacement, handoff or tool
//! 4. **Persistence** - every step lands in the `SessionStore`
//!
//! # Key Types
//!
//! - `HandoffLoop` - per-session state machine (see `runtime` module)
//! - `LlmClient` - pluggable trait; `OpenAiCompatibleClient` covers Azure OpenAI,
//!   OpenAI and Ollama
//! - `AgentRegistry` - the intent and scheduler agents, see `catalog`
//!
//! # Safety Principle
//!
//! The model proposes, the loop decides. A proposed context only ever changes
//! the section the proposing agent owns, and a handoff outside the wired
//! targets stops the conversation.

pub mod catalog;
pub mod definition;
pub mod instructions;
pub mod llm;
pub mod registry;
pub mod runtime;
pub mod tools;

pub use catalog::{default_registry, INTENT_AGENT_ID, SCHEDULER_AGENT_ID};
pub use definition::{AgentDefinition, AgentId, TurnEvent, TurnRequest, TurnStream};
pub use llm::{LlmClient, LlmError, ModelSettings, OpenAiCompatibleClient};
pub use registry::{AgentRegistry, RegistryError};
pub use runtime::{ConversationSink, HandoffLoop, LoopSettings};
pub use tools::{Tool, ToolContext, ToolError, ToolOutcome, ToolRegistry};
