use serde::{Deserialize, Serialize};

use crate::errors::MalformedContextError;

pub const DEFAULT_TIMESLOTS: [&str; 3] =
    ["2023-10-01 10:00", "2023-10-01 11:00", "2023-10-01 14:00"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Mortgage,
    Insurance,
    Other,
    #[default]
    #[serde(rename = "<unknown>", alias = "unknown")]
    Unknown,
}

impl IntentLabel {
    pub const ALL: [IntentLabel; 4] = [Self::Mortgage, Self::Insurance, Self::Other, Self::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mortgage => "mortgage",
            Self::Insurance => "insurance",
            Self::Other => "other",
            Self::Unknown => "<unknown>",
        }
    }
}

impl std::fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Completed,
}

impl ConversationStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Status only moves forward: once completed, a proposed `Active` is ignored.
    pub fn advance(self, proposed: ConversationStatus) -> ConversationStatus {
        if self.is_completed() {
            Self::Completed
        } else {
            proposed
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentContext {
    pub label: IntentLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerContext {
    pub available_timeslots: Vec<String>,
    pub selected_timeslot: String,
}

impl SchedulerContext {
    pub fn is_available(&self, timeslot: &str) -> bool {
        self.available_timeslots.iter().any(|slot| slot == timeslot)
    }

    pub fn has_selection(&self) -> bool {
        !self.selected_timeslot.is_empty()
    }

    /// An empty selection is valid; a non-empty one must be an offered slot.
    pub fn selection_is_valid(&self) -> bool {
        !self.has_selection() || self.is_available(&self.selected_timeslot)
    }
}

/// Section of [`SharedContext`] an agent is allowed to change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    Intent,
    Scheduler,
}

/// Conversation state shared by every agent of a session.
///
/// The JSON form of this type is part of the model-facing protocol: agents are
/// shown it in their instructions and may answer with an updated copy. Field
/// names and enum spellings are therefore fixed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedContext {
    intent_context: IntentContext,
    scheduler_context: SchedulerContext,
    status: ConversationStatus,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::with_timeslots(DEFAULT_TIMESLOTS.iter().map(|slot| slot.to_string()).collect())
    }
}

impl SharedContext {
    pub fn construct_default() -> Self {
        Self::default()
    }

    pub fn with_timeslots(available_timeslots: Vec<String>) -> Self {
        Self {
            intent_context: IntentContext::default(),
            scheduler_context: SchedulerContext {
                available_timeslots,
                selected_timeslot: String::new(),
            },
            status: ConversationStatus::Active,
        }
    }

    pub fn intent(&self) -> &IntentContext {
        &self.intent_context
    }

    pub fn scheduler(&self) -> &SchedulerContext {
        &self.scheduler_context
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn with_intent(&self, label: IntentLabel, account_number: Option<String>) -> Self {
        Self { intent_context: IntentContext { label, account_number }, ..self.clone() }
    }

    pub fn with_selected_timeslot(&self, timeslot: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.scheduler_context.selected_timeslot = timeslot.into();
        next
    }

    pub fn with_status(&self, status: ConversationStatus) -> Self {
        Self { status: self.status.advance(status), ..self.clone() }
    }

    pub fn completed(&self) -> Self {
        self.with_status(ConversationStatus::Completed)
    }

    pub fn serialize(&self) -> String {
        // Plain strings and unit enums only; encoding cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses a model payload, tolerating surrounding whitespace and a single
    /// Markdown code fence.
    pub fn deserialize(payload: &str) -> Result<Self, MalformedContextError> {
        let body = strip_code_fence(payload.trim());
        if body.is_empty() {
            return Err(MalformedContextError::new("payload is empty"));
        }

        serde_json::from_str::<SharedContext>(body)
            .map_err(|error| MalformedContextError::new(error.to_string()))
    }

    /// Combines `proposed` into the current context, taking only the section
    /// owned by `scope`. The offered timeslots never change and a completed
    /// conversation stays completed.
    pub fn merge(&self, proposed: &SharedContext, scope: ContextScope) -> SharedContext {
        let mut next = self.clone();
        match scope {
            ContextScope::Intent => {
                next.intent_context = proposed.intent_context.clone();
            }
            ContextScope::Scheduler => {
                next.scheduler_context.selected_timeslot =
                    proposed.scheduler_context.selected_timeslot.clone();
            }
        }
        next.status = self.status.advance(proposed.status);
        next
    }
}

/// Whether streamed text could still turn into a serialized context once more
/// of it arrives.
pub fn may_be_context(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.is_empty() || trimmed.starts_with('{') || trimmed.starts_with("```")
}

fn strip_code_fence(payload: &str) -> &str {
    let Some(rest) = payload.strip_prefix("```") else {
        return payload;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return payload;
    };
    // Drop an info string such as `json` on the opening fence line.
    match rest.split_once('\n') {
        Some((info, body)) if !info.trim_start().starts_with('{') => body.trim(),
        _ => rest.trim(),
    }
}
