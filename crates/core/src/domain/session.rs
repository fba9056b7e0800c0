use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordRole {
    User,
    Assistant,
    Tool,
    Handoff,
    Context,
}

impl RecordRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Handoff => "handoff",
            Self::Context => "context",
        }
    }

    /// Roles replayed to the model as conversational memory.
    pub fn is_dialogue(&self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }
}

impl std::str::FromStr for RecordRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            "handoff" => Ok(Self::Handoff),
            "context" => Ok(Self::Context),
            other => Err(format!("unknown session record role `{other}`")),
        }
    }
}

/// A record before the store has assigned its position in the session log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSessionRecord {
    pub role: RecordRole,
    pub agent: Option<String>,
    pub content: String,
}

impl NewSessionRecord {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: RecordRole::User, agent: None, content: content.into() }
    }

    pub fn assistant(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: RecordRole::Assistant, agent: Some(agent.into()), content: content.into() }
    }

    pub fn tool(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: RecordRole::Tool, agent: Some(agent.into()), content: content.into() }
    }

    pub fn handoff(from: &str, to: &str) -> Self {
        Self {
            role: RecordRole::Handoff,
            agent: Some(to.to_string()),
            content: format!("{from} -> {to}"),
        }
    }

    pub fn context(agent: impl Into<String>, serialized: impl Into<String>) -> Self {
        Self { role: RecordRole::Context, agent: Some(agent.into()), content: serialized.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub sequence: i64,
    pub role: RecordRole,
    pub agent: Option<String>,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn from_new(
        session_id: SessionId,
        sequence: i64,
        record: NewSessionRecord,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            sequence,
            role: record.role,
            agent: record.agent,
            content: record.content,
            recorded_at,
        }
    }
}
