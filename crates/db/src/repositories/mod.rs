use async_trait::async_trait;
use thiserror::Error;

use concierge_core::domain::session::{NewSessionRecord, SessionId, SessionRecord};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionStore;
pub use session::SqlSessionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only conversation memory keyed by session id.
///
/// Records are never updated, deleted or reordered. `append` assigns the next
/// sequence number for the session; `read_all` returns records in sequence
/// order. One writer per session is assumed.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append(
        &self,
        session_id: &SessionId,
        record: NewSessionRecord,
    ) -> Result<SessionRecord, RepositoryError>;

    async fn read_all(&self, session_id: &SessionId) -> Result<Vec<SessionRecord>, RepositoryError>;
}
