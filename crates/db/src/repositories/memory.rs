use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use concierge_core::domain::session::{NewSessionRecord, SessionId, SessionRecord};

use super::{RepositoryError, SessionStore};

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<SessionRecord>>>,
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(
        &self,
        session_id: &SessionId,
        record: NewSessionRecord,
    ) -> Result<SessionRecord, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(session_id.0.clone()).or_default();
        let sequence = log.last().map(|last| last.sequence + 1).unwrap_or(1);
        let stored = SessionRecord::from_new(session_id.clone(), sequence, record, Utc::now());
        log.push(stored.clone());
        Ok(stored)
    }

    async fn read_all(&self, session_id: &SessionId) -> Result<Vec<SessionRecord>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&session_id.0).cloned().unwrap_or_default())
    }
}
