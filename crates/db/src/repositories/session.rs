use chrono::{DateTime, Utc};
use sqlx::Row;

use concierge_core::domain::session::{NewSessionRecord, RecordRole, SessionId, SessionRecord};

use super::{RepositoryError, SessionStore};
use crate::DbPool;

pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, RepositoryError> {
    let session_id: String =
        row.try_get("session_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let sequence: i64 =
        row.try_get("sequence").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let role: String = row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let agent: Option<String> =
        row.try_get("agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let content: String =
        row.try_get("content").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let recorded_at: String =
        row.try_get("recorded_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let role = role.parse::<RecordRole>().map_err(RepositoryError::Decode)?;
    let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid recorded_at: {e}")))?;

    Ok(SessionRecord {
        session_id: SessionId(session_id),
        sequence,
        role,
        agent,
        content,
        recorded_at,
    })
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn append(
        &self,
        session_id: &SessionId,
        record: NewSessionRecord,
    ) -> Result<SessionRecord, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let next_sequence: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) + 1 AS next_sequence
             FROM session_record
             WHERE session_id = ?",
        )
        .bind(session_id.as_str())
        .fetch_one(&mut *tx)
        .await?
        .try_get("next_sequence")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        let stored = SessionRecord::from_new(session_id.clone(), next_sequence, record, Utc::now());

        sqlx::query(
            "INSERT INTO session_record (session_id, sequence, role, agent, content, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(stored.session_id.as_str())
        .bind(stored.sequence)
        .bind(stored.role.as_str())
        .bind(&stored.agent)
        .bind(&stored.content)
        .bind(stored.recorded_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn read_all(&self, session_id: &SessionId) -> Result<Vec<SessionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT session_id, sequence, role, agent, content, recorded_at
             FROM session_record
             WHERE session_id = ?
             ORDER BY sequence ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()
    }
}
