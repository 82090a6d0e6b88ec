use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use datasage_core::domain::conversation::Message;

use super::{RepositoryError, SessionStore};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionTurn {
    pub session_id: String,
    pub turn_number: i64,
    pub question: String,
    pub answer: String,
    pub sql: Option<String>,
    pub mode: String,
    pub created_at: DateTime<Utc>,
}

impl SessionTurn {
    /// Replays the turn as a user/assistant pair.
    pub fn to_messages(&self) -> [Message; 2] {
        [Message::user(self.question.clone()), Message::assistant(self.answer.clone())]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTurn {
    pub question: String,
    pub answer: String,
    pub sql: Option<String>,
    pub mode: String,
}

pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn owner(&self, session_id: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT identity FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<String, _>("identity")))
    }
}

fn not_found(session_id: &str) -> RepositoryError {
    RepositoryError::NotFound(format!("session `{session_id}`"))
}

fn turn_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionTurn, RepositoryError> {
    let created_at: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|error| RepositoryError::Decode(format!("invalid created_at: {error}")))?
        .with_timezone(&Utc);

    Ok(SessionTurn {
        session_id: row.try_get("session_id")?,
        turn_number: row.try_get("turn_number")?,
        question: row.try_get("question")?,
        answer: row.try_get("answer")?,
        sql: row.try_get("sql")?,
        mode: row.try_get("mode")?,
        created_at,
    })
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn recent_turns(
        &self,
        session_id: &str,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<SessionTurn>, RepositoryError> {
        match self.owner(session_id).await? {
            None => return Ok(Vec::new()),
            Some(owner) if owner != identity => return Err(not_found(session_id)),
            Some(_) => {}
        }

        let rows = sqlx::query(
            "SELECT session_id, turn_number, question, answer, sql, mode, created_at
             FROM chat_turns
             WHERE session_id = ?
             ORDER BY turn_number DESC
             LIMIT ?",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows.iter().map(turn_from_row).collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn append_turn(
        &self,
        session_id: &str,
        identity: &str,
        turn: NewTurn,
    ) -> Result<SessionTurn, RepositoryError> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let owner = sqlx::query("SELECT identity FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get::<String, _>("identity"));

        match owner {
            None => {
                sqlx::query(
                    "INSERT INTO chat_sessions (id, identity, created_at, updated_at)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(session_id)
                .bind(identity)
                .bind(&stamp)
                .bind(&stamp)
                .execute(&mut *tx)
                .await?;
            }
            Some(owner) if owner != identity => return Err(not_found(session_id)),
            Some(_) => {
                sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
                    .bind(&stamp)
                    .bind(session_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let turn_number: i64 = sqlx::query(
            "SELECT IFNULL(MAX(turn_number), 0) + 1 AS next FROM chat_turns WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("next")?;

        sqlx::query(
            "INSERT INTO chat_turns (session_id, turn_number, question, answer, sql, mode, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(turn_number)
        .bind(&turn.question)
        .bind(&turn.answer)
        .bind(&turn.sql)
        .bind(&turn.mode)
        .bind(&stamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SessionTurn {
            session_id: session_id.to_string(),
            turn_number,
            question: turn.question,
            answer: turn.answer,
            sql: turn.sql,
            mode: turn.mode,
            created_at: now,
        })
    }

    async fn session_history(
        &self,
        session_id: &str,
        identity: &str,
    ) -> Result<Vec<SessionTurn>, RepositoryError> {
        match self.owner(session_id).await? {
            Some(owner) if owner == identity => {}
            _ => return Err(not_found(session_id)),
        }

        let rows = sqlx::query(
            "SELECT session_id, turn_number, question, answer, sql, mode, created_at
             FROM chat_turns
             WHERE session_id = ?
             ORDER BY turn_number ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(turn_from_row).collect()
    }
}
