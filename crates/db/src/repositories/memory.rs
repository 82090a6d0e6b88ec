use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use super::{NewTurn, RepositoryError, SessionStore, SessionTurn};

struct SessionRecord {
    identity: String,
    turns: Vec<SessionTurn>,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

fn not_found(session_id: &str) -> RepositoryError {
    RepositoryError::NotFound(format!("session `{session_id}`"))
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn recent_turns(
        &self,
        session_id: &str,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<SessionTurn>, RepositoryError> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            None => Ok(Vec::new()),
            Some(record) if record.identity != identity => Err(not_found(session_id)),
            Some(record) => {
                let skip = record.turns.len().saturating_sub(limit);
                Ok(record.turns[skip..].to_vec())
            }
        }
    }

    async fn append_turn(
        &self,
        session_id: &str,
        identity: &str,
        turn: NewTurn,
    ) -> Result<SessionTurn, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.entry(session_id.to_string()).or_insert_with(|| SessionRecord {
            identity: identity.to_string(),
            turns: Vec::new(),
        });
        if record.identity != identity {
            return Err(not_found(session_id));
        }

        let saved = SessionTurn {
            session_id: session_id.to_string(),
            turn_number: record.turns.len() as i64 + 1,
            question: turn.question,
            answer: turn.answer,
            sql: turn.sql,
            mode: turn.mode,
            created_at: Utc::now(),
        };
        record.turns.push(saved.clone());
        Ok(saved)
    }

    async fn session_history(
        &self,
        session_id: &str,
        identity: &str,
    ) -> Result<Vec<SessionTurn>, RepositoryError> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(record) if record.identity == identity => Ok(record.turns.clone()),
            _ => Err(not_found(session_id)),
        }
    }
}
