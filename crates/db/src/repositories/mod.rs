use async_trait::async_trait;
use thiserror::Error;

pub mod analytics;
pub mod memory;
pub mod session;

pub use analytics::SqlAnalyticsStore;
pub use memory::InMemorySessionStore;
pub use session::{NewTurn, SessionTurn, SqlSessionStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Conversation history per session. A session belongs to the identity that
/// created it; other identities see it as missing.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Last `limit` turns in chronological order. An unknown session has no
    /// turns yet.
    async fn recent_turns(
        &self,
        session_id: &str,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<SessionTurn>, RepositoryError>;

    /// Appends a turn, creating the session on first use.
    async fn append_turn(
        &self,
        session_id: &str,
        identity: &str,
        turn: NewTurn,
    ) -> Result<SessionTurn, RepositoryError>;

    /// Full history. Fails with `NotFound` for unknown sessions.
    async fn session_history(
        &self,
        session_id: &str,
        identity: &str,
    ) -> Result<Vec<SessionTurn>, RepositoryError>;
}
