use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

/// Products and sales: the only data model-written queries can see.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations/analytics");

/// Chat history, applied to its own database.
pub static SESSION_MIGRATOR: Migrator = sqlx::migrate!("../../migrations/sessions");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

pub async fn run_session_pending(pool: &DbPool) -> Result<(), MigrateError> {
    SESSION_MIGRATOR.run(pool).await
}
