use std::str::FromStr;
use std::time::Duration;

use datasage_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_from_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_sessions_from_config(
    config: &DatabaseConfig,
) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.sessions_url, config.max_connections, config.timeout_secs).await
}

/// The pool model-written queries run on. A database file is reopened
/// read-only. An in-memory database exists only on `writer`'s connection, so
/// that connection is switched to `query_only` and shared.
pub async fn connect_query_only(
    config: &DatabaseConfig,
    writer: &DbPool,
) -> Result<DbPool, sqlx::Error> {
    if config.url.contains(":memory:") {
        sqlx::query("PRAGMA query_only = ON").execute(writer).await?;
        return Ok(writer.clone());
    }

    let options = SqliteConnectOptions::from_str(&config.url)?.read_only(true);
    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA query_only = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

/// Opens a pool, creating the database file when it does not exist yet.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:");
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(!in_memory);

    SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { max_connections.max(1) })
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                if !in_memory {
                    sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                }
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use datasage_core::config::AppConfig;
    use sqlx::Row;

    use super::{connect_from_config, connect_query_only, connect_with_settings};
    use crate::migrations;

    #[tokio::test]
    async fn memory_pool_enables_foreign_keys() {
        let pool = connect_with_settings("sqlite::memory:", 4, 5).await.expect("connect");
        let enabled = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("read pragma")
            .get::<i64, _>(0);

        assert_eq!(enabled, 1);
        assert_eq!(pool.options().get_max_connections(), 1);
    }

    #[tokio::test]
    async fn query_pool_refuses_writes_to_a_database_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default().database;
        config.url = format!("sqlite://{}", dir.path().join("analytics.db").display());

        let writer = connect_from_config(&config).await.expect("writer");
        migrations::run_pending(&writer).await.expect("migrations");
        let reader = connect_query_only(&config, &writer).await.expect("reader");

        let products = sqlx::query("SELECT COUNT(*) FROM products")
            .fetch_one(&reader)
            .await
            .expect("reads are allowed")
            .get::<i64, _>(0);
        assert_eq!(products, 0);

        let insert = "INSERT INTO products (name, category, price) VALUES ('x', 'y', 1.0)";
        let write = sqlx::query(insert).execute(&reader).await;
        assert!(write.is_err(), "query pool must not write");

        reader.close().await;
        writer.close().await;
    }

    #[tokio::test]
    async fn in_memory_query_pool_shares_the_switched_connection() {
        let mut config = AppConfig::default().database;
        config.url = "sqlite::memory:".to_string();

        let writer = connect_from_config(&config).await.expect("writer");
        migrations::run_pending(&writer).await.expect("migrations");
        let reader = connect_query_only(&config, &writer).await.expect("reader");

        let insert = "INSERT INTO products (name, category, price) VALUES ('x', 'y', 1.0)";
        let write = sqlx::query(insert).execute(&reader).await;
        assert!(write.is_err(), "query_only connection must not write");
    }
}
