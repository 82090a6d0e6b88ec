use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{Stream, TryStreamExt};
use serde_json::{Number, Value};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, Sqlite, SqliteConnection, TypeInfo, ValueRef};

use datasage_core::analytics::{
    AnalyticsStore, ColumnDescription, QueryRows, Row as ResultRow, SchemaDescription, StoreError,
    TableDescription, ROW_COUNT_LIMIT,
};
use datasage_core::sql_guard::ValidatedSql;

use crate::DbPool;

/// Migration bookkeeping, hidden from schema discovery.
const INTERNAL_TABLES: &[&str] = &["_sqlx_migrations"];

/// VM instructions between checks for a dropped query.
const PROGRESS_INTERVAL: i32 = 10_000;

pub struct SqlAnalyticsStore {
    pool: DbPool,
}

impl SqlAnalyticsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Acquires a connection and clears any interrupt hook a dropped query
    /// left on it.
    async fn connection(&self) -> Result<PoolConnection<Sqlite>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        conn.lock_handle().await.map_err(map_sqlx_error)?.remove_progress_handler();
        Ok(conn)
    }

    async fn table_names(conn: &mut SqliteConnection) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .filter(|name| !INTERNAL_TABLES.contains(&name.as_str()))
            .collect())
    }

    async fn describe_table(
        conn: &mut SqliteConnection,
        table: &str,
    ) -> Result<TableDescription, StoreError> {
        let rows = sqlx::query(
            "SELECT name, type, \"notnull\" AS not_null, pk
             FROM pragma_table_info(?)
             ORDER BY cid",
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        let columns = rows
            .iter()
            .map(|row| -> Result<ColumnDescription, StoreError> {
                Ok(ColumnDescription {
                    name: row.try_get("name").map_err(map_sqlx_error)?,
                    data_type: row.try_get("type").map_err(map_sqlx_error)?,
                    nullable: row.try_get::<i64, _>("not_null").map_err(map_sqlx_error)? == 0,
                    primary_key: row.try_get::<i64, _>("pk").map_err(map_sqlx_error)? > 0,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TableDescription { name: table.to_string(), columns })
    }
}

#[async_trait::async_trait]
impl AnalyticsStore for SqlAnalyticsStore {
    async fn execute(&self, sql: &ValidatedSql, max_rows: usize) -> Result<QueryRows, StoreError> {
        let mut conn = self.connection().await?;

        // Dropping this future mid-query (deadline, aborted task) trips the
        // flag, and SQLite abandons the statement at its next progress check.
        let interrupt = Arc::new(AtomicBool::new(false));
        let flag = interrupt.clone();
        conn.lock_handle()
            .await
            .map_err(map_sqlx_error)?
            .set_progress_handler(PROGRESS_INTERVAL, move || !flag.swap(false, Ordering::AcqRel));
        let guard = InterruptOnDrop { flag: interrupt, armed: true };

        let outcome = collect_rows(sqlx::query(sql.as_str()).fetch(&mut *conn), max_rows).await;
        guard.disarm();
        outcome
    }

    async fn describe_schema(
        &self,
        table: Option<&str>,
    ) -> Result<SchemaDescription, StoreError> {
        let mut conn = self.connection().await?;
        let names = Self::table_names(&mut conn).await?;
        let selected = match table {
            Some(requested) => {
                let found = names
                    .into_iter()
                    .find(|name| name.eq_ignore_ascii_case(requested.trim()))
                    .ok_or_else(|| StoreError::UnknownTable(requested.to_string()))?;
                vec![found]
            }
            None => names,
        };

        let mut tables = Vec::with_capacity(selected.len());
        for name in selected {
            tables.push(Self::describe_table(&mut conn, &name).await?);
        }
        Ok(SchemaDescription { tables })
    }
}

struct InterruptOnDrop {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::Release);
        }
    }
}

/// Keeps the first `max_rows` rows and counts the rest up to
/// [`ROW_COUNT_LIMIT`], so unbounded statements still finish.
async fn collect_rows<S>(stream: S, max_rows: usize) -> Result<QueryRows, StoreError>
where
    S: Stream<Item = Result<SqliteRow, sqlx::Error>>,
{
    futures::pin_mut!(stream);
    let mut result = QueryRows::default();

    while let Some(row) = stream.try_next().await.map_err(map_sqlx_error)? {
        if result.total_rows == ROW_COUNT_LIMIT {
            result.count_capped = true;
            break;
        }
        result.total_rows += 1;
        if result.rows.len() < max_rows {
            result.rows.push(decode_row(&row)?);
        }
    }

    Ok(result)
}

fn decode_row(row: &SqliteRow) -> Result<ResultRow, StoreError> {
    let mut decoded = ResultRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = decode_cell(row, index).map_err(|error| StoreError::Decode {
            column: name.clone(),
            message: error.to_string(),
        })?;
        decoded.insert(name, value);
    }
    Ok(decoded)
}

// Dispatch on the storage class of the value itself; expression columns such
// as SUM(total) carry no declared type.
fn decode_cell(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_ascii_uppercase()
    };

    let value = match type_name.as_str() {
        "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" => {
            Value::Number(row.try_get::<i64, _>(index)?.into())
        }
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
            let number = row.try_get::<f64, _>(index)?;
            Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
        }
        "BLOB" => {
            let bytes = row.try_get::<Vec<u8>, _>(index)?;
            Value::String(format!("<{} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use datasage_core::analytics::{AnalyticsStore, StoreError, ROW_COUNT_LIMIT};
    use datasage_core::sql_guard;

    use super::SqlAnalyticsStore;
    use crate::fixtures::{AnalyticsSeed, SeedOptions};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn seeded_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        AnalyticsSeed::load(&pool, &SeedOptions::default()).await.expect("seed");
        pool
    }

    #[tokio::test]
    async fn execute_truncates_but_counts_all_rows() {
        let store = SqlAnalyticsStore::new(seeded_pool().await);
        let sql = sql_guard::validate("SELECT id, name, price FROM products ORDER BY id")
            .expect("valid");

        let result = store.execute(&sql, 3).await.expect("execute");

        assert_eq!(result.total_rows, 10);
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.rows[0].get("name"), Some(&json!("Laptop")));
        assert_eq!(result.rows[0].get("price"), Some(&json!(999.99)));
        assert_eq!(result.rows[0].get("id"), Some(&json!(1)));
    }

    const ENDLESS_SERIES: &str = "SELECT x FROM (WITH RECURSIVE c(x) AS \
        (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT x FROM c)";

    #[tokio::test]
    async fn execute_stops_counting_endless_results() {
        let store = SqlAnalyticsStore::new(seeded_pool().await);
        let sql = sql_guard::validate(ENDLESS_SERIES).expect("valid");

        let result = tokio::time::timeout(Duration::from_secs(10), store.execute(&sql, 3))
            .await
            .expect("counting should stop at the limit")
            .expect("execute");

        assert!(result.count_capped);
        assert_eq!(result.total_rows, ROW_COUNT_LIMIT);
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.rows[2].get("x"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn dropped_query_releases_its_connection() {
        // single-connection pool: the follow-up query needs the same connection
        let store = SqlAnalyticsStore::new(seeded_pool().await);
        let endless = sql_guard::validate(&format!("SELECT COUNT(*) FROM ({ENDLESS_SERIES})"))
            .expect("valid");

        let abandoned =
            tokio::time::timeout(Duration::from_millis(200), store.execute(&endless, 1)).await;
        assert!(abandoned.is_err(), "aggregate over an endless series never completes");

        let count =
            sql_guard::validate("SELECT COUNT(*) AS products FROM products").expect("valid");
        let result = tokio::time::timeout(Duration::from_secs(10), store.execute(&count, 1))
            .await
            .expect("connection should be released after the interrupt")
            .expect("execute");
        assert_eq!(result.rows[0].get("products"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn execute_decodes_aggregates_and_nulls() {
        let store = SqlAnalyticsStore::new(seeded_pool().await);
        let sql = sql_guard::validate(
            "SELECT COUNT(*) AS sales, MAX(NULL) AS nothing FROM sales WHERE region = 'Atlantis'",
        )
        .expect("valid");

        let result = store.execute(&sql, 10).await.expect("execute");

        assert_eq!(result.rows[0].get("sales"), Some(&json!(0)));
        assert_eq!(result.rows[0].get("nothing"), Some(&json!(null)));
    }

    #[tokio::test]
    async fn execute_reports_query_errors() {
        let store = SqlAnalyticsStore::new(seeded_pool().await);
        let sql = sql_guard::validate("SELECT missing_column FROM sales").expect("valid");

        assert!(matches!(store.execute(&sql, 10).await, Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn schema_lists_dataset_tables_only() {
        let store = SqlAnalyticsStore::new(seeded_pool().await);

        let schema = store.describe_schema(None).await.expect("schema");
        let names: Vec<&str> = schema.tables.iter().map(|table| table.name.as_str()).collect();
        assert_eq!(names, vec!["products", "sales"]);

        let sales = store.describe_schema(Some("SALES")).await.expect("sales schema");
        let columns: Vec<&str> =
            sales.tables[0].columns.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(columns, vec!["id", "product_id", "quantity", "total", "sale_date", "region"]);
        assert!(sales.tables[0].columns[0].primary_key);
    }

    #[tokio::test]
    async fn schema_rejects_unknown_and_internal_tables() {
        let store = SqlAnalyticsStore::new(seeded_pool().await);

        assert!(matches!(
            store.describe_schema(Some("_sqlx_migrations")).await,
            Err(StoreError::UnknownTable(_))
        ));
        assert!(matches!(
            store.describe_schema(Some("customers")).await,
            Err(StoreError::UnknownTable(_))
        ));
    }
}
