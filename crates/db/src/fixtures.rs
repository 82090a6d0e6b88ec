use chrono::{Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sqlx::Row;
use tracing::info;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// `(name, category, price)` for the sample catalog, ids 1..=10.
pub const SEED_PRODUCTS: &[(&str, &str, f64)] = &[
    ("Laptop", "Electronics", 999.99),
    ("Smartphone", "Electronics", 699.99),
    ("Headphones", "Electronics", 149.99),
    ("Keyboard", "Electronics", 79.99),
    ("Mouse", "Electronics", 49.99),
    ("Desk Chair", "Furniture", 299.99),
    ("Standing Desk", "Furniture", 449.99),
    ("Monitor Stand", "Furniture", 59.99),
    ("Python Book", "Books", 39.99),
    ("AI Textbook", "Books", 89.99),
];

pub const SEED_REGIONS: &[&str] = &["North", "South", "East", "West"];

#[derive(Clone, Debug)]
pub struct SeedOptions {
    pub rng_seed: u64,
    pub sales_count: usize,
    /// Sales are spread over the 90 days ending on this date.
    pub anchor_date: NaiveDate,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self { rng_seed: 42, sales_count: 200, anchor_date: Utc::now().date_naive() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeedResult {
    pub products_inserted: usize,
    pub sales_inserted: usize,
    pub skipped: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub products: i64,
    pub sales: i64,
    pub revenue: f64,
}

pub struct AnalyticsSeed;

impl AnalyticsSeed {
    /// Inserts the sample catalog and generated sales. Does nothing when the
    /// catalog already has rows.
    pub async fn load(pool: &DbPool, options: &SeedOptions) -> Result<SeedResult, RepositoryError> {
        let existing: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM products")
                .fetch_one(pool)
                .await?
                .get("count");
        if existing > 0 {
            info!(
                event_name = "db.seed.skipped",
                existing_products = existing,
                "analytics dataset already present"
            );
            return Ok(SeedResult { products_inserted: 0, sales_inserted: 0, skipped: true });
        }

        let mut rng = StdRng::seed_from_u64(options.rng_seed);
        let mut tx = pool.begin().await?;

        for (index, (name, category, price)) in SEED_PRODUCTS.iter().enumerate() {
            sqlx::query("INSERT INTO products (id, name, category, price) VALUES (?, ?, ?, ?)")
                .bind(index as i64 + 1)
                .bind(*name)
                .bind(*category)
                .bind(*price)
                .execute(&mut *tx)
                .await?;
        }

        for _ in 0..options.sales_count {
            let product_index = rng.gen_range(0..SEED_PRODUCTS.len());
            let (_, _, price) = SEED_PRODUCTS[product_index];
            let quantity: i64 = rng.gen_range(1..=5);
            let days_ago: i64 = rng.gen_range(0..=90);
            let region = SEED_REGIONS[rng.gen_range(0..SEED_REGIONS.len())];
            let total = round_cents(price * quantity as f64);
            let sale_date = options.anchor_date - Duration::days(days_ago);

            sqlx::query(
                "INSERT INTO sales (product_id, quantity, total, sale_date, region)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(product_index as i64 + 1)
            .bind(quantity)
            .bind(total)
            .bind(sale_date.format("%Y-%m-%d").to_string())
            .bind(region)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            event_name = "db.seed.completed",
            products = SEED_PRODUCTS.len(),
            sales = options.sales_count,
            rng_seed = options.rng_seed,
            "analytics dataset seeded"
        );

        Ok(SeedResult {
            products_inserted: SEED_PRODUCTS.len(),
            sales_inserted: options.sales_count,
            skipped: false,
        })
    }

    pub async fn summary(pool: &DbPool) -> Result<DatasetSummary, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM products) AS products,
                (SELECT COUNT(*) FROM sales) AS sales,
                (SELECT IFNULL(SUM(total), 0.0) FROM sales) AS revenue",
        )
        .fetch_one(pool)
        .await?;

        Ok(DatasetSummary {
            products: row.try_get("products")?,
            sales: row.try_get("sales")?,
            revenue: round_cents(row.try_get::<f64, _>("revenue")?),
        })
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
