use datasage_db::{AnalyticsSeed, DatasetSummary, SeedOptions, SeedResult};

use crate::commands::{exit, open_migrated, prepare, CommandResult, Failure};

pub fn run(options: SeedOptions) -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let outcome = async {
            let seeded = AnalyticsSeed::load(&pool, &options)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), exit::SEED))?;
            let summary = AnalyticsSeed::summary(&pool)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), exit::SEED))?;
            Ok::<_, Failure>((seeded, summary))
        }
        .await;
        pool.close().await;
        outcome
    });

    match result {
        Ok((seeded, summary)) => {
            CommandResult::success_with_details("seed", seed_message(&seeded, &summary), summary)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seed_message(seeded: &SeedResult, summary: &DatasetSummary) -> String {
    if seeded.skipped {
        format!(
            "dataset already present ({} products, {} sales); nothing inserted",
            summary.products, summary.sales
        )
    } else {
        format!(
            "loaded {} products and {} sales (revenue {:.2})",
            seeded.products_inserted, seeded.sales_inserted, summary.revenue
        )
    }
}

#[cfg(test)]
mod tests {
    use datasage_db::{DatasetSummary, SeedResult};

    use super::seed_message;

    #[test]
    fn message_distinguishes_fresh_and_skipped_runs() {
        let summary = DatasetSummary { products: 10, sales: 200, revenue: 1234.5 };

        let fresh = SeedResult { products_inserted: 10, sales_inserted: 200, skipped: false };
        assert_eq!(
            seed_message(&fresh, &summary),
            "loaded 10 products and 200 sales (revenue 1234.50)"
        );

        let skipped = SeedResult { products_inserted: 0, sales_inserted: 0, skipped: true };
        assert!(seed_message(&skipped, &summary).starts_with("dataset already present"));
    }
}
