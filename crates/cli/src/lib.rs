pub mod commands;

use clap::{Parser, Subcommand};
use datasage_core::domain::conversation::AgentMode;
use datasage_db::SeedOptions;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "datasage",
    about = "Datasage operator CLI",
    long_about = "Prepare the analytics database, inspect configuration, and ask questions locally.",
    after_help = "Examples:\n  datasage migrate\n  datasage seed --sales 500\n  datasage ask \"What are the total sales?\" --mode sql_chain"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Write diagnostic logs to stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic products/sales dataset (skipped when already present)")]
    Seed {
        #[arg(long, default_value_t = 200, help = "Number of sales rows to generate")]
        sales: usize,
        #[arg(long, default_value_t = 42, help = "Random seed for reproducible data")]
        rng_seed: u64,
    },
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Answer one question against the configured database and model")]
    Ask {
        question: String,
        #[arg(long, default_value = "tool_loop", help = "tool_loop or sql_chain")]
        mode: AgentMode,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt().with_target(false).with_writer(std::io::stderr).compact().init();
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { sales, rng_seed } => commands::seed::run(SeedOptions {
            rng_seed,
            sales_count: sales,
            ..SeedOptions::default()
        }),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Ask { question, mode } => commands::ask::run(&question, mode),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
