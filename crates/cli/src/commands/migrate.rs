use crate::commands::{open_migrated, open_sessions_migrated, prepare, CommandResult, Failure};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        pool.close().await;
        let sessions = open_sessions_migrated(&config).await?;
        sessions.close().await;
        Ok::<(), Failure>(())
    });

    match result {
        Ok(()) => {
            CommandResult::success("migrate", "applied pending analytics and session migrations")
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
