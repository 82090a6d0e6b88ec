use std::sync::Arc;

use datasage_agent::{AgentError, AgentRequest, AgentService};
use datasage_core::domain::conversation::AgentMode;
use datasage_db::SqlAnalyticsStore;

use crate::commands::{exit, open_migrated, open_query_only, prepare, CommandResult, Failure};

pub const CLI_IDENTITY: &str = "cli";

pub fn run(question: &str, mode: AgentMode) -> CommandResult {
    let (config, runtime) = match prepare("ask") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let reader = match open_query_only(&config, &pool).await {
            Ok(reader) => reader,
            Err(failure) => {
                pool.close().await;
                return Err(failure);
            }
        };
        let store = Arc::new(SqlAnalyticsStore::new(reader.clone()));
        let outcome = match AgentService::from_config(&config, store) {
            Ok(service) => service
                .handle(AgentRequest::new(question, CLI_IDENTITY).with_mode(mode))
                .await
                .map_err(|error| failure_for(&error)),
            Err(error) => Err(("llm_setup", error.to_string(), exit::UPSTREAM)),
        };
        reader.close().await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(response) => {
            CommandResult::success_with_details("ask", response.answer.clone(), response)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ask", error_class, message, exit_code)
        }
    }
}

fn failure_for(error: &AgentError) -> Failure {
    let (class, code) = match error {
        AgentError::InvalidRequest(_) => ("invalid_request", exit::INVALID_REQUEST),
        AgentError::RateLimited { .. } => ("rate_limited", exit::RATE_LIMITED),
        AgentError::Upstream(_) => ("upstream_unavailable", exit::UPSTREAM),
        AgentError::DeadlineExceeded { .. } => ("deadline_exceeded", exit::DEADLINE),
        AgentError::Store(_) => ("store", exit::STORE),
    };
    (class, error.to_string(), code)
}
