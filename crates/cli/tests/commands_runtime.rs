use std::env;
use std::sync::{Mutex, OnceLock};

use datasage_cli::commands::{ask, config, migrate, seed};
use datasage_core::domain::conversation::AgentMode;
use datasage_db::SeedOptions;
use serde_json::Value;

const OLLAMA: &[(&str, &str)] = &[
    ("DATASAGE_LLM_PROVIDER", "ollama"),
    ("DATASAGE_LLM_BASE_URL", "http://127.0.0.1:11434/v1"),
    ("DATASAGE_DATABASE_URL", "sqlite::memory:"),
    ("DATASAGE_DATABASE_SESSIONS_URL", "sqlite::memory:"),
];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(OLLAMA, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_api_key() {
    with_env(
        &[
            ("DATASAGE_DATABASE_URL", "sqlite::memory:"),
            ("DATASAGE_DATABASE_SESSIONS_URL", "sqlite::memory:"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
            assert!(payload["message"].as_str().unwrap_or_default().contains("llm.api_key"));
        },
    );
}

#[test]
fn seed_loads_dataset_then_skips_on_rerun() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("datasage.db").display());
    let sessions_url = format!("sqlite://{}", dir.path().join("sessions.db").display());

    with_env(
        &[
            ("DATASAGE_LLM_PROVIDER", "ollama"),
            ("DATASAGE_LLM_BASE_URL", "http://127.0.0.1:11434/v1"),
            ("DATASAGE_DATABASE_URL", url.as_str()),
            ("DATASAGE_DATABASE_SESSIONS_URL", sessions_url.as_str()),
        ],
        || {
            let first = seed::run(SeedOptions { sales_count: 25, ..SeedOptions::default() });
            assert_eq!(first.exit_code, 0, "expected first seed success: {}", first.output);
            let first_payload = parse_payload(&first.output);
            assert_eq!(first_payload["status"], "ok");
            assert_eq!(first_payload["details"]["products"], 10);
            assert_eq!(first_payload["details"]["sales"], 25);

            let second = seed::run(SeedOptions::default());
            assert_eq!(second.exit_code, 0, "expected second seed success");
            let second_payload = parse_payload(&second.output);
            assert!(second_payload["message"]
                .as_str()
                .unwrap_or_default()
                .starts_with("dataset already present"));
            assert_eq!(second_payload["details"]["sales"], 25);
        },
    );
}

#[test]
fn ask_rejects_blank_question_before_calling_the_model() {
    with_env(OLLAMA, || {
        let result = ask::run("   ", AgentMode::ToolLoop);
        assert_eq!(result.exit_code, 7, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "ask");
        assert_eq!(payload["error_class"], "invalid_request");
    });
}

#[test]
fn config_output_redacts_api_key() {
    with_env(
        &[
            ("DATASAGE_LLM_API_KEY", "sk-test-supersecret"),
            ("DATASAGE_DATABASE_URL", "sqlite::memory:"),
            ("DATASAGE_DATABASE_SESSIONS_URL", "sqlite::memory:"),
        ],
        || {
            let output = config::run();
            assert!(output.contains("- llm.api_key = sk-*** (source: env (DATASAGE_LLM_API_KEY))"));
            assert!(output.contains("- database.url = sqlite::memory: (source: env"));
            assert!(output.contains(
                "- database.sessions_url = sqlite::memory: (source: env (DATASAGE_DATABASE_SESSIONS_URL))"
            ));
            assert!(!output.contains("supersecret"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "DATASAGE_DATABASE_URL",
        "DATASAGE_DATABASE_SESSIONS_URL",
        "DATASAGE_DATABASE_MAX_CONNECTIONS",
        "DATASAGE_DATABASE_TIMEOUT_SECS",
        "DATASAGE_LLM_PROVIDER",
        "DATASAGE_LLM_API_KEY",
        "DATASAGE_LLM_BASE_URL",
        "DATASAGE_LLM_MODEL",
        "DATASAGE_LLM_TIMEOUT_SECS",
        "DATASAGE_LLM_MAX_RETRIES",
        "DATASAGE_LLM_MAX_OUTPUT_TOKENS",
        "DATASAGE_AGENT_MAX_ITERATIONS",
        "DATASAGE_AGENT_REQUEST_TIMEOUT_SECS",
        "DATASAGE_AGENT_MAX_RESULT_ROWS",
        "DATASAGE_CACHE_ENABLED",
        "DATASAGE_CACHE_TTL_SECS",
        "DATASAGE_CACHE_MAX_ENTRIES",
        "DATASAGE_RATE_LIMIT_REQUESTS_PER_WINDOW",
        "DATASAGE_RATE_LIMIT_WINDOW_SECS",
        "DATASAGE_SERVER_BIND_ADDRESS",
        "DATASAGE_SERVER_PORT",
        "DATASAGE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "DATASAGE_LOGGING_LEVEL",
        "DATASAGE_LOGGING_FORMAT",
        "DATASAGE_LOG_LEVEL",
        "DATASAGE_LOG_FORMAT",
        "OPENAI_API_KEY",
        "OPENAI_MODEL",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
