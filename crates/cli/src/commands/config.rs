use std::env;
use std::fs;
use std::path::Path;

use datasage_core::config::{detect_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Field {
    Field { key, value: value.to_string(), env_keys }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    render(&config)
}

pub fn render(config: &AppConfig) -> String {
    let config_file_path = detect_config_path();
    let config_file_doc = config_file_path.as_deref().and_then(load_config_file_doc);

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    let fields = [
        field("database.url", &config.database.url, &["DATASAGE_DATABASE_URL"]),
        field(
            "database.sessions_url",
            &config.database.sessions_url,
            &["DATASAGE_DATABASE_SESSIONS_URL"],
        ),
        field(
            "database.max_connections",
            config.database.max_connections,
            &["DATASAGE_DATABASE_MAX_CONNECTIONS"],
        ),
        field("llm.provider", format!("{:?}", config.llm.provider), &["DATASAGE_LLM_PROVIDER"]),
        field("llm.model", &config.llm.model, &["DATASAGE_LLM_MODEL", "OPENAI_MODEL"]),
        field(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["DATASAGE_LLM_BASE_URL"],
        ),
        field("llm.api_key", api_key, &["DATASAGE_LLM_API_KEY", "OPENAI_API_KEY"]),
        field(
            "agent.max_iterations",
            config.agent.max_iterations,
            &["DATASAGE_AGENT_MAX_ITERATIONS"],
        ),
        field(
            "agent.request_timeout_secs",
            config.agent.request_timeout_secs,
            &["DATASAGE_AGENT_REQUEST_TIMEOUT_SECS"],
        ),
        field("cache.enabled", config.cache.enabled, &["DATASAGE_CACHE_ENABLED"]),
        field("cache.ttl_secs", config.cache.ttl_secs, &["DATASAGE_CACHE_TTL_SECS"]),
        field(
            "rate_limit.requests_per_window",
            config.rate_limit.requests_per_window,
            &["DATASAGE_RATE_LIMIT_REQUESTS_PER_WINDOW"],
        ),
        field(
            "rate_limit.window_secs",
            config.rate_limit.window_secs,
            &["DATASAGE_RATE_LIMIT_WINDOW_SECS"],
        ),
        field(
            "server.address",
            format!("{}:{}", config.server.bind_address, config.server.port),
            &["DATASAGE_SERVER_BIND_ADDRESS", "DATASAGE_SERVER_PORT"],
        ),
        field(
            "logging.level",
            &config.logging.level,
            &["DATASAGE_LOGGING_LEVEL", "DATASAGE_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["DATASAGE_LOGGING_FORMAT", "DATASAGE_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        let source =
            field_source(field, config_file_doc.as_ref(), config_file_path.as_deref());
        format!("- {} = {} (source: {source})", field.key, field.value)
    }));
    lines.join("\n")
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    fs::read_to_string(path).ok()?.parse::<Value>().ok()
}

fn field_source(field: &Field, doc: Option<&Value>, path: Option<&Path>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    // server.address is synthetic; its parts live under [server]
    let file_key = if field.key == "server.address" { "server.bind_address" } else { field.key };
    if doc.is_some_and(|doc| contains_path(doc, file_key)) {
        let file_path = path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

/// Keeps a recognizable prefix (`sk-***`) and hides the rest.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 8 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
