use std::env;
use std::fs;
use std::path::Path;

use concierge_core::config::{resolve_config_path, AppConfig, LlmProvider, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_path = resolve_config_path(None);
    let config_doc = config_path.as_deref().and_then(load_config_doc);

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(&field, config_doc.as_ref(), config_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let azure = config.llm.provider == LlmProvider::AzureOpenAi;
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let slots = config.conversation.available_timeslots.join(", ");

    vec![
        Field::new("database.url", config.database.url.clone(), &["CONCIERGE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CONCIERGE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CONCIERGE_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new("llm.provider", provider_name(config.llm.provider), &["CONCIERGE_LLM_PROVIDER"]),
        Field::new(
            "llm.model",
            config.llm.effective_model(),
            if azure {
                &["CONCIERGE_LLM_MODEL", "AZURE_OPENAI_DEPLOYMENT"]
            } else {
                &["CONCIERGE_LLM_MODEL"]
            },
        ),
        Field::new(
            "llm.base_url",
            config.llm.effective_base_url().unwrap_or("<unset>"),
            if azure {
                &["CONCIERGE_LLM_BASE_URL", "AZURE_OPENAI_ENDPOINT"]
            } else {
                &["CONCIERGE_LLM_BASE_URL"]
            },
        ),
        Field::new(
            "llm.api_key",
            api_key,
            if azure { &["CONCIERGE_LLM_API_KEY", "AZURE_OPENAI_KEY"] } else { &["CONCIERGE_LLM_API_KEY"] },
        ),
        Field::new(
            "llm.api_version",
            config.llm.api_version.clone(),
            if azure {
                &["CONCIERGE_LLM_API_VERSION", "AZURE_OPENAI_API_VERSION"]
            } else {
                &["CONCIERGE_LLM_API_VERSION"]
            },
        ),
        Field::new(
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            &["CONCIERGE_LLM_TIMEOUT_SECS"],
        ),
        Field::new(
            "agents.intent.temperature",
            config.agents.intent.temperature.to_string(),
            &["CONCIERGE_INTENT_TEMPERATURE"],
        ),
        Field::new(
            "agents.intent.max_output_tokens",
            config.agents.intent.max_output_tokens.to_string(),
            &["CONCIERGE_INTENT_MAX_OUTPUT_TOKENS"],
        ),
        Field::new(
            "agents.scheduler.temperature",
            config.agents.scheduler.temperature.to_string(),
            &["CONCIERGE_SCHEDULER_TEMPERATURE"],
        ),
        Field::new(
            "agents.scheduler.max_output_tokens",
            config.agents.scheduler.max_output_tokens.to_string(),
            &["CONCIERGE_SCHEDULER_MAX_OUTPUT_TOKENS"],
        ),
        Field::new(
            "conversation.session_id",
            config.conversation.session_id.clone().unwrap_or_else(|| "<generated>".to_string()),
            &["CONCIERGE_SESSION_ID"],
        ),
        Field::new(
            "conversation.turn_timeout_secs",
            config.conversation.turn_timeout_secs.to_string(),
            &["CONCIERGE_TURN_TIMEOUT_SECS"],
        ),
        Field::new(
            "conversation.max_follow_up_turns",
            config.conversation.max_follow_up_turns.to_string(),
            &["CONCIERGE_MAX_FOLLOW_UP_TURNS"],
        ),
        Field::new(
            "conversation.available_timeslots",
            slots,
            &["CONCIERGE_AVAILABLE_TIMESLOTS"],
        ),
        Field::new(
            "logging.level",
            config.logging.level.clone(),
            &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
        ),
    ]
}

fn provider_name(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::AzureOpenAi => "azure_openai",
        LlmProvider::OpenAi => "openai",
        LlmProvider::Ollama => "ollama",
    }
}

fn load_config_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(field: &Field, config_doc: Option<&Value>, config_path: Option<&Path>) -> String {
    let from_env = field
        .env_keys
        .iter()
        .find(|key| env::var(key).map(|value| !value.trim().is_empty()).unwrap_or(false));
    if let Some(env_key) = from_env {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_doc {
        if contains_path(doc, field.key) {
            let file = config_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps at most the last four characters of long keys.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() < 12 {
        return "<redacted>".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}
