use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::context::DEFAULT_TIMESLOTS;

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-12-01-preview";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub agents: AgentsConfig,
    pub conversation: ConversationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Model endpoint settings. For Azure OpenAI `base_url` is the resource
/// endpoint and `model` the deployment name.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_version: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AgentModelConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AgentsConfig {
    pub intent: AgentModelConfig,
    pub scheduler: AgentModelConfig,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub session_id: Option<String>,
    pub turn_timeout_secs: u64,
    pub max_follow_up_turns: u32,
    pub available_timeslots: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://concierge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: None,
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
                timeout_secs: 60,
            },
            agents: AgentsConfig {
                intent: AgentModelConfig { temperature: 0.1, max_output_tokens: 100 },
                scheduler: AgentModelConfig { temperature: 0.1, max_output_tokens: 500 },
            },
            conversation: ConversationConfig {
                session_id: None,
                turn_timeout_secs: 60,
                max_follow_up_turns: 4,
                available_timeslots: DEFAULT_TIMESLOTS.iter().map(|slot| slot.to_string()).collect(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::AzureOpenAi | Self::OpenAi => "gpt-4o",
            Self::Ollama => "llama3.2",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::AzureOpenAi => None,
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Ollama => Some("http://localhost:11434"),
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::AzureOpenAi | Self::OpenAi)
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "azure" | "azure_openai" => Ok(Self::AzureOpenAi),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected azure_openai|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    pub fn effective_model(&self) -> &str {
        self.model.as_deref().unwrap_or_else(|| self.provider.default_model())
    }

    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url.as_deref().or_else(|| self.provider.default_base_url())
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides(options.overrides.llm_provider)?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = Some(model);
            }
            if let Some(api_version) = llm.api_version {
                self.llm.api_version = api_version;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(agents) = patch.agents {
            if let Some(intent) = agents.intent {
                intent.apply_to(&mut self.agents.intent);
            }
            if let Some(scheduler) = agents.scheduler {
                scheduler.apply_to(&mut self.agents.scheduler);
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(session_id) = conversation.session_id {
                self.conversation.session_id = Some(session_id);
            }
            if let Some(turn_timeout_secs) = conversation.turn_timeout_secs {
                self.conversation.turn_timeout_secs = turn_timeout_secs;
            }
            if let Some(max_follow_up_turns) = conversation.max_follow_up_turns {
                self.conversation.max_follow_up_turns = max_follow_up_turns;
            }
            if let Some(available_timeslots) = conversation.available_timeslots {
                self.conversation.available_timeslots = available_timeslots;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    /// `provider_override` settles the provider before the Azure names are read.
    fn apply_env_overrides(
        &mut self,
        provider_override: Option<LlmProvider>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CONCIERGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONCIERGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(provider) = provider_override {
            self.llm.provider = provider;
        }
        // Azure names are honoured as fallbacks so existing deployments keep working.
        if self.llm.provider == LlmProvider::AzureOpenAi {
            if let Some(value) = read_env("AZURE_OPENAI_ENDPOINT") {
                self.llm.base_url = Some(value);
            }
            if let Some(value) = read_env("AZURE_OPENAI_KEY") {
                self.llm.api_key = Some(secret_value(value));
            }
            if let Some(value) = read_env("AZURE_OPENAI_DEPLOYMENT") {
                self.llm.model = Some(value);
            }
            if let Some(value) = read_env("AZURE_OPENAI_API_VERSION") {
                self.llm.api_version = value;
            }
        }
        if let Some(value) = read_env("CONCIERGE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MODEL") {
            self.llm.model = Some(value);
        }
        if let Some(value) = read_env("CONCIERGE_LLM_API_VERSION") {
            self.llm.api_version = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_INTENT_TEMPERATURE") {
            self.agents.intent.temperature = parse_f32("CONCIERGE_INTENT_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_INTENT_MAX_OUTPUT_TOKENS") {
            self.agents.intent.max_output_tokens =
                parse_u32("CONCIERGE_INTENT_MAX_OUTPUT_TOKENS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SCHEDULER_TEMPERATURE") {
            self.agents.scheduler.temperature =
                parse_f32("CONCIERGE_SCHEDULER_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SCHEDULER_MAX_OUTPUT_TOKENS") {
            self.agents.scheduler.max_output_tokens =
                parse_u32("CONCIERGE_SCHEDULER_MAX_OUTPUT_TOKENS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_SESSION_ID") {
            self.conversation.session_id = Some(value);
        }
        if let Some(value) = read_env("CONCIERGE_TURN_TIMEOUT_SECS") {
            self.conversation.turn_timeout_secs =
                parse_u64("CONCIERGE_TURN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_MAX_FOLLOW_UP_TURNS") {
            self.conversation.max_follow_up_turns =
                parse_u32("CONCIERGE_MAX_FOLLOW_UP_TURNS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_AVAILABLE_TIMESLOTS") {
            self.conversation.available_timeslots = parse_list(&value);
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = Some(llm_model);
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(session_id) = overrides.session_id {
            self.conversation.session_id = Some(session_id);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_agent("agents.intent", &self.agents.intent)?;
        validate_agent("agents.scheduler", &self.agents.scheduler)?;
        validate_conversation(&self.conversation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Path of the config file `load` would read, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for azure_openai/openai providers (set CONCIERGE_LLM_API_KEY or AZURE_OPENAI_KEY)"
                    .to_string(),
            ));
        }
    }

    match llm.effective_base_url() {
        None => {
            return Err(ConfigError::Validation(
                "llm.base_url is required for the azure_openai provider (set AZURE_OPENAI_ENDPOINT)"
                    .to_string(),
            ));
        }
        Some(base_url) if !base_url.starts_with("http://") && !base_url.starts_with("https://") => {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
        Some(_) => {}
    }

    if llm.provider == LlmProvider::AzureOpenAi && llm.api_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.api_version must not be empty for the azure_openai provider".to_string(),
        ));
    }

    if llm.effective_model().trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    Ok(())
}

fn validate_agent(section: &str, agent: &AgentModelConfig) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&agent.temperature) {
        return Err(ConfigError::Validation(format!(
            "{section}.temperature must be in range 0.0..=2.0"
        )));
    }

    if agent.max_output_tokens == 0 {
        return Err(ConfigError::Validation(format!(
            "{section}.max_output_tokens must be greater than zero"
        )));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if let Some(session_id) = &conversation.session_id {
        if session_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "conversation.session_id must not be blank when set".to_string(),
            ));
        }
    }

    if conversation.turn_timeout_secs == 0 || conversation.turn_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "conversation.turn_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    let slots = &conversation.available_timeslots;
    if slots.is_empty() || slots.iter().any(|slot| slot.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "conversation.available_timeslots must list at least one non-empty timeslot"
                .to_string(),
        ));
    }
    let has_duplicates =
        slots.iter().enumerate().any(|(index, slot)| slots[..index].contains(slot));
    if has_duplicates {
        return Err(ConfigError::Validation(
            "conversation.available_timeslots must not contain duplicates".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value.split(',').map(|item| item.trim().to_string()).filter(|item| !item.is_empty()).collect()
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    agents: Option<AgentsPatch>,
    conversation: Option<ConversationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    api_version: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentsPatch {
    intent: Option<AgentModelPatch>,
    scheduler: Option<AgentModelPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentModelPatch {
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
}

impl AgentModelPatch {
    fn apply_to(self, target: &mut AgentModelConfig) {
        if let Some(temperature) = self.temperature {
            target.temperature = temperature;
        }
        if let Some(max_output_tokens) = self.max_output_tokens {
            target.max_output_tokens = max_output_tokens;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    session_id: Option<String>,
    turn_timeout_secs: Option<u64>,
    max_follow_up_turns: Option<u32>,
    available_timeslots: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const MANAGED_VARS: &[&str] = &[
        "CONCIERGE_DATABASE_URL",
        "CONCIERGE_LLM_PROVIDER",
        "CONCIERGE_LLM_API_KEY",
        "CONCIERGE_LLM_MODEL",
        "CONCIERGE_LOG_LEVEL",
        "CONCIERGE_LOG_FORMAT",
        "CONCIERGE_AVAILABLE_TIMESLOTS",
        "CONCIERGE_INTENT_TEMPERATURE",
        "AZURE_OPENAI_ENDPOINT",
        "AZURE_OPENAI_KEY",
        "AZURE_OPENAI_DEPLOYMENT",
        "AZURE_OPENAI_API_VERSION",
        "TEST_CONCIERGE_API_KEY",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_describe_local_ollama_and_fixed_timeslots() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.llm.provider == LlmProvider::Ollama, "default provider should be ollama")?;
        ensure(config.llm.effective_model() == "llama3.2", "default ollama model")?;
        ensure(
            config.llm.effective_base_url() == Some("http://localhost:11434"),
            "default ollama base url",
        )?;
        ensure(config.agents.intent.max_output_tokens == 100, "intent output cap")?;
        ensure(config.agents.scheduler.max_output_tokens == 500, "scheduler output cap")?;
        ensure(config.conversation.available_timeslots.len() == 3, "three default timeslots")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("TEST_CONCIERGE_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_CONCIERGE_API_KEY}"

[conversation]
available_timeslots = ["2024-01-01 09:00", "2024-01-01 10:00"]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be loaded from environment",
            )?;
            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.conversation.available_timeslots
                    == vec!["2024-01-01 09:00".to_string(), "2024-01-01 10:00".to_string()],
                "timeslots should come from file",
            )?;
            Ok(())
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn azure_variables_configure_the_azure_provider() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("CONCIERGE_LLM_PROVIDER", "azure_openai");
        env::set_var("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com");
        env::set_var("AZURE_OPENAI_KEY", "azure-secret");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.effective_base_url() == Some("https://example.openai.azure.com"),
                "endpoint should come from AZURE_OPENAI_ENDPOINT",
            )?;
            ensure(config.llm.effective_model() == "gpt-4o", "deployment should default to gpt-4o")?;
            ensure(
                config.llm.api_version == "2024-12-01-preview",
                "api version should have its default",
            )?;
            Ok(())
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn azure_variables_follow_a_provider_chosen_by_override() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("CONCIERGE_LLM_PROVIDER", "ollama");
        env::set_var("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com");
        env::set_var("AZURE_OPENAI_KEY", "azure-secret");
        env::set_var("AZURE_OPENAI_DEPLOYMENT", "prod-gpt");

        let result = (|| -> Result<(), String> {
            let options = LoadOptions {
                overrides: ConfigOverrides {
                    llm_provider: Some(LlmProvider::AzureOpenAi),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            };
            let config =
                AppConfig::load(options).map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::AzureOpenAi, "override should pick azure")?;
            ensure(
                config.llm.effective_base_url() == Some("https://example.openai.azure.com"),
                "endpoint should come from AZURE_OPENAI_ENDPOINT",
            )?;
            ensure(config.llm.effective_model() == "prod-gpt", "deployment should be read")?;
            ensure(config.llm.api_key.is_some(), "key should come from AZURE_OPENAI_KEY")?;
            Ok(())
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn azure_variables_are_ignored_for_other_providers() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("AZURE_OPENAI_DEPLOYMENT", "prod-gpt");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.llm.effective_model() == "llama3.2", "ollama model should be kept")
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("CONCIERGE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CONCIERGE_LLM_MODEL", "model-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
model = "model-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    session_id: Some("session-override".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.llm.effective_model() == "model-from-env",
                "env model should win over file and defaults",
            )?;
            ensure(
                config.conversation.session_id.as_deref() == Some("session-override"),
                "override session id should be applied",
            )?;
            Ok(())
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("CONCIERGE_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn duplicate_timeslots_and_bad_temperatures_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("CONCIERGE_AVAILABLE_TIMESLOTS", "2023-10-01 10:00, 2023-10-01 10:00");
        let duplicates = AppConfig::load(LoadOptions::default());
        clear_vars(MANAGED_VARS);

        env::set_var("CONCIERGE_INTENT_TEMPERATURE", "3.5");
        let temperature = AppConfig::load(LoadOptions::default());
        clear_vars(MANAGED_VARS);

        ensure(
            matches!(duplicates, Err(ConfigError::Validation(ref message)) if message.contains("duplicates")),
            "duplicate timeslots should fail validation",
        )?;
        ensure(
            matches!(temperature, Err(ConfigError::Validation(ref message)) if message.contains("agents.intent.temperature")),
            "out of range temperature should fail validation",
        )
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("CONCIERGE_INTENT_TEMPERATURE", "warm");
        let result = AppConfig::load(LoadOptions::default());
        clear_vars(MANAGED_VARS);

        ensure(
            matches!(
                result,
                Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "CONCIERGE_INTENT_TEMPERATURE"
            ),
            "non-numeric temperature should be rejected",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        env::set_var("CONCIERGE_LLM_PROVIDER", "openai");
        env::set_var("CONCIERGE_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(MANAGED_VARS);
        result
    }
}
