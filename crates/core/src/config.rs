use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::Intent;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub business: BusinessConfig,
    pub conversation: ConversationConfig,
    pub llm: LlmConfig,
    pub orders: OrdersConfig,
    pub payments: PaymentsConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct BusinessConfig {
    pub name: String,
    pub description: String,
    pub currency: String,
    pub timezone: String,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub max_history_length: usize,
    pub session_ttl_secs: u64,
    pub greeting_message: String,
    pub enabled_intents: Vec<Intent>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub vision_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct OrdersConfig {
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub shipping_cost: Decimal,
}

#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    pub auto_approve_threshold: f64,
    pub auto_reject_threshold: f64,
    pub vision_prompt: String,
    pub checkout_base_url: String,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
    Anthropic,
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
    pub log_format: Option<LogFormat>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub business_name: Option<String>,
    pub business_currency: Option<String>,
    pub max_history_length: Option<usize>,
    pub session_ttl_secs: Option<u64>,
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
            business: BusinessConfig {
                name: "Store".to_string(),
                description: "Online store".to_string(),
                currency: "USD".to_string(),
                timezone: "UTC".to_string(),
            },
            conversation: ConversationConfig {
                max_history_length: 20,
                session_ttl_secs: 3600,
                greeting_message: "Welcome! How can I help with your order today?".to_string(),
                enabled_intents: Intent::ALL.to_vec(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "qwen2.5-coder:14b".to_string(),
                vision_model: "llava".to_string(),
                temperature: 0.7,
                max_tokens: 500,
                system_prompt: "You are a helpful sales assistant.".to_string(),
                timeout_secs: 30,
            },
            orders: OrdersConfig {
                tax_rate: Decimal::new(8, 2),
                free_shipping_threshold: Decimal::new(50, 0),
                shipping_cost: Decimal::new(5, 0),
            },
            payments: PaymentsConfig {
                auto_approve_threshold: 0.85,
                auto_reject_threshold: 0.35,
                vision_prompt: "Assess whether this image is a valid payment receipt for the \
                                provided order details. Return JSON only."
                    .to_string(),
                checkout_base_url: "https://payments.example.com/checkout".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://vendi.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected ollama|openai|anthropic)"
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("vendi.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(business) = patch.business {
            if let Some(name) = business.name {
                self.business.name = name;
            }
            if let Some(description) = business.description {
                self.business.description = description;
            }
            if let Some(currency) = business.currency {
                self.business.currency = currency;
            }
            if let Some(timezone) = business.timezone {
                self.business.timezone = timezone;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(max_history_length) = conversation.max_history_length {
                self.conversation.max_history_length = max_history_length;
            }
            if let Some(session_ttl_secs) = conversation.session_ttl_secs {
                self.conversation.session_ttl_secs = session_ttl_secs;
            }
            if let Some(greeting_message) = conversation.greeting_message {
                self.conversation.greeting_message = greeting_message;
            }
            if let Some(enabled_intents) = conversation.enabled_intents {
                self.conversation.enabled_intents = enabled_intents;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(api_key_value.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(vision_model) = llm.vision_model {
                self.llm.vision_model = vision_model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(system_prompt) = llm.system_prompt {
                self.llm.system_prompt = system_prompt;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(orders) = patch.orders {
            if let Some(tax_rate) = orders.tax_rate {
                self.orders.tax_rate = tax_rate;
            }
            if let Some(free_shipping_threshold) = orders.free_shipping_threshold {
                self.orders.free_shipping_threshold = free_shipping_threshold;
            }
            if let Some(shipping_cost) = orders.shipping_cost {
                self.orders.shipping_cost = shipping_cost;
            }
        }

        if let Some(payments) = patch.payments {
            if let Some(auto_approve_threshold) = payments.auto_approve_threshold {
                self.payments.auto_approve_threshold = auto_approve_threshold;
            }
            if let Some(auto_reject_threshold) = payments.auto_reject_threshold {
                self.payments.auto_reject_threshold = auto_reject_threshold;
            }
            if let Some(vision_prompt) = payments.vision_prompt {
                self.payments.vision_prompt = vision_prompt;
            }
            if let Some(checkout_base_url) = payments.checkout_base_url {
                self.payments.checkout_base_url = checkout_base_url;
            }
        }

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

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("VENDI_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("VENDI_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("VENDI_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("VENDI_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("VENDI_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VENDI_BUSINESS_NAME") {
            self.business.name = value;
        }
        if let Some(value) = read_env("VENDI_BUSINESS_DESCRIPTION") {
            self.business.description = value;
        }
        if let Some(value) = read_env("VENDI_BUSINESS_CURRENCY") {
            self.business.currency = value;
        }

        if let Some(value) = read_env("VENDI_CONVERSATION_MAX_HISTORY") {
            self.conversation.max_history_length =
                parse_usize("VENDI_CONVERSATION_MAX_HISTORY", &value)?;
        }
        if let Some(value) = read_env("VENDI_CONVERSATION_SESSION_TTL_SECS") {
            self.conversation.session_ttl_secs =
                parse_u64("VENDI_CONVERSATION_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("VENDI_CONVERSATION_GREETING") {
            self.conversation.greeting_message = value;
        }

        if let Some(value) = read_env("VENDI_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("VENDI_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("VENDI_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("VENDI_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("VENDI_LLM_VISION_MODEL") {
            self.llm.vision_model = value;
        }
        if let Some(value) = read_env("VENDI_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("VENDI_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VENDI_PAYMENTS_AUTO_APPROVE") {
            self.payments.auto_approve_threshold = parse_f64("VENDI_PAYMENTS_AUTO_APPROVE", &value)?;
        }
        if let Some(value) = read_env("VENDI_PAYMENTS_AUTO_REJECT") {
            self.payments.auto_reject_threshold = parse_f64("VENDI_PAYMENTS_AUTO_REJECT", &value)?;
        }
        if let Some(value) = read_env("VENDI_PAYMENTS_CHECKOUT_BASE_URL") {
            self.payments.checkout_base_url = value;
        }

        let log_level = read_env("VENDI_LOGGING_LEVEL").or_else(|| read_env("VENDI_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("VENDI_LOGGING_FORMAT").or_else(|| read_env("VENDI_LOG_FORMAT"));
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
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(llm_api_key_value) = overrides.llm_api_key {
            self.llm.api_key = Some(llm_api_key_value.into());
        }
        if let Some(business_name) = overrides.business_name {
            self.business.name = business_name;
        }
        if let Some(business_currency) = overrides.business_currency {
            self.business.currency = business_currency;
        }
        if let Some(max_history_length) = overrides.max_history_length {
            self.conversation.max_history_length = max_history_length;
        }
        if let Some(session_ttl_secs) = overrides.session_ttl_secs {
            self.conversation.session_ttl_secs = session_ttl_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_conversation(&self.conversation)?;
        validate_llm(&self.llm)?;
        validate_orders(&self.orders)?;
        validate_payments(&self.payments)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("vendi.toml"), PathBuf::from("config/vendi.toml")]
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

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.max_history_length == 0 {
        return Err(ConfigError::Validation(
            "conversation.max_history_length must be greater than zero".to_string(),
        ));
    }

    if conversation.session_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.session_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if conversation.enabled_intents.is_empty() {
        return Err(ConfigError::Validation(
            "conversation.enabled_intents must not be empty".to_string(),
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

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_orders(orders: &OrdersConfig) -> Result<(), ConfigError> {
    if orders.tax_rate < Decimal::ZERO || orders.tax_rate >= Decimal::ONE {
        return Err(ConfigError::Validation(
            "orders.tax_rate must be in range 0.0..1.0".to_string(),
        ));
    }

    if orders.free_shipping_threshold < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "orders.free_shipping_threshold must not be negative".to_string(),
        ));
    }

    if orders.shipping_cost < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "orders.shipping_cost must not be negative".to_string(),
        ));
    }

    Ok(())
}

fn validate_payments(payments: &PaymentsConfig) -> Result<(), ConfigError> {
    for (key, value) in [
        ("payments.auto_approve_threshold", payments.auto_approve_threshold),
        ("payments.auto_reject_threshold", payments.auto_reject_threshold),
    ] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Validation(format!("{key} must be in range 0.0..=1.0")));
        }
    }

    let url = &payments.checkout_base_url;
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "payments.checkout_base_url must start with http:// or https://".to_string(),
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

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    business: Option<BusinessPatch>,
    conversation: Option<ConversationPatch>,
    llm: Option<LlmPatch>,
    orders: Option<OrdersPatch>,
    payments: Option<PaymentsPatch>,
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct BusinessPatch {
    name: Option<String>,
    description: Option<String>,
    currency: Option<String>,
    timezone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    max_history_length: Option<usize>,
    session_ttl_secs: Option<u64>,
    greeting_message: Option<String>,
    enabled_intents: Option<Vec<Intent>>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    vision_model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OrdersPatch {
    tax_rate: Option<Decimal>,
    free_shipping_threshold: Option<Decimal>,
    shipping_cost: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentsPatch {
    auto_approve_threshold: Option<f64>,
    auto_reject_threshold: Option<f64>,
    vision_prompt: Option<String>,
    checkout_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
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

    use crate::intent::Intent;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

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
    fn defaults_cover_every_section() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config =
            AppConfig::load(LoadOptions::default()).map_err(|err| format!("load failed: {err}"))?;

        ensure(config.conversation.max_history_length == 20, "default history bound is 20")?;
        ensure(config.conversation.session_ttl_secs == 3600, "default ttl is one hour")?;
        ensure(
            config.conversation.enabled_intents.contains(&Intent::SubmitPaymentReceipt),
            "receipt submission is enabled by default",
        )?;
        ensure(config.payments.auto_approve_threshold == 0.85, "default approve threshold")?;
        ensure(config.payments.auto_reject_threshold == 0.35, "default reject threshold")?;
        ensure(config.business.currency == "USD", "default currency")?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_VENDI_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("vendi.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "ollama"
api_key = "${TEST_VENDI_API_KEY}"

[business]
name = "Thread & Needle"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.business.name == "Thread & Needle", "file business name applies")?;
            let api_key = config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string());
            ensure(
                api_key.as_deref() == Some("sk-from-env"),
                "api key should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_VENDI_API_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VENDI_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("VENDI_BUSINESS_CURRENCY", "EUR");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("vendi.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[business]
currency = "GBP"

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
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "programmatic override should win over env and file",
            )?;
            ensure(config.business.currency == "EUR", "env should win over file")?;
            ensure(config.logging.level == "debug", "override log level should win")?;
            Ok(())
        })();

        clear_vars(&["VENDI_DATABASE_URL", "VENDI_BUSINESS_CURRENCY"]);
        result
    }

    #[test]
    fn threshold_validation_fails_fast() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VENDI_PAYMENTS_AUTO_APPROVE", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("payments.auto_approve_threshold")
            );
            ensure(has_message, "validation failure should name the offending key")
        })();

        clear_vars(&["VENDI_PAYMENTS_AUTO_APPROVE"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VENDI_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["VENDI_LLM_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VENDI_LOG_LEVEL", "warn");
        env::set_var("VENDI_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level alias should apply")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "log format alias should apply",
            )?;
            Ok(())
        })();

        clear_vars(&["VENDI_LOG_LEVEL", "VENDI_LOG_FORMAT"]);
        result
    }
}
