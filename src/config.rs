//! Configuration for the companion core
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional TOML file, `COMPANION__SECTION__KEY` environment variables and the
//! legacy single-purpose variables handled by [`Config::from_env`].

use crate::conversation::{DEFAULT_HISTORY_WINDOW, DEFAULT_URGENCY_TERMS};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default config file looked up by [`Config::load`]
pub const DEFAULT_CONFIG_PATH: &str = "companion.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Completion service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// OpenAI-compatible chat completions URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API key (read from env GROQ_API_KEY if not set)
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Primary model
    #[serde(default = "default_model")]
    pub model: String,

    /// Models tried in order when the previous one is rate limited
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion budget for regular questions
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Completion budget when the question was classified as urgent
    #[serde(default = "default_urgent_max_tokens")]
    pub urgent_max_tokens: u32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Whole-request timeout, streaming included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Consecutive failures before a model is skipped
    #[serde(default = "default_breaker_failures")]
    pub circuit_breaker_failures: usize,

    #[serde(default = "default_breaker_reset")]
    pub circuit_breaker_reset_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_fallback_models() -> Vec<String> {
    vec!["llama-3.1-8b-instant".to_string(), "gemma2-9b-it".to_string()]
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_urgent_max_tokens() -> u32 {
    3072
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_breaker_failures() -> usize {
    5
}

fn default_breaker_reset() -> u64 {
    30
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            fallback_models: default_fallback_models(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            urgent_max_tokens: default_urgent_max_tokens(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            circuit_breaker_failures: default_breaker_failures(),
            circuit_breaker_reset_secs: default_breaker_reset(),
        }
    }
}

impl CompletionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn breaker_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_reset_secs)
    }

    /// Primary model followed by the fallbacks, without duplicates
    pub fn models(&self) -> Vec<String> {
        let mut models = vec![self.model.clone()];
        for model in &self.fallback_models {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models
    }
}

/// Conversation behaviour and user-facing texts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// History turns sent upstream with each question
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Optional token cap on the history sent upstream
    #[serde(default)]
    pub max_history_tokens: Option<usize>,

    /// Token counter used for `max_history_tokens`
    #[serde(default)]
    pub tokenizer: TokenizerKind,

    #[serde(default = "default_urgency_terms")]
    pub urgency_terms: Vec<String>,

    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,

    /// Shown in place of an answer that failed to stream
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    /// Appended to the fallback when the question was urgent
    #[serde(default = "default_emergency_notice")]
    pub emergency_notice: String,

    /// Shown when the user stops an answer before any text arrived
    #[serde(default = "default_stopped_message")]
    pub stopped_message: String,
}

/// Token counting strategy for the history cap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// 1.3 tokens per whitespace-separated word
    #[default]
    Words,
    /// `cl100k_base` BPE
    Tiktoken,
}

fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}

fn default_urgency_terms() -> Vec<String> {
    DEFAULT_URGENCY_TERMS.iter().map(|t| t.to_string()).collect()
}

fn default_welcome_message() -> String {
    "Hi! I'm LifeForge AI. Ask me anything about blood, platelet, marrow, organ or milk donation, \
     or about thalassemia care."
        .to_string()
}

fn default_fallback_message() -> String {
    "Sorry, I couldn't reach the assistant right now. Please try again in a moment.".to_string()
}

fn default_emergency_notice() -> String {
    "If this is a medical emergency, please call 108 (ambulance) or 112 immediately.".to_string()
}

fn default_stopped_message() -> String {
    "Response stopped.".to_string()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_history_tokens: None,
            tokenizer: TokenizerKind::default(),
            urgency_terms: default_urgency_terms(),
            welcome_message: default_welcome_message(),
            fallback_message: default_fallback_message(),
            emergency_notice: default_emergency_notice(),
            stopped_message: default_stopped_message(),
        }
    }
}

impl ConversationConfig {
    /// Fallback text for a failed answer
    pub fn fallback_for(&self, urgent: bool) -> String {
        if urgent {
            format!("{}\n\n{}", self.fallback_message, self.emergency_notice)
        } else {
            self.fallback_message.clone()
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load from a config file plus `COMPANION__*` environment variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .add_source(::config::Environment::with_prefix("COMPANION").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.env`, the default config file if present, and env overrides
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = std::env::var("COMPANION_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config = if Path::new(&path).exists() {
            debug!("Loading configuration from {}", path);
            Self::from_file(&path)?
        } else {
            debug!("No configuration file at {}, using defaults", path);
            Self::default()
        };

        let config = config.from_env();
        config.validate()?;
        Ok(config)
    }

    /// Override with environment variables if present
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("GROQ_API_KEY") {
            if !val.trim().is_empty() {
                self.completion.api_key = Some(SecretString::new(val));
            }
        }

        if let Ok(val) = std::env::var("COMPANION_COMPLETION_ENDPOINT") {
            self.completion.endpoint = val;
        }

        if let Ok(val) = std::env::var("COMPANION_MODEL") {
            self.completion.model = val;
        }

        if let Ok(val) = std::env::var("COMPANION_HISTORY_WINDOW") {
            if let Ok(window) = val.parse() {
                self.conversation.history_window = window;
            }
        }

        if let Ok(val) = std::env::var("COMPANION_LOG_LEVEL") {
            self.logging.level = val;
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.completion.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("completion.endpoint is empty".to_string()));
        }
        if self.completion.model.trim().is_empty() {
            return Err(ConfigError::Invalid("completion.model is empty".to_string()));
        }
        if self.completion.max_tokens == 0 || self.completion.urgent_max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "completion token budgets must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::Invalid(format!(
                "completion.temperature {} outside 0.0..=2.0",
                self.completion.temperature
            )));
        }
        if self.conversation.max_history_tokens == Some(0) {
            return Err(ConfigError::Invalid(
                "conversation.max_history_tokens must be positive".to_string(),
            ));
        }
        if self.conversation.history_window == 0 {
            return Err(ConfigError::Invalid(
                "conversation.history_window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
