//! Provider Configuration
//!
//! Every config is readable from the process environment (`from_env`) or from
//! any key lookup (`from_vars`), which is what tests use.

use std::str::FromStr;

use agent_core::{GenerationOptions, ProviderError, ProviderResult};

/// Default request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Anthropic Messages API configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,

    /// Base URL without the `/v1/messages` path
    pub base_url: String,

    /// Value of the `anthropic-version` header
    pub version: String,

    /// Model/temperature/max-tokens used when a request has no override
    pub defaults: GenerationOptions,

    pub timeout_secs: u64,
}

impl AnthropicConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    pub const DEFAULT_VERSION: &'static str = "2023-06-01";
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-5";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.into(),
            version: Self::DEFAULT_VERSION.into(),
            defaults: GenerationOptions::new(Self::DEFAULT_MODEL),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.defaults.model = model.into();
        self
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> ProviderResult<Self> {
        let api_key = required(&lookup, "anthropic", "ANTHROPIC_API_KEY")?;
        let mut config = Self::new(api_key);
        if let Some(url) = non_empty(&lookup, "ANTHROPIC_BASE_URL") {
            config.base_url = url;
        }
        if let Some(version) = non_empty(&lookup, "ANTHROPIC_VERSION") {
            config.version = version;
        }
        if let Some(model) = non_empty(&lookup, "ANTHROPIC_MODEL") {
            config.defaults.model = model;
        }
        apply_shared(&lookup, "anthropic", &mut config.defaults, &mut config.timeout_secs)?;
        Ok(config)
    }
}

/// OpenAI Chat Completions configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,

    /// Base URL without the `/v1/chat/completions` path
    pub base_url: String,

    pub defaults: GenerationOptions,

    pub timeout_secs: u64,
}

impl OpenAiConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.into(),
            defaults: GenerationOptions::new(Self::DEFAULT_MODEL),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.defaults.model = model.into();
        self
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> ProviderResult<Self> {
        let api_key = required(&lookup, "openai", "OPENAI_API_KEY")?;
        let mut config = Self::new(api_key);
        if let Some(url) = non_empty(&lookup, "OPENAI_BASE_URL") {
            config.base_url = url;
        }
        if let Some(model) = non_empty(&lookup, "OPENAI_MODEL") {
            config.defaults.model = model;
        }
        apply_shared(&lookup, "openai", &mut config.defaults, &mut config.timeout_secs)?;
        Ok(config)
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, provider: &str, key: &str) -> ProviderResult<String> {
    non_empty(lookup, key).ok_or_else(|| ProviderError::config(provider, format!("{key} is not set")))
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    provider: &str,
    key: &str,
) -> ProviderResult<Option<T>> {
    non_empty(lookup, key)
        .map(|raw| {
            raw.parse()
                .map_err(|_| ProviderError::config(provider, format!("{key} has invalid value '{raw}'")))
        })
        .transpose()
}

/// `LLM_TEMPERATURE`, `LLM_MAX_TOKENS` and `LLM_TIMEOUT_SECS`
fn apply_shared(
    lookup: &impl Fn(&str) -> Option<String>,
    provider: &str,
    defaults: &mut GenerationOptions,
    timeout_secs: &mut u64,
) -> ProviderResult<()> {
    if let Some(temperature) = parsed(lookup, provider, "LLM_TEMPERATURE")? {
        defaults.temperature = temperature;
    }
    if let Some(max_tokens) = parsed(lookup, provider, "LLM_MAX_TOKENS")? {
        defaults.max_tokens = max_tokens;
    }
    if let Some(timeout) = parsed(lookup, provider, "LLM_TIMEOUT_SECS")? {
        *timeout_secs = timeout;
    }
    Ok(())
}
