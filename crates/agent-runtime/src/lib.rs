//! # agent-runtime
//!
//! Vendor providers for the agent execution engine.
//!
//! ## Providers
//!
//! - **Anthropic** (default): Messages API, tool calls as typed content blocks
//! - **OpenAI** (default): Chat Completions, tool results as `tool` messages
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::anthropic::AnthropicProvider;
//!
//! let provider = AnthropicProvider::from_env()?;
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(provider))
//!     .prompts("You are terse.", "What changed today?")
//!     .build()?;
//! ```

pub mod config;
mod http;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "openai")]
pub mod openai;

use std::sync::Arc;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicProvider;
pub use config::{AnthropicConfig, OpenAiConfig};
#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentBuilder, AgentError, ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, ProviderResult,
    Result, Role, Tool, ToolRegistry,
};

/// Select a provider from `LLM_PROVIDER` (`anthropic` or `openai`, default `anthropic`).
pub fn provider_from_env() -> ProviderResult<Arc<dyn LlmProvider>> {
    provider_from_vars(|key| std::env::var(key).ok())
}

/// Same as [`provider_from_env`] over an arbitrary key lookup
pub fn provider_from_vars(lookup: impl Fn(&str) -> Option<String>) -> ProviderResult<Arc<dyn LlmProvider>> {
    let choice = lookup("LLM_PROVIDER")
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "anthropic".into());

    let provider: Arc<dyn LlmProvider> = match choice.as_str() {
        #[cfg(feature = "anthropic")]
        "anthropic" => Arc::new(AnthropicProvider::new(AnthropicConfig::from_vars(&lookup)?)?),
        #[cfg(feature = "openai")]
        "openai" => Arc::new(OpenAiProvider::new(OpenAiConfig::from_vars(&lookup)?)?),
        other => {
            return Err(ProviderError::config(
                other,
                format!("unsupported LLM_PROVIDER '{other}'"),
            ));
        }
    };

    tracing::info!(provider = provider.name(), "LLM provider configured");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_selection() {
        let openai = provider_from_vars(|key| match key {
            "LLM_PROVIDER" => Some("OpenAI".into()),
            "OPENAI_API_KEY" => Some("sk-test".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(openai.name(), "openai");

        let anthropic = provider_from_vars(|key| (key == "ANTHROPIC_API_KEY").then(|| "k".to_string())).unwrap();
        assert_eq!(anthropic.name(), "anthropic");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = provider_from_vars(|key| (key == "LLM_PROVIDER").then(|| "ollama".to_string())).err().expect("expected error");
        assert!(err.message.contains("ollama"));
    }
}
