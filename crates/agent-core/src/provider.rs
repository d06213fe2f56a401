//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all LLM providers, allowing the agent to
//! work with any backend without code changes. Every vendor satisfies the
//! same contract: [`ChatRequest`] in, [`ChatResponse`] out.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{ChatRequest, LlmProvider};
//!
//! let request = ChatRequest::new("You are terse.", vec![Message::user("Hi")]);
//! let response = provider.chat(&request).await?;
//! if response.has_tool_calls() {
//!     let results = registry.dispatch_batch(&response.tool_calls, &ctx).await;
//!     let response = provider.continue_with_tool_results(&request, &response, &results).await?;
//! }
//! ```

use std::ops::AddAssign;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};
use crate::message::Message;
use crate::tool::{ToolCall, ToolFormat, ToolResult, ToolSchema};

/// Per-call generation overrides; unset fields fall back to provider defaults
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Resolved generation parameters for one round-trip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "claude-sonnet-4-5", "gpt-4o")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

const fn default_temperature() -> f32 {
    0.7
}
const fn default_max_tokens() -> u32 {
    4096
}

impl GenerationOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    /// Per-call override first, then this default. An empty model id or a
    /// zero token budget is a configuration error, never a silent fallback.
    pub fn resolve(&self, overrides: &GenerationOverrides, provider: &str) -> ProviderResult<Self> {
        let model = overrides
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.model);
        if model.trim().is_empty() {
            return Err(ProviderError::config(provider, "no model id configured"));
        }

        let max_tokens = overrides.max_tokens.unwrap_or(self.max_tokens);
        if max_tokens == 0 {
            return Err(ProviderError::config(provider, "max_tokens must be positive"));
        }

        let temperature = overrides.temperature.unwrap_or(self.temperature);
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(ProviderError::config(
                provider,
                format!("invalid temperature {temperature}"),
            ));
        }

        Ok(Self {
            model: model.to_string(),
            temperature,
            max_tokens,
        })
    }
}

/// One round-trip request. Immutable per call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// System prompt
    pub system: String,

    /// Ordered message history
    pub messages: Vec<Message>,

    /// Tool signatures offered to the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// Model/temperature/max-token overrides
    #[serde(default)]
    pub overrides: GenerationOverrides,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: GenerationOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Extend the history with a finished tool round: the assistant turn that
    /// requested `previous.tool_calls`, then one result per call.
    ///
    /// Results are matched by id and emitted in call order regardless of the
    /// order they completed in. A call without a result is answered with an
    /// error result so no vendor sees a dangling invocation; results for ids
    /// the model never issued are dropped.
    #[must_use]
    pub fn with_tool_round(mut self, previous: &ChatResponse, results: &[ToolResult]) -> Self {
        let ordered: Vec<ToolResult> = previous
            .tool_calls
            .iter()
            .map(|call| {
                results
                    .iter()
                    .find(|r| r.id == call.id)
                    .cloned()
                    .unwrap_or_else(|| {
                        tracing::warn!(id = %call.id, tool = %call.name, "no result for tool call");
                        ToolResult::failure(&call.id, &call.name, "tool produced no result")
                    })
            })
            .collect();

        self.messages.push(Message::assistant_with_tools(
            previous.content.clone(),
            previous.tool_calls.clone(),
        ));
        self.messages.push(Message::tool_results(ordered));
        self
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(rhs.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(rhs.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(rhs.total_tokens);
    }
}

/// Reason the model stopped generating
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn
    EndTurn,
    /// The model wants tool results
    ToolUse,
    /// Hit the token budget
    MaxTokens,
    /// A stop sequence matched
    StopSequence,
    /// Content filtered or refused
    ContentFilter,
    /// Anything the vendor invents later
    Other(String),
}

impl StopReason {
    /// Normalize vendor stop/finish reasons
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "end_turn" | "stop" => Self::EndTurn,
            "tool_use" | "tool_calls" | "function_call" => Self::ToolUse,
            "max_tokens" | "length" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            "content_filter" | "refusal" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One round-trip response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated text
    pub content: String,

    /// Tool invocations requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Token usage for this round-trip
    #[serde(default)]
    pub usage: TokenUsage,

    /// Finish reason
    pub stop_reason: StopReason,

    /// Model that generated this response
    pub model: String,
}

impl ChatResponse {
    /// Plain-text response with no tool calls
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            stop_reason: StopReason::EndTurn,
            model: String::new(),
        }
    }

    /// Response requesting tools
    pub fn tool_use(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            stop_reason: StopReason::ToolUse,
            ..Self::text(content)
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name, used in logs and errors
    fn name(&self) -> &str;

    /// Tool declaration shape this vendor expects
    fn tool_format(&self) -> ToolFormat;

    /// Single round-trip
    async fn chat(&self, request: &ChatRequest) -> ProviderResult<ChatResponse>;

    /// Replay a tool round and round-trip again.
    ///
    /// The neutral history built by [`ChatRequest::with_tool_round`] is
    /// lowered into the vendor's own shape by `chat`, so implementations only
    /// override this when the vendor needs more than that.
    async fn continue_with_tool_results(
        &self,
        request: &ChatRequest,
        previous: &ChatResponse,
        results: &[ToolResult],
    ) -> ProviderResult<ChatResponse> {
        let next = request.clone().with_tool_round(previous, results);
        self.chat(&next).await
    }
}
