//! Error Types
//!
//! Three failure surfaces meet in this crate:
//!
//! - [`ProviderError`]: a vendor round-trip failed. Carries the HTTP status (if
//!   any) and whether the caller may retry.
//! - [`ToolError`]: a tool could not run or failed while running. Never escapes
//!   [`ToolRegistry::dispatch`](crate::tool::ToolRegistry::dispatch); it is
//!   turned into an error [`ToolResult`](crate::tool::ToolResult) for the model.
//! - [`AgentError`]: the only error crossing the engine boundary.

use std::fmt;

use thiserror::Error;

/// Result type alias for agent runs
pub type Result<T> = std::result::Result<T, AgentError>;

/// Result type alias for provider round-trips
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Normalized vendor failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Provider name (e.g. "anthropic", "openai")
    pub provider: String,

    /// Original HTTP status code, if the vendor answered at all
    pub status: Option<u16>,

    /// Whether repeating the same request may succeed
    pub retryable: bool,

    /// Vendor-supplied or locally generated detail
    pub message: String,
}

impl ProviderError {
    /// Classify a non-success HTTP status.
    pub fn from_status(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: Some(status),
            retryable: is_retryable_status(status),
            message: message.into(),
        }
    }

    /// Connection reset, DNS failure, client-side timeout.
    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            retryable: true,
            message: message.into(),
        }
    }

    /// The vendor answered 2xx but the body did not match its documented shape.
    pub fn parse(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            retryable: false,
            message: message.into(),
        }
    }

    /// Missing key, empty model id, and similar local misconfiguration.
    pub fn config(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            retryable: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} request failed ({status}): {}", self.provider, self.message),
            None => write!(f, "{} request failed: {}", self.provider, self.message),
        }
    }
}

/// Rate limits, conflicts, request timeouts, and server-side failures are worth repeating.
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429 | 500..=599)
}

/// Tool lookup or execution failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No tool registered under this name
    #[error("unknown tool: {0}")]
    Unknown(String),

    /// A tool with this name was already registered
    #[error("tool already registered: {0}")]
    Duplicate(String),

    /// Arguments did not satisfy the tool's parameter schema
    #[error("invalid arguments: {0}")]
    Validation(String),

    /// The tool ran and failed; the message is shown to the model verbatim
    #[error("{0}")]
    Execution(String),

    /// The tool panicked
    #[error("tool panicked: {0}")]
    Panicked(String),
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Phase of a run in which a failure occurred
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    /// Building the system/user prompt
    Prompt,
    /// Any provider round-trip
    Execution,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

/// What went wrong underneath an [`AgentError`]
#[derive(Error, Debug)]
pub enum RunFailure {
    /// Prompt strategy failed
    #[error(transparent)]
    Prompt(#[from] anyhow::Error),

    /// Provider round-trip failed
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Run failure, tagged with the agent and the phase it failed in
#[derive(Error, Debug)]
#[error("agent '{agent_id}' failed during {phase}: {source}")]
pub struct AgentError {
    pub agent_id: String,
    pub phase: AgentPhase,
    #[source]
    pub source: RunFailure,
}

impl AgentError {
    pub fn prompt(agent_id: impl Into<String>, err: anyhow::Error) -> Self {
        Self {
            agent_id: agent_id.into(),
            phase: AgentPhase::Prompt,
            source: RunFailure::Prompt(err),
        }
    }

    pub fn execution(agent_id: impl Into<String>, err: ProviderError) -> Self {
        Self {
            agent_id: agent_id.into(),
            phase: AgentPhase::Execution,
            source: RunFailure::Provider(err),
        }
    }

    /// The underlying provider error, if the run died on a round-trip
    pub const fn provider_error(&self) -> Option<&ProviderError> {
        match &self.source {
            RunFailure::Provider(err) => Some(err),
            RunFailure::Prompt(_) => None,
        }
    }

    /// Check if the caller may retry the whole run
    pub fn is_retryable(&self) -> bool {
        self.provider_error().is_some_and(|e| e.retryable)
    }

    /// Generic diagnostic text for outer boundaries
    pub fn user_message(&self) -> String {
        match &self.source {
            RunFailure::Prompt(_) => format!("Agent '{}' could not prepare its prompt.", self.agent_id),
            RunFailure::Provider(err) if err.retryable => {
                "The AI service is temporarily unavailable. Please try again.".into()
            }
            RunFailure::Provider(err) => format!("The AI service rejected the request: {}", err.message),
        }
    }
}

/// Agent construction errors
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("no LLM provider configured")]
    MissingProvider,

    #[error("no prompt strategy configured")]
    MissingStrategy,

    #[error(transparent)]
    Tool(#[from] ToolError),
}
