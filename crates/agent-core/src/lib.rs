//! # agent-core
//!
//! Core agent logic with provider-agnostic LLM abstraction and extensible tool system.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Agent                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Execution  │  │    Tools    │  │   LlmProvider       │  │
//! │  │   Engine    │──│   Registry  │──│   (Strategy)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between Anthropic, OpenAI, or any
//! other vendor without changing agent logic. Tools may be local closures or
//! live in a separate helper process (see `agent-rpc`).

pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod tool;

pub use context::RunContext;
pub use error::{AgentError, AgentPhase, BuildError, ProviderError, ProviderResult, Result, ToolError};
pub use message::{Message, Role};
pub use provider::{
    ChatRequest, ChatResponse, GenerationOptions, GenerationOverrides, LlmProvider, StopReason, TokenUsage,
};
pub use reasoning::{
    Agent, AgentBuilder, AgentConfig, AgentRunRecord, PromptStrategy, RunEvent, RunListener, RunOutcome,
    StaticPrompt, ToolCallRecord,
};
pub use tool::{
    BoardPosting, EntryType, FnTool, ParameterSchema, PostToBoardTool, Priority, Tool, ToolCall, ToolFormat,
    ToolOutcome, ToolOutput, ToolRegistry, ToolResult, ToolSchema,
};
