//! # agent-rpc
//!
//! Stdio JSON-RPC 2.0 transport to an external helper process, plus the
//! adapter that exposes the helper's tools to the agent engine.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_rpc::{LaunchConfig, RpcClient, register_remote_tools};
//!
//! let client = Arc::new(RpcClient::connected(&LaunchConfig::new("broker-helper")).await?);
//! let mut tools = ToolRegistry::new();
//! register_remote_tools(&client, &mut tools).await?;
//! ```

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;

pub use bridge::{RpcTool, register_remote_tools};
pub use client::RpcClient;
pub use config::LaunchConfig;
pub use error::{Result, RpcError};
pub use protocol::{CallToolResult, ContentItem, ToolDescriptor};
