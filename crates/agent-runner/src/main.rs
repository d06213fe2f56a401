//! agent-runner
//!
//! Runs one agent against the configured LLM provider and prints the run
//! record as JSON. Tools come from the built-in set plus, when
//! `HELPER_COMMAND` is set, everything the helper process exposes.
//!
//! ```text
//! agent-runner "Summarize the open issues and post a note to the board"
//! ```

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{AgentBuilder, PostToBoardTool, RunContext, RunEvent, ToolRegistry};
use agent_rpc::{LaunchConfig, RpcClient, register_remote_tools};

use crate::config::RunnerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = RunnerConfig::from_env()?;
    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    anyhow::ensure!(!prompt.trim().is_empty(), "usage: agent-runner <prompt>");

    // Initialize LLM provider
    let provider = agent_runtime::provider_from_env()?;

    // Initialize tools
    let mut tools = ToolRegistry::new();
    tools.register(PostToBoardTool)?;

    let helper = match LaunchConfig::from_env()? {
        Some(launch) => {
            let client = Arc::new(
                RpcClient::connected(&launch)
                    .await
                    .with_context(|| format!("failed to start helper '{}'", launch.command))?,
            );
            register_remote_tools(&client, &mut tools).await?;
            Some(client)
        }
        None => {
            tracing::info!("HELPER_COMMAND not set, running with local tools only");
            None
        }
    };

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    let agent = AgentBuilder::new()
        .agent_id(&config.agent_id)
        .provider(provider)
        .tools(tools)
        .prompts(config.system_prompt, prompt)
        .max_rounds(config.max_rounds)
        .build()?;

    let (events, mut rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                RunEvent::ToolStarted { round, name, side_effects, .. } => {
                    tracing::info!(round, %name, side_effects, "tool started");
                }
                RunEvent::ToolCompleted { name, duration_ms, is_error, .. } => {
                    tracing::info!(%name, duration_ms, is_error, "tool completed");
                }
                RunEvent::Truncated { rounds, .. } => tracing::warn!(rounds, "round ceiling reached"),
                _ => {}
            }
        }
    });

    let outcome = agent.run(RunContext::new(&config.agent_id), &events).await;
    drop(events);
    progress.await.ok();

    if let Some(client) = helper {
        client.disconnect().await;
    }

    match outcome {
        Ok(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, retryable = err.is_retryable(), "agent run failed");
            anyhow::bail!(err.user_message())
        }
    }
}
