//! Agent Execution Engine
//!
//! Drives one bounded run: build prompts, call the provider, dispatch the
//! requested tools, replay their results, and repeat until the model stops
//! asking for tools or the round ceiling is reached.
//!
//! ```text
//! PROMPTING ─▶ AWAITING_MODEL ─(no tool calls)─▶ DONE
//!                  ▲        │
//!                  │        ▼
//!                  └── TOOL_DISPATCH ─(ceiling)─▶ DONE (truncated)
//! ```
//!
//! Any failure while building prompts or talking to the provider ends the run
//! as an [`AgentError`]; tool failures are fed back to the model instead.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::{AgentError, AgentPhase, BuildError, Result};
use crate::message::Message;
use crate::provider::{ChatRequest, ChatResponse, GenerationOverrides, LlmProvider, TokenUsage};
use crate::tool::{BoardPosting, Tool, ToolCall, ToolOutcome, ToolRegistry, ToolResult};

/// Default round ceiling
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Builds the prompts for one agent
#[async_trait]
pub trait PromptStrategy: Send + Sync {
    async fn build_system_prompt(&self, ctx: &RunContext) -> anyhow::Result<String>;

    async fn build_user_prompt(&self, ctx: &RunContext) -> anyhow::Result<String>;
}

/// Fixed prompts
#[derive(Clone, Debug)]
pub struct StaticPrompt {
    pub system: String,
    pub user: String,
}

impl StaticPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
impl PromptStrategy for StaticPrompt {
    async fn build_system_prompt(&self, _ctx: &RunContext) -> anyhow::Result<String> {
        Ok(self.system.clone())
    }

    async fn build_user_prompt(&self, _ctx: &RunContext) -> anyhow::Result<String> {
        Ok(self.user.clone())
    }
}

/// Progress notifications emitted during a run
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        agent_id: String,
        run_id: Uuid,
    },
    ToolStarted {
        run_id: Uuid,
        round: usize,
        id: String,
        name: String,
        side_effects: bool,
    },
    ToolCompleted {
        run_id: Uuid,
        round: usize,
        id: String,
        name: String,
        duration_ms: u64,
        is_error: bool,
    },
    Truncated {
        run_id: Uuid,
        rounds: usize,
        unreplayed_calls: usize,
    },
    Completed {
        run_id: Uuid,
        rounds: usize,
        usage: TokenUsage,
    },
    Failed {
        run_id: Uuid,
        phase: AgentPhase,
        message: String,
    },
}

/// Receives [`RunEvent`]s; must not block
pub trait RunListener: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Discards every event
pub struct NoopListener;

impl RunListener for NoopListener {
    fn on_event(&self, _event: &RunEvent) {}
}

impl RunListener for mpsc::UnboundedSender<RunEvent> {
    fn on_event(&self, event: &RunEvent) {
        // A dropped receiver just means nobody is watching.
        let _ = self.send(event.clone());
    }
}

/// How a run reached DONE
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model answered without requesting tools
    Completed,
    /// The round ceiling was hit while the model still wanted tools
    Truncated,
}

/// One dispatched tool call and its result
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
    /// 1-based round the call was made in
    pub round: usize,
    /// Whether the result was sent back to the model
    pub replayed: bool,
}

impl ToolCallRecord {
    fn new(call: &ToolCall, result: &ToolResult, round: usize, replayed: bool) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            outcome: result.outcome.clone(),
            duration_ms: result.duration_ms,
            round,
            replayed,
        }
    }

    pub const fn posting(&self) -> Option<&BoardPosting> {
        match &self.outcome {
            ToolOutcome::Success(output) => output.posting(),
            ToolOutcome::Failure(_) => None,
        }
    }
}

/// Everything a finished run produced. Returned once, never mutated.
#[derive(Clone, Debug, Serialize)]
pub struct AgentRunRecord {
    pub run_id: Uuid,
    pub agent_id: String,
    /// Final text (the last available content when truncated)
    pub content: String,
    /// Every dispatched tool call, in call order
    pub tool_calls: Vec<ToolCallRecord>,
    /// Side-effect payloads collected across rounds, in call order
    pub postings: Vec<BoardPosting>,
    /// Number of tool rounds replayed to the model
    pub rounds: usize,
    pub outcome: RunOutcome,
    /// Accumulated over every round-trip
    pub usage: TokenUsage,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Agent identifier, used in errors and events
    pub agent_id: String,

    /// Maximum tool rounds replayed to the model
    pub max_rounds: usize,

    /// Per-run model/temperature/max-token overrides
    pub overrides: GenerationOverrides,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent".into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            overrides: GenerationOverrides::default(),
        }
    }
}

enum RunState {
    Prompting,
    AwaitingModel {
        request: ChatRequest,
        replay: Option<(ChatResponse, Vec<ToolResult>)>,
    },
    ToolDispatch {
        request: ChatRequest,
        response: ChatResponse,
    },
    Done {
        response: ChatResponse,
        outcome: RunOutcome,
    },
}

#[derive(Default)]
struct RunProgress {
    rounds: usize,
    usage: TokenUsage,
    records: Vec<ToolCallRecord>,
}

/// The main Agent struct
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    strategy: Arc<dyn PromptStrategy>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        strategy: Arc<dyn PromptStrategy>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            strategy,
            config,
        }
    }

    /// Run once with a fresh context
    pub async fn execute(&self) -> Result<AgentRunRecord> {
        self.run(RunContext::new(&self.config.agent_id), &NoopListener).await
    }

    /// Run once, reporting progress to `listener`
    pub async fn run(&self, ctx: RunContext, listener: &dyn RunListener) -> Result<AgentRunRecord> {
        let started_at = Utc::now();
        let clock = Instant::now();
        listener.on_event(&RunEvent::Started {
            agent_id: ctx.agent_id.clone(),
            run_id: ctx.run_id,
        });
        tracing::info!(agent = %ctx.agent_id, run_id = %ctx.run_id, provider = self.provider.name(), "agent run started");

        let mut progress = RunProgress::default();
        let (response, outcome) = match self.drive(&ctx, listener, &mut progress).await {
            Ok(done) => done,
            Err(err) => {
                tracing::error!(agent = %ctx.agent_id, run_id = %ctx.run_id, error = %err, "agent run failed");
                listener.on_event(&RunEvent::Failed {
                    run_id: ctx.run_id,
                    phase: err.phase,
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let postings = progress
            .records
            .iter()
            .filter_map(ToolCallRecord::posting)
            .cloned()
            .collect();
        let record = AgentRunRecord {
            run_id: ctx.run_id,
            agent_id: ctx.agent_id,
            content: response.content,
            tool_calls: progress.records,
            postings,
            rounds: progress.rounds,
            outcome,
            usage: progress.usage,
            model: response.model,
            started_at,
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        listener.on_event(&RunEvent::Completed {
            run_id: record.run_id,
            rounds: record.rounds,
            usage: record.usage,
        });
        tracing::info!(
            agent = %record.agent_id,
            run_id = %record.run_id,
            rounds = record.rounds,
            tool_calls = record.tool_calls.len(),
            total_tokens = record.usage.total_tokens,
            duration_ms = record.duration_ms,
            "agent run finished"
        );

        Ok(record)
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        listener: &dyn RunListener,
        progress: &mut RunProgress,
    ) -> Result<(ChatResponse, RunOutcome)> {
        let mut state = RunState::Prompting;
        loop {
            state = match state {
                RunState::Prompting => RunState::AwaitingModel {
                    request: self.build_request(ctx).await?,
                    replay: None,
                },
                RunState::AwaitingModel { request, replay } => {
                    let (request, response) = match replay {
                        None => {
                            let response = self.provider.chat(&request).await;
                            (request, response)
                        }
                        Some((previous, results)) => {
                            let response = self
                                .provider
                                .continue_with_tool_results(&request, &previous, &results)
                                .await;
                            progress.rounds += 1;
                            (request.with_tool_round(&previous, &results), response)
                        }
                    };
                    let response = response.map_err(|e| AgentError::execution(&ctx.agent_id, e))?;
                    progress.usage += response.usage;

                    if response.has_tool_calls() {
                        RunState::ToolDispatch { request, response }
                    } else {
                        RunState::Done {
                            response,
                            outcome: RunOutcome::Completed,
                        }
                    }
                }
                RunState::ToolDispatch { request, response } => {
                    let round = progress.rounds + 1;
                    let results = self.dispatch_round(ctx, listener, round, &response.tool_calls).await;
                    let replay = progress.rounds < self.config.max_rounds;
                    progress.records.extend(response.tool_calls.iter().zip(&results).map(
                        |(call, result)| ToolCallRecord::new(call, result, round, replay),
                    ));

                    if replay {
                        RunState::AwaitingModel {
                            request,
                            replay: Some((response, results)),
                        }
                    } else {
                        tracing::warn!(
                            agent = %ctx.agent_id,
                            rounds = progress.rounds,
                            unreplayed = results.len(),
                            "round ceiling reached, returning last content"
                        );
                        listener.on_event(&RunEvent::Truncated {
                            run_id: ctx.run_id,
                            rounds: progress.rounds,
                            unreplayed_calls: results.len(),
                        });
                        RunState::Done {
                            response,
                            outcome: RunOutcome::Truncated,
                        }
                    }
                }
                RunState::Done { response, outcome } => return Ok((response, outcome)),
            };
        }
    }

    async fn build_request(&self, ctx: &RunContext) -> Result<ChatRequest> {
        let system = self
            .strategy
            .build_system_prompt(ctx)
            .await
            .map_err(|e| AgentError::prompt(&ctx.agent_id, e))?;
        let user = self
            .strategy
            .build_user_prompt(ctx)
            .await
            .map_err(|e| AgentError::prompt(&ctx.agent_id, e))?;

        let tools = self.tools.schemas();
        tracing::debug!(agent = %ctx.agent_id, tools = tools.len(), "prompts built");

        Ok(ChatRequest::new(system, vec![Message::user(user)])
            .with_tools(tools)
            .with_overrides(self.config.overrides.clone()))
    }

    /// Dispatch a whole batch concurrently; returns only once every call settled.
    async fn dispatch_round(
        &self,
        ctx: &RunContext,
        listener: &dyn RunListener,
        round: usize,
        calls: &[ToolCall],
    ) -> Vec<ToolResult> {
        tracing::debug!(agent = %ctx.agent_id, round, calls = calls.len(), "dispatching tool batch");
        join_all(calls.iter().map(|call| async move {
            listener.on_event(&RunEvent::ToolStarted {
                run_id: ctx.run_id,
                round,
                id: call.id.clone(),
                name: call.name.clone(),
                side_effects: self.tools.has_side_effects(&call.name),
            });
            let result = self.tools.dispatch(call, ctx).await;
            listener.on_event(&RunEvent::ToolCompleted {
                run_id: ctx.run_id,
                round,
                id: result.id.clone(),
                name: result.name.clone(),
                duration_ms: result.duration_ms,
                is_error: result.is_error(),
            });
            result
        }))
        .await
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get configuration
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Builder for Agent configuration
#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    strategy: Option<Arc<dyn PromptStrategy>>,
    tools: ToolRegistry,
    shared_tools: Option<Arc<ToolRegistry>>,
    config: AgentConfig,
    error: Option<BuildError>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.config.agent_id = agent_id.into();
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn PromptStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Shorthand for a [`StaticPrompt`] strategy
    pub fn prompts(self, system: impl Into<String>, user: impl Into<String>) -> Self {
        self.strategy(Arc::new(StaticPrompt::new(system, user)))
    }

    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        if let Err(err) = self.tools.register(tool) {
            self.error.get_or_insert(BuildError::Tool(err));
        }
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Use a registry shared with other agents
    pub fn shared_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.shared_tools = Some(tools);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.overrides.model = Some(model.into());
        self
    }

    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.overrides.temperature = Some(temp);
        self
    }

    pub const fn max_tokens(mut self, max: u32) -> Self {
        self.config.overrides.max_tokens = Some(max);
        self
    }

    pub const fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = max;
        self
    }

    pub fn build(self) -> std::result::Result<Agent, BuildError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let provider = self.provider.ok_or(BuildError::MissingProvider)?;
        let strategy = self.strategy.ok_or(BuildError::MissingStrategy)?;
        let tools = self.shared_tools.unwrap_or_else(|| Arc::new(self.tools));

        Ok(Agent::new(provider, tools, strategy, self.config))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::error::{ProviderError, ProviderResult, ToolError};
    use crate::message::Role;
    use crate::tool::{PostToBoardTool, ToolFormat, ToolOutput, ToolSchema};

    /// Replays a fixed script of responses and records every request
    struct ScriptedProvider {
        script: Mutex<VecDeque<ProviderResult<ChatResponse>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<ProviderResult<ChatResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn tool_format(&self) -> ToolFormat {
            ToolFormat::Anthropic
        }

        async fn chat(&self, request: &ChatRequest) -> ProviderResult<ChatResponse> {
            self.seen.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::parse("scripted", "script exhausted")))
        }
    }

    /// Requests a tool on every turn
    struct InsistentProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for InsistentProvider {
        fn name(&self) -> &str {
            "insistent"
        }

        fn tool_format(&self) -> ToolFormat {
            ToolFormat::OpenAi
        }

        async fn chat(&self, _request: &ChatRequest) -> ProviderResult<ChatResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse::tool_use(
                format!("attempt {n}"),
                vec![ToolCall::new(format!("call_{n}"), "get_value", json!({}))],
            )
            .with_usage(TokenUsage::new(10, 1)))
        }
    }

    struct FailingPrompt;

    #[async_trait]
    impl PromptStrategy for FailingPrompt {
        async fn build_system_prompt(&self, _ctx: &RunContext) -> anyhow::Result<String> {
            anyhow::bail!("context store offline")
        }

        async fn build_user_prompt(&self, _ctx: &RunContext) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    async fn get_value(_args: Value, _ctx: RunContext) -> std::result::Result<ToolOutput, ToolError> {
        Ok(json!({"value": 42}).into())
    }

    async fn explode(_args: Value, _ctx: RunContext) -> std::result::Result<ToolOutput, ToolError> {
        Err(ToolError::execution("boom"))
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools
            .register_fn(ToolSchema::new("get_value", "Return the stored value"), get_value)
            .unwrap();
        tools
            .register_fn(ToolSchema::new("explode", "Always fails"), explode)
            .unwrap();
        tools.register(PostToBoardTool).unwrap();
        tools
    }

    fn agent(provider: Arc<dyn LlmProvider>, max_rounds: usize) -> Agent {
        AgentBuilder::new()
            .agent_id("tester")
            .provider(provider)
            .tools(registry())
            .prompts("You answer with tools.", "What is the value?")
            .max_rounds(max_rounds)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_tool_round_end_to_end() {
        let provider = ScriptedProvider::new(vec![
            Ok(ChatResponse::tool_use("", vec![ToolCall::new("tc1", "get_value", json!({}))])
                .with_usage(TokenUsage::new(20, 5))),
            Ok(ChatResponse::text("The value is 42").with_usage(TokenUsage::new(30, 7))),
        ]);

        let record = agent(provider.clone(), DEFAULT_MAX_ROUNDS).execute().await.unwrap();

        assert_eq!(record.content, "The value is 42");
        assert_eq!(record.tool_calls.len(), 1);
        assert_eq!(record.rounds, 1);
        assert_eq!(record.outcome, RunOutcome::Completed);
        assert_eq!(record.usage, TokenUsage::new(50, 12));
        assert!(record.tool_calls[0].replayed);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].system, "You answer with tools.");
        assert_eq!(requests[0].tools.len(), 3);

        let replay = &requests[1].messages;
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[2].role, Role::Tool);
        assert_eq!(replay[2].tool_results[0].id, "tc1");
        assert_eq!(replay[2].tool_results[0].content(), r#"{"value":42}"#);
    }

    #[tokio::test]
    async fn test_round_ceiling_truncates_without_error() {
        let provider = Arc::new(InsistentProvider {
            calls: AtomicUsize::new(0),
        });

        let record = agent(provider.clone(), 3).execute().await.unwrap();

        assert_eq!(record.outcome, RunOutcome::Truncated);
        assert_eq!(record.rounds, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(record.content, "attempt 3");
        assert_eq!(record.usage.prompt_tokens, 40);

        // The over-budget batch is recorded but was never replayed.
        assert_eq!(record.tool_calls.len(), 4);
        assert!(record.tool_calls[..3].iter().all(|r| r.replayed));
        assert!(!record.tool_calls[3].replayed);
        assert_eq!(record.tool_calls[3].round, 4);
    }

    #[tokio::test]
    async fn test_zero_ceiling_never_continues() {
        let provider = Arc::new(InsistentProvider {
            calls: AtomicUsize::new(0),
        });

        let record = agent(provider.clone(), 0).execute().await.unwrap();
        assert_eq!(record.rounds, 0);
        assert_eq!(record.outcome, RunOutcome::Truncated);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prompt_failure_is_tagged() {
        let provider = ScriptedProvider::new(vec![]);
        let agent = AgentBuilder::new()
            .agent_id("planner")
            .provider(provider.clone())
            .strategy(Arc::new(FailingPrompt))
            .build()
            .unwrap();

        let err = agent.execute().await.unwrap_err();
        assert_eq!(err.agent_id, "planner");
        assert_eq!(err.phase, AgentPhase::Prompt);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::from_status("scripted", 429, "slow down"))]);

        let err = agent(provider.clone(), 5).execute().await.unwrap_err();
        assert_eq!(err.phase, AgentPhase::Execution);
        assert!(err.is_retryable());
        assert_eq!(err.provider_error().and_then(|e| e.status), Some(429));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_continuation_failure_propagates() {
        let provider = ScriptedProvider::new(vec![
            Ok(ChatResponse::tool_use("", vec![ToolCall::new("a", "get_value", json!({}))])),
            Err(ProviderError::from_status("scripted", 400, "bad history")),
        ]);

        let err = agent(provider, 5).execute().await.unwrap_err();
        assert_eq!(err.phase, AgentPhase::Execution);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let provider = ScriptedProvider::new(vec![
            Ok(ChatResponse::tool_use(
                "trying",
                vec![
                    ToolCall::new("x", "explode", json!({})),
                    ToolCall::new("y", "nope", json!({})),
                ],
            )),
            Ok(ChatResponse::text("Both tools failed.")),
        ]);

        let record = agent(provider.clone(), 5).execute().await.unwrap();
        assert_eq!(record.content, "Both tools failed.");

        let replayed = &provider.requests()[1].messages[2].tool_results;
        assert_eq!(replayed[0].error(), Some("boom"));
        assert_eq!(replayed[1].error(), Some("unknown tool: nope"));
    }

    #[tokio::test]
    async fn test_postings_collected_in_call_order() {
        let post = |id: &str, content: &str| {
            ToolCall::new(id, "post_to_board", json!({"entry_type": "observation", "content": content}))
        };
        let provider = ScriptedProvider::new(vec![
            Ok(ChatResponse::tool_use("", vec![post("p1", "first"), post("p2", "second")])),
            Ok(ChatResponse::tool_use("", vec![ToolCall::new("v", "get_value", json!({})), post("p3", "third")])),
            Ok(ChatResponse::text("posted")),
        ]);

        let record = agent(provider, 5).execute().await.unwrap();
        let contents: Vec<_> = record.postings.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(record.rounds, 2);
    }

    #[tokio::test]
    async fn test_listener_receives_lifecycle_events() {
        let provider = ScriptedProvider::new(vec![
            Ok(ChatResponse::tool_use(
                "",
                vec![
                    ToolCall::new("tc1", "get_value", json!({})),
                    ToolCall::new("tc2", "post_to_board", json!({"entry_type": "alert", "content": "heads up"})),
                ],
            )),
            Ok(ChatResponse::text("done")),
        ]);
        let agent = agent(provider, 5);
        let (tx, mut rx) = mpsc::unbounded_channel();

        agent.run(RunContext::new("tester"), &tx).await.unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(RunEvent::Started { .. })));
        assert!(matches!(events.last(), Some(RunEvent::Completed { rounds: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, RunEvent::ToolCompleted { is_error: false, .. })));

        let side_effects: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::ToolStarted { name, side_effects, .. } => Some((name.as_str(), *side_effects)),
                _ => None,
            })
            .collect();
        assert_eq!(side_effects, vec![("get_value", false), ("post_to_board", true)]);
    }

    #[test]
    fn test_builder_requires_provider() {
        let result = AgentBuilder::new().prompts("s", "u").build();
        assert!(matches!(result, Err(BuildError::MissingProvider)));
    }
}
