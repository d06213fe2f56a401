//! Tool System
//!
//! Uniform "callable tool" abstraction over local functions and
//! transport-backed calls. Tools are registered once, before a run, and
//! invoked by the execution engine through [`ToolRegistry::dispatch`], which
//! always yields a [`ToolResult`] and never fails.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::context::RunContext;
use crate::error::ToolError;

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque provider-assigned id
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Argument object
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Kind of board posting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Observation,
    Decision,
    Alert,
    Question,
    Summary,
    Task,
}

impl EntryType {
    pub const ALL: [Self; 6] = [
        Self::Observation,
        Self::Decision,
        Self::Alert,
        Self::Question,
        Self::Summary,
        Self::Task,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Decision => "decision",
            Self::Alert => "alert",
            Self::Question => "question",
            Self::Summary => "summary",
            Self::Task => "task",
        }
    }
}

/// Board posting priority
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Structured side-effect note destined for the cross-agent board.
///
/// Tools return it as [`ToolOutput::Posting`]; the engine collects it, and
/// persistence happens elsewhere.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardPosting {
    #[serde(alias = "entry_type")]
    pub entry_type: EntryType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub content: String,

    #[serde(default, alias = "structured_data", skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, alias = "requires_response", skip_serializing_if = "Option::is_none")]
    pub requires_response: Option<bool>,
}

impl BoardPosting {
    pub fn new(entry_type: EntryType, content: impl Into<String>) -> Self {
        Self {
            entry_type,
            title: None,
            content: content.into(),
            structured_data: None,
            priority: None,
            requires_response: None,
        }
    }
}

/// Successful tool output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    /// Plain data returned to the model
    Data(Value),
    /// A board posting; the model sees the posting itself
    Posting(BoardPosting),
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Data(Value::String(text.into()))
    }

    /// JSON value shown to the model
    pub fn to_value(&self) -> Value {
        match self {
            Self::Data(value) => value.clone(),
            Self::Posting(posting) => serde_json::to_value(posting).unwrap_or(Value::Null),
        }
    }

    pub const fn posting(&self) -> Option<&BoardPosting> {
        match self {
            Self::Posting(posting) => Some(posting),
            Self::Data(_) => None,
        }
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

/// Result value or error string
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ToolOutcome {
    #[serde(rename = "result")]
    Success(ToolOutput),
    #[serde(rename = "error")]
    Failure(String),
}

/// Result from tool execution; echoes the id of its [`ToolCall`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the call this answers
    pub id: String,

    /// Tool that was called
    pub name: String,

    #[serde(flatten)]
    pub outcome: ToolOutcome,

    /// Wall-clock execution time
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, name: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            outcome: ToolOutcome::Success(output),
            duration_ms: 0,
        }
    }

    pub fn failure(id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            outcome: ToolOutcome::Failure(error.into()),
            duration_ms: 0,
        }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure(_))
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Failure(err) => Some(err),
            ToolOutcome::Success(_) => None,
        }
    }

    pub fn value(&self) -> Option<Value> {
        match &self.outcome {
            ToolOutcome::Success(output) => Some(output.to_value()),
            ToolOutcome::Failure(_) => None,
        }
    }

    pub const fn posting(&self) -> Option<&BoardPosting> {
        match &self.outcome {
            ToolOutcome::Success(output) => output.posting(),
            ToolOutcome::Failure(_) => None,
        }
    }

    /// Text replayed to the model: strings verbatim, everything else as JSON
    pub fn content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success(output) => match output.to_value() {
                Value::String(text) => text,
                other => other.to_string(),
            },
            ToolOutcome::Failure(err) => err.clone(),
        }
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    /// Full JSON Schema of the property; used verbatim when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl ParameterSchema {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
            default: None,
            enum_values: None,
            schema: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn one_of(mut self, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    fn to_json_schema(&self) -> Value {
        if let Some(schema) = &self.schema {
            return schema.clone();
        }
        let mut prop = Map::new();
        prop.insert("type".into(), Value::String(self.param_type.clone()));
        if !self.description.is_empty() {
            prop.insert("description".into(), Value::String(self.description.clone()));
        }
        if let Some(values) = &self.enum_values {
            prop.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        Value::Object(prop)
    }
}

/// Tool signature (for LLM function calling)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,

    /// Category for grouping
    #[serde(default)]
    pub category: Option<String>,

    /// Whether tool has side effects
    #[serde(default)]
    pub has_side_effects: bool,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            category: None,
            has_side_effects: false,
        }
    }

    #[must_use]
    pub fn param(mut self, param: ParameterSchema) -> Self {
        self.parameters.push(param);
        self
    }

    /// JSON Schema object describing the argument object
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.to_json_schema()))
            .collect();
        let required: Vec<Value> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| Value::String(p.name.clone()))
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Declarative tool-description shape expected by a vendor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolFormat {
    /// `{name, description, input_schema}`
    Anthropic,
    /// `{type: "function", function: {name, description, parameters}}`
    OpenAi,
}

/// Convert tool signatures to a vendor's tool declarations. Pure.
pub fn to_provider_definitions(schemas: &[ToolSchema], format: ToolFormat) -> Vec<Value> {
    schemas
        .iter()
        .map(|schema| match format {
            ToolFormat::Anthropic => json!({
                "name": schema.name,
                "description": schema.description,
                "input_schema": schema.input_schema(),
            }),
            ToolFormat::OpenAi => json!({
                "type": "function",
                "function": {
                    "name": schema.name,
                    "description": schema.description,
                    "parameters": schema.input_schema(),
                },
            }),
        })
        .collect()
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with validated arguments
    async fn execute(&self, arguments: &Value, ctx: &RunContext) -> Result<ToolOutput, ToolError>;

    /// Validate arguments before execution (optional)
    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        let empty = Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ToolError::Validation(format!(
                    "expected an argument object, got {other}"
                )));
            }
        };

        for param in self.schema().parameters.iter().filter(|p| p.required) {
            if args.get(&param.name).is_none_or(Value::is_null) {
                return Err(ToolError::Validation(format!(
                    "missing required parameter: {}",
                    param.name
                )));
            }
        }

        Ok(())
    }
}

/// Tool backed by an async closure
pub struct FnTool<F> {
    schema: ToolSchema,
    func: F,
}

impl<F> FnTool<F> {
    pub const fn new(schema: ToolSchema, func: F) -> Self {
        Self { schema, func }
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value, RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
{
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, arguments: &Value, ctx: &RunContext) -> Result<ToolOutput, ToolError> {
        (self.func)(arguments.clone(), ctx.clone()).await
    }
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.schema().name;
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Register a closure-backed tool
    pub fn register_fn<F, Fut>(&mut self, schema: ToolSchema, func: F) -> Result<(), ToolError>
    where
        F: Fn(Value, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        self.register(FnTool::new(schema, func))
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Execute one tool call. Never fails: lookup, validation, execution
    /// errors, and panics all become an error [`ToolResult`].
    pub async fn dispatch(&self, call: &ToolCall, ctx: &RunContext) -> ToolResult {
        let started = Instant::now();
        let outcome = match self.get(&call.name) {
            None => Err(ToolError::Unknown(call.name.clone())),
            Some(tool) => match tool.validate(&call.arguments) {
                Err(err) => Err(err),
                Ok(()) => {
                    let schema = tool.schema();
                    tracing::debug!(
                        tool = %call.name,
                        id = %call.id,
                        category = schema.category.as_deref().unwrap_or("general"),
                        side_effects = schema.has_side_effects,
                        "executing tool"
                    );
                    AssertUnwindSafe(tool.execute(&call.arguments, ctx))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(ToolError::Panicked(panic_message(panic.as_ref()))))
                }
            },
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut result = match outcome {
            Ok(output) => {
                tracing::debug!(tool = %call.name, id = %call.id, duration_ms, "tool call succeeded");
                ToolResult::success(&call.id, &call.name, output)
            }
            Err(err) => {
                tracing::warn!(tool = %call.name, id = %call.id, error = %err, "tool call failed");
                ToolResult::failure(&call.id, &call.name, err.to_string())
            }
        };
        result.duration_ms = duration_ms;
        result
    }

    /// Whether calling `name` changes anything outside the run; unknown tools don't
    pub fn has_side_effects(&self, name: &str) -> bool {
        self.get(name).is_some_and(|tool| tool.schema().has_side_effects)
    }

    /// Execute a batch concurrently; one result per call, in call order
    pub async fn dispatch_batch(&self, calls: &[ToolCall], ctx: &RunContext) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.dispatch(call, ctx))).await
    }

    /// All tool signatures, ordered by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// Posts a note to the shared agent board
pub struct PostToBoardTool;

#[async_trait]
impl Tool for PostToBoardTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "post_to_board".into(),
            description: "Post a note to the shared board that other agents and the user read".into(),
            parameters: vec![
                ParameterSchema::new("entry_type", "string", "Kind of entry")
                    .required()
                    .one_of(EntryType::ALL.iter().map(|t| t.as_str())),
                ParameterSchema::new("title", "string", "Short headline"),
                ParameterSchema::new("content", "string", "Body of the note").required(),
                ParameterSchema::new("structured_data", "object", "Machine-readable details"),
                ParameterSchema::new("priority", "string", "Urgency of the note")
                    .one_of(["low", "normal", "high", "urgent"]),
                ParameterSchema::new(
                    "requires_response",
                    "boolean",
                    "Whether the user must answer this note",
                ),
            ],
            category: Some("board".into()),
            has_side_effects: true,
        }
    }

    async fn execute(&self, arguments: &Value, _ctx: &RunContext) -> Result<ToolOutput, ToolError> {
        let posting: BoardPosting = serde_json::from_value(arguments.clone())?;
        if posting.content.trim().is_empty() {
            return Err(ToolError::Validation("content must not be empty".into()));
        }
        Ok(ToolOutput::Posting(posting))
    }
}
