//! Helper-backed tools
//!
//! Adapts each tool the helper lists into the engine's [`Tool`] trait so the
//! model sees local and remote tools the same way.

use std::sync::Arc;

use agent_core::{ParameterSchema, RunContext, Tool, ToolError, ToolOutput, ToolRegistry, ToolSchema};
use async_trait::async_trait;
use serde_json::Value;

use crate::client::RpcClient;
use crate::error::Result;
use crate::protocol::ToolDescriptor;

/// One helper tool, invoked through `tools/call`
pub struct RpcTool {
    client: Arc<RpcClient>,
    schema: ToolSchema,
}

impl RpcTool {
    pub fn new(client: Arc<RpcClient>, descriptor: &ToolDescriptor) -> Self {
        Self {
            client,
            schema: schema_from_descriptor(descriptor),
        }
    }
}

#[async_trait]
impl Tool for RpcTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, arguments: &Value, ctx: &RunContext) -> std::result::Result<ToolOutput, ToolError> {
        tracing::debug!(tool = %self.schema.name, run_id = %ctx.run_id, "calling helper tool");
        let arguments = if arguments.is_null() { Value::Object(serde_json::Map::new()) } else { arguments.clone() };

        let result = self
            .client
            .call_tool(&self.schema.name, arguments)
            .await
            .map_err(|e| ToolError::execution(e.to_string()))?;

        let text = result.text();
        if result.is_error {
            return Err(ToolError::execution(text));
        }

        // Structured payloads stay structured; anything else is plain text.
        Ok(match serde_json::from_str::<Value>(&text) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => ToolOutput::Data(value),
            _ => ToolOutput::text(text),
        })
    }
}

/// Map a JSON-Schema `inputSchema` to parameter definitions, keeping each
/// property's schema verbatim.
pub fn schema_from_descriptor(descriptor: &ToolDescriptor) -> ToolSchema {
    let required: Vec<&str> = descriptor
        .input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let parameters = descriptor
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| {
                    let param_type = match prop.get("type") {
                        Some(Value::String(t)) => t.clone(),
                        Some(Value::Array(types)) => types
                            .iter()
                            .filter_map(Value::as_str)
                            .find(|t| *t != "null")
                            .unwrap_or("string")
                            .to_string(),
                        _ => "string".into(),
                    };
                    let description = prop.get("description").and_then(Value::as_str).unwrap_or_default();
                    ParameterSchema {
                        required: required.contains(&name.as_str()),
                        default: prop.get("default").cloned(),
                        enum_values: prop.get("enum").and_then(Value::as_array).cloned(),
                        schema: Some(prop.clone()),
                        ..ParameterSchema::new(name, param_type, description)
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    ToolSchema {
        parameters,
        category: Some("helper".into()),
        ..ToolSchema::new(&descriptor.name, &descriptor.description)
    }
}

/// List every helper tool and register it. Returns the registered names.
pub async fn register_remote_tools(client: &Arc<RpcClient>, registry: &mut ToolRegistry) -> Result<Vec<String>> {
    let descriptors = client.list_tools().await?;
    let mut names = Vec::with_capacity(descriptors.len());
    for descriptor in &descriptors {
        match registry.register(RpcTool::new(Arc::clone(client), descriptor)) {
            Ok(()) => names.push(descriptor.name.clone()),
            Err(err) => tracing::warn!(tool = %descriptor.name, error = %err, "skipping helper tool"),
        }
    }
    tracing::info!(count = names.len(), "registered helper tools");
    Ok(names)
}
