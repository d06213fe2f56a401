//! Run Context
//!
//! Per-run data handed to the prompt strategy and to every tool invocation.

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identity and caller-supplied metadata of one agent run
#[derive(Clone, Debug, Serialize)]
pub struct RunContext {
    /// Agent being run
    pub agent_id: String,

    /// Unique id of this run
    pub run_id: Uuid,

    /// Free-form data from the orchestrator (user id, trigger, task payload...)
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RunContext {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            run_id: Uuid::new_v4(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}
