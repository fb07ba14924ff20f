//! Tools the agents can call through the model's function-calling interface.

mod calculator;
mod clock;
mod document_search;

pub use calculator::{evaluate, CalculatorTool, EvalError};
pub use clock::ClockTool;
pub use document_search::DocumentSearchTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Function definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema object
    pub parameters: Value,
}

/// A callable tool. `invoke` reports failures as text so the model can react to them.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    async fn invoke(&self, input: Value) -> String;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Ordered, name-addressable collection of tools.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.register(Arc::new(tool));
        self
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool by name with the raw JSON arguments string produced by the model.
    pub async fn invoke(&self, name: &str, raw_arguments: &str) -> String {
        let Some(tool) = self.get(name) else {
            warn!("Model requested unknown tool: {}", name);
            return format!(
                "Error: unknown tool '{}'. Available tools: {}",
                name,
                self.names().join(", ")
            );
        };

        let input = if raw_arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw_arguments) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Invalid arguments for tool {}: {}", name, e);
                    return format!("Error: invalid arguments for tool '{}': {}", name, e);
                }
            }
        };

        debug!("Invoking tool {} with {}", name, input);
        tool.invoke(input).await
    }
}
