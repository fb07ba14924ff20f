use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::tools::{ToolSet, ToolSpec};
use crate::models::chat::{ChatMessage, ToolCall};
use crate::services::llm_service::{is_retryable_error, LlmError};

/// Final answer returned when the tool loop runs out of iterations.
pub const MAX_ITERATIONS_MESSAGE: &str = "Agent stopped due to max iterations.";

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Incremental piece of a streamed completion. Tool-call fragments share an `index`
/// and their `arguments` concatenate.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionDelta {
    Content(String),
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<CompletionDelta>> + Send>>;

/// Function-calling chat model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    async fn complete_stream(&self, request: CompletionRequest) -> Result<DeltaStream>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_iterations: usize,
}

/// One tool invocation in the trace returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStep {
    pub tool: String,
    pub tool_input: Value,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub output: String,
    pub steps: Vec<AgentStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Token(String),
    Step(AgentStep),
    Finished(AgentOutcome),
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Drives the model/tool loop: ask the model, run the tools it requests, feed the
/// results back, until it answers in plain text or the iteration cap is hit.
pub struct AgentExecutor {
    model: Arc<dyn ChatModel>,
    tools: ToolSet,
    max_retries: u32,
    backoff: Duration,
    idle_timeout: Duration,
}

impl AgentExecutor {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolSet, max_retries: u32, idle_timeout: Duration) -> Self {
        Self {
            model,
            tools,
            max_retries,
            backoff: Duration::from_millis(500),
            idle_timeout,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    fn request(&self, messages: &[ChatMessage], settings: &GenerationSettings) -> CompletionRequest {
        CompletionRequest {
            messages: messages.to_vec(),
            tools: self.tools.specs(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// Retry retryable model failures with linear backoff.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_retryable_error(&e) => {
                    attempt += 1;
                    warn!(
                        "Model call failed (attempt {}/{}), retrying: {:#}",
                        attempt,
                        self.max_retries + 1,
                        e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_tool_calls(
        &self,
        messages: &mut Vec<ChatMessage>,
        content: Option<String>,
        calls: Vec<ToolCall>,
    ) -> Vec<AgentStep> {
        messages.push(ChatMessage::assistant_tool_calls(content, calls.clone()));

        let mut steps = Vec::with_capacity(calls.len());
        for call in calls {
            let observation = self
                .tools
                .invoke(&call.function.name, &call.function.arguments)
                .await;
            let tool_input = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));

            messages.push(ChatMessage::tool_result(call.id, observation.clone()));
            steps.push(AgentStep {
                tool: call.function.name,
                tool_input,
                observation,
            });
        }
        steps
    }

    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
        settings: GenerationSettings,
    ) -> Result<AgentOutcome> {
        let mut steps = Vec::new();

        for iteration in 0..settings.max_iterations {
            let request = self.request(&messages, &settings);
            let completion = self
                .with_retry(|| self.model.complete(request.clone()))
                .await?;

            if completion.tool_calls.is_empty() {
                info!(
                    "Agent finished after {} iteration(s), {} tool call(s)",
                    iteration + 1,
                    steps.len()
                );
                return Ok(AgentOutcome {
                    output: completion.content.unwrap_or_default(),
                    steps,
                });
            }

            debug!(
                "Iteration {}: model requested {} tool call(s)",
                iteration + 1,
                completion.tool_calls.len()
            );
            let new_steps = self
                .run_tool_calls(&mut messages, completion.content, completion.tool_calls)
                .await;
            steps.extend(new_steps);
        }

        warn!("Agent hit max iterations ({})", settings.max_iterations);
        Ok(AgentOutcome {
            output: MAX_ITERATIONS_MESSAGE.to_string(),
            steps,
        })
    }

    /// Streaming variant of [`run`](Self::run): answer text is forwarded as it arrives,
    /// each tool invocation is reported as a step, and the last event is `Finished`.
    pub fn stream(
        self: Arc<Self>,
        mut messages: Vec<ChatMessage>,
        settings: GenerationSettings,
    ) -> impl Stream<Item = Result<AgentEvent>> + Send + 'static {
        let executor = self;
        async_stream::try_stream! {
            let mut steps = Vec::new();
            let mut answer: Option<String> = None;

            for iteration in 0..settings.max_iterations {
                let request = executor.request(&messages, &settings);
                let mut deltas = executor
                    .with_retry(|| executor.model.complete_stream(request.clone()))
                    .await?;

                let mut content = String::new();
                let mut calls: BTreeMap<usize, PartialCall> = BTreeMap::new();

                loop {
                    let next = tokio::time::timeout(executor.idle_timeout, deltas.next())
                        .await
                        .map_err(|_| anyhow::Error::new(LlmError::Timeout))?;

                    let Some(delta) = next else { break };
                    match delta? {
                        CompletionDelta::Content(text) => {
                            content.push_str(&text);
                            yield AgentEvent::Token(text);
                        }
                        CompletionDelta::ToolCall { index, id, name, arguments } => {
                            let call = calls.entry(index).or_default();
                            if let Some(id) = id {
                                call.id = id;
                            }
                            if let Some(name) = name {
                                call.name.push_str(&name);
                            }
                            call.arguments.push_str(&arguments);
                        }
                    }
                }

                if calls.is_empty() {
                    debug!("Stream finished after {} iteration(s)", iteration + 1);
                    answer = Some(content);
                    break;
                }

                let tool_calls: Vec<ToolCall> = calls
                    .into_iter()
                    .map(|(index, call)| {
                        let id = if call.id.is_empty() {
                            format!("call_{}", index)
                        } else {
                            call.id
                        };
                        ToolCall::new(id, call.name, call.arguments)
                    })
                    .collect();

                let content = (!content.is_empty()).then_some(content);
                let new_steps = executor.run_tool_calls(&mut messages, content, tool_calls).await;
                for step in new_steps {
                    yield AgentEvent::Step(step.clone());
                    steps.push(step);
                }
            }

            let output = match answer {
                Some(output) => output,
                None => {
                    warn!("Agent stream hit max iterations ({})", settings.max_iterations);
                    MAX_ITERATIONS_MESSAGE.to_string()
                }
            };
            yield AgentEvent::Finished(AgentOutcome { output, steps });
        }
    }
}
