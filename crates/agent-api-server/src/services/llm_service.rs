use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::chat::{ChatMessage, ToolCall};
use crate::services::agent::executor::{
    ChatModel, Completion, CompletionDelta, CompletionRequest, DeltaStream,
};
use crate::services::agent::tools::ToolSpec;
use crate::services::memory::{Summarizer, Turn, TurnRole};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("Failed to call LLM API: {0}")]
    Transport(String),

    #[error("Failed to parse LLM response: {0}")]
    Decode(String),

    #[error("No choices returned from LLM")]
    EmptyResponse,
}

impl LlmError {
    /// Timeouts, throttling and server-side failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Transport(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Decode(_) | LlmError::EmptyResponse => false,
        }
    }
}

/// Whether any cause in the chain is a retryable [`LlmError`].
pub fn is_retryable_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<LlmError>().is_some_and(LlmError::is_retryable))
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ToolDefinition<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
struct ChoiceChunk {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// One parsed line of the completion SSE stream.
#[derive(Debug, PartialEq)]
enum SseLine {
    Deltas(Vec<CompletionDelta>),
    Done,
    Ignore,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        return SseLine::Done;
    }

    let chunk: ChatCompletionChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping unparsable stream chunk: {}", e);
            return SseLine::Ignore;
        }
    };

    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            deltas.push(CompletionDelta::Content(content));
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            deltas.push(CompletionDelta::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
    }
    SseLine::Deltas(deltas)
}

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> std::result::Result<Response, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: &request.messages,
            tools: request
                .tools
                .iter()
                .map(|spec| ToolDefinition {
                    kind: "function",
                    function: spec,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }
        // Streams are bounded by the caller's idle timeout instead of a total deadline
        if !stream {
            builder = builder.timeout(Duration::from_secs(self.config.timeout_seconds));
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }
        Ok(response)
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, LlmError> {
        debug!(
            "Chat completion: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let response = self.send(request, false).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Completion {
            content: message.content,
            tool_calls: message.tool_calls.unwrap_or_default(),
        })
    }

    /// Generate completion with streaming
    pub async fn chat_stream(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<DeltaStream, LlmError> {
        debug!("Starting chat stream with {} messages", request.messages.len());

        let mut bytes = self.send(request, true).await?.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(LlmError::from)?;
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);

                    match parse_sse_line(line.trim()) {
                        SseLine::Done => break 'read,
                        SseLine::Deltas(deltas) => {
                            for delta in deltas {
                                yield delta;
                            }
                        }
                        SseLine::Ignore => {}
                    }
                }
            }
        };

        let stream = stream.map(|item: std::result::Result<CompletionDelta, LlmError>| {
            item.map_err(anyhow::Error::new)
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait::async_trait]
impl ChatModel for LlmService {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        Ok(self.generate_chat(&request).await?)
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<DeltaStream> {
        Ok(self.chat_stream(&request).await?)
    }
}

const SUMMARY_INSTRUCTIONS: &str = "Progressively summarize the lines of conversation provided, \
adding onto the previous summary and returning a new summary. Keep names, numbers, decisions \
and open questions. Reply with the summary only.";

fn summary_prompt(existing: Option<&str>, turns: &[Turn]) -> String {
    let lines = turns
        .iter()
        .map(|turn| {
            let speaker = match turn.role() {
                TurnRole::User => "Human",
                TurnRole::Assistant => "AI",
            };
            format!("{}: {}", speaker, turn.content())
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Current summary:\n{}\n\nNew lines of conversation:\n{}\n\nNew summary:",
        existing.unwrap_or("(none)"),
        lines
    )
}

#[async_trait::async_trait]
impl Summarizer for LlmService {
    async fn summarize(&self, existing: Option<String>, turns: Vec<Turn>) -> Result<String> {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(SUMMARY_INSTRUCTIONS),
                ChatMessage::user(summary_prompt(existing.as_deref(), &turns)),
            ],
            tools: Vec::new(),
            temperature: 0.0,
            max_tokens: self.config.max_tokens,
        };

        let completion = self
            .generate_chat(&request)
            .await
            .context("Summarization call failed")?;
        completion
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
            .context("Summarization returned no text")
    }
}
