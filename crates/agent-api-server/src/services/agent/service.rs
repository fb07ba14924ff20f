use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::executor::{AgentEvent, AgentExecutor, AgentStep, GenerationSettings};
use super::prompt::PromptTemplate;
use crate::services::memory::{Memory, MemorySnapshot, RecordOutcome, SessionStore, SummarizingPolicy};

/// Per-call overrides of the generation defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_iterations: Option<usize>,
}

impl AgentOptions {
    pub fn apply(&self, defaults: GenerationSettings) -> GenerationSettings {
        GenerationSettings {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            max_iterations: self
                .max_iterations
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_iterations),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub input: String,
    pub session_id: Option<String>,
    pub context: Option<Value>,
    pub options: AgentOptions,
}

/// Memory state after a call, reported alongside the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub recent_messages_count: usize,
    pub has_summary: bool,
    pub total_turns: usize,
    pub summarized_turns: usize,
    pub summarization_deferred: bool,
}

impl MemoryInfo {
    fn new(memory: &Memory, outcome: RecordOutcome) -> Self {
        Self {
            recent_messages_count: memory.turn_count(),
            has_summary: memory.summary().is_some(),
            total_turns: memory.metadata.total_turns,
            summarized_turns: outcome.summarized_turns,
            summarization_deferred: outcome.deferred,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub output: String,
    pub steps: Vec<AgentStep>,
    pub memory_info: Option<MemoryInfo>,
}

/// One conversational agent: prompt, tools, and its own session memory.
pub struct AgentService {
    name: &'static str,
    executor: Arc<AgentExecutor>,
    template: PromptTemplate,
    store: Arc<dyn SessionStore>,
    policy: Arc<SummarizingPolicy>,
    defaults: GenerationSettings,
}

impl AgentService {
    pub fn new(
        name: &'static str,
        executor: Arc<AgentExecutor>,
        template: PromptTemplate,
        store: Arc<dyn SessionStore>,
        policy: Arc<SummarizingPolicy>,
        defaults: GenerationSettings,
    ) -> Self {
        Self {
            name,
            executor,
            template,
            store,
            policy,
            defaults,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn defaults(&self) -> GenerationSettings {
        self.defaults
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Number of turns kept verbatim before folding starts.
    pub fn recent_messages_target(&self, token_budget: usize) -> usize {
        self.policy.counter().capacity(token_budget)
    }

    pub async fn invoke(&self, request: AgentRequest) -> Result<AgentReply> {
        let settings = request.options.apply(self.defaults);

        let Some(session_id) = request.session_id.as_deref() else {
            let messages = self
                .template
                .render(None, request.context.as_ref(), &request.input);
            let outcome = self
                .executor
                .run(messages, settings)
                .await
                .with_context(|| format!("{} agent run failed", self.name))?;
            return Ok(AgentReply {
                output: outcome.output,
                steps: outcome.steps,
                memory_info: None,
            });
        };

        let handle = self.store.get_or_create(session_id).await;
        // Held for the whole run so concurrent requests on one session are serialized
        let mut memory = handle.lock().await;

        let snapshot = memory.snapshot();
        let messages = self
            .template
            .render(Some(&snapshot), request.context.as_ref(), &request.input);
        let outcome = self
            .executor
            .run(messages, settings)
            .await
            .with_context(|| format!("{} agent run failed", self.name))?;

        let record = self
            .policy
            .record_exchange(&mut memory, request.input, outcome.output.clone())
            .await;
        let memory_info = MemoryInfo::new(&memory, record);

        info!(
            "{} agent answered session {} ({} steps, {} recent turns)",
            self.name,
            session_id,
            outcome.steps.len(),
            memory_info.recent_messages_count
        );

        Ok(AgentReply {
            output: outcome.output,
            steps: outcome.steps,
            memory_info: Some(memory_info),
        })
    }

    /// Stream the agent's answer. The session stays locked until the stream ends or is
    /// dropped; turns are recorded only once the answer completed.
    pub fn stream(&self, request: AgentRequest) -> impl Stream<Item = Result<AgentEvent>> + Send + 'static {
        let executor = self.executor.clone();
        let store = self.store.clone();
        let policy = self.policy.clone();
        let template = self.template;
        let settings = request.options.apply(self.defaults);
        let name = self.name;

        async_stream::try_stream! {
            let mut guard = match request.session_id.as_deref() {
                Some(session_id) => Some(store.get_or_create(session_id).await.lock_owned().await),
                None => None,
            };

            let snapshot = guard.as_ref().map(|memory| memory.snapshot());
            let messages = template.render(snapshot.as_ref(), request.context.as_ref(), &request.input);

            let mut events = Box::pin(executor.stream(messages, settings));
            while let Some(event) = events.next().await {
                let event = event.with_context(|| format!("{} agent stream failed", name))?;

                if let (AgentEvent::Finished(outcome), Some(memory)) = (&event, guard.as_mut()) {
                    policy
                        .record_exchange(memory, request.input.clone(), outcome.output.clone())
                        .await;
                }
                yield event;
            }
        }
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.store.clear(session_id).await
    }

    pub async fn history(&self, session_id: &str) -> MemorySnapshot {
        self.store.load(session_id).await
    }
}
