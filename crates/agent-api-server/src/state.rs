use anyhow::Result;
use axum::extract::FromRef;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::document::TextChunker;
use crate::services::agent::{
    AgentExecutor, AgentService, CalculatorTool, ChatModel, ClockTool, DocumentSearchTool,
    GenerationSettings, PromptTemplate, ToolSet,
};
use crate::services::memory::{InMemorySessionStore, SessionStore, Summarizer, SummarizingPolicy};
use crate::services::{DocumentService, EmbeddingProvider, RetrievalService, VectorIndex};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub general_agent: Arc<AgentService>,
    pub rag_agent: Arc<AgentService>,
    pub retrieval: Arc<RetrievalService>,
    pub documents: Arc<DocumentService>,
    pub started_at: Instant,
}

impl FromRef<AppState> for Arc<DocumentService> {
    fn from_ref(state: &AppState) -> Self {
        state.documents.clone()
    }
}

impl FromRef<AppState> for Arc<RetrievalService> {
    fn from_ref(state: &AppState) -> Self {
        state.retrieval.clone()
    }
}

impl AppState {
    /// Wire services from their external collaborators.
    pub fn build(
        settings: Settings,
        chat_model: Arc<dyn ChatModel>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        let retrieval = Arc::new(RetrievalService::new(embedder, index));

        let chunker = TextChunker::new(settings.rag.chunk_size, settings.rag.chunk_overlap)?;
        let documents = Arc::new(DocumentService::new(
            retrieval.clone(),
            chunker,
            settings.upload.clone(),
        ));

        let policy = Arc::new(SummarizingPolicy::new(
            settings.memory.avg_tokens_per_message,
            summarizer,
        ));
        let defaults = GenerationSettings {
            temperature: settings.llm.temperature,
            max_tokens: settings.llm.max_tokens,
            max_iterations: settings.llm.max_iterations,
        };
        let idle_timeout = Duration::from_secs(settings.llm.timeout_seconds);

        let general_tools = ToolSet::new().with(CalculatorTool).with(ClockTool);
        let general_agent = Arc::new(AgentService::new(
            "general",
            Arc::new(AgentExecutor::new(
                chat_model.clone(),
                general_tools,
                settings.llm.max_retries,
                idle_timeout,
            )),
            PromptTemplate::general(),
            Self::session_store(&settings),
            policy.clone(),
            defaults,
        ));

        let rag_tools =
            ToolSet::new().with(DocumentSearchTool::new(retrieval.clone(), settings.rag.top_k));
        let rag_agent = Arc::new(AgentService::new(
            "rag",
            Arc::new(AgentExecutor::new(
                chat_model,
                rag_tools,
                settings.llm.max_retries,
                idle_timeout,
            )),
            PromptTemplate::rag(),
            Self::session_store(&settings),
            policy,
            defaults,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            general_agent,
            rag_agent,
            retrieval,
            documents,
            started_at: Instant::now(),
        })
    }

    fn session_store(settings: &Settings) -> Arc<dyn SessionStore> {
        Arc::new(InMemorySessionStore::new(
            settings.memory.token_budget(),
            Duration::from_secs(settings.memory.session_ttl_seconds),
            settings.memory.max_sessions,
        ))
    }

    /// Error responses carry the full error chain outside production.
    pub fn expose_error_details(&self) -> bool {
        !self.settings.server.is_production()
    }

    pub fn session_stores(&self) -> [Arc<dyn SessionStore>; 2] {
        [
            self.general_agent.store().clone(),
            self.rag_agent.store().clone(),
        ]
    }
}
