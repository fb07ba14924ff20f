use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::agent::{AgentStep, MemoryInfo};
use crate::services::memory::Turn;
use crate::services::retrieval::RetrievedChunk;

/// Body of `POST /api/agent/invoke`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub message: Option<String>,
    pub session_id: Option<String>,
    pub context: Option<Value>,
    pub options: Option<Value>,
}

/// Body of `POST /api/rag/search`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagSearchRequest {
    pub query: Option<String>,
    pub session_id: Option<String>,
    pub context: Option<Value>,
    pub options: Option<Value>,
}

/// Query string of `GET /api/agent/stream`. `context` and `options` are JSON-encoded.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub message: Option<String>,
    pub session_id: Option<String>,
    pub context: Option<String>,
    pub options: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInvokeData {
    pub response: String,
    pub context: Value,
    pub steps: Vec<AgentStep>,
    pub session_id: Option<String>,
    pub has_memory: bool,
    pub memory_info: Option<MemoryInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistoryData {
    pub session_id: String,
    pub recent_messages: Vec<Turn>,
    pub summary: Option<String>,
    pub total_messages: usize,
    pub max_recent_messages: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigData {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: String,
    pub max_iterations: usize,
}

/// `{success, config}` returned by `GET /api/agent/config`.
#[derive(Debug, Serialize)]
pub struct AgentConfigResponse {
    pub success: bool,
    pub config: AgentConfigData,
}

fn default_k() -> usize {
    4
}

/// Body of `POST /api/rag/documents/search`.
#[derive(Debug, Deserialize)]
pub struct DocumentSearchRequest {
    pub query: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    pub filter: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct DocumentSearchData {
    pub query: String,
    pub results: Vec<RetrievedChunk>,
    pub count: usize,
}
