pub mod agent;
pub mod chat;
pub mod envelope;

pub use agent::{
    AgentConfigData, AgentConfigResponse, AgentInvokeData, DocumentSearchData,
    DocumentSearchRequest, InvokeRequest, RagSearchRequest, SessionHistoryData, StreamQuery,
};
pub use chat::{ChatMessage, FunctionCall, MessageRole, ToolCall};
pub use envelope::{ApiResponse, MessageResponse};
