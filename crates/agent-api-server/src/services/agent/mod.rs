//! Tool-using conversational agents.
//!
//! `AgentService` renders the prompt from session memory, hands it to the
//! `AgentExecutor` tool loop, and records the finished exchange back into memory.

pub mod executor;
pub mod prompt;
pub mod service;
pub mod tools;

pub use executor::{
    AgentEvent, AgentExecutor, AgentOutcome, AgentStep, ChatModel, Completion, CompletionDelta,
    CompletionRequest, DeltaStream, GenerationSettings, MAX_ITERATIONS_MESSAGE,
};
pub use prompt::PromptTemplate;
pub use service::{AgentOptions, AgentReply, AgentRequest, AgentService, MemoryInfo};
pub use tools::{CalculatorTool, ClockTool, DocumentSearchTool, Tool, ToolSet, ToolSpec};
