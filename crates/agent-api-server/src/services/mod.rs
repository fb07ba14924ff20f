pub mod agent;
pub mod document_service;
pub mod embedding_service;
pub mod llm_service;
pub mod memory;
pub mod retrieval;
pub mod vector_store;

pub use document_service::{DocumentService, IngestReport};
pub use embedding_service::EmbeddingService;
pub use llm_service::LlmService;
pub use retrieval::{EmbeddingProvider, RetrievalService};
pub use vector_store::{InMemoryIndex, PineconeIndex, VectorIndex};
