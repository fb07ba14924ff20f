pub mod settings;

pub use settings::{
    CorsConfig, EmbeddingConfig, LlmConfig, LoggingConfig, MemoryConfig, RagConfig, Settings,
    UploadConfig, VectorStoreConfig, VectorStoreProvider,
};
