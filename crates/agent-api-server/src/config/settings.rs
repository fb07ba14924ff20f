use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub rag: RagConfig,
    pub memory: MemoryConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `development` exposes error chains in failure envelopes.
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            environment: "development".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    /// `*` or a comma separated list of origins.
    pub origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: "*".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Daily-rolling log files are written here when set; stdout otherwise.
    pub directory: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_iterations: usize,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_seconds: 60,
            max_iterations: 15,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimension: Option<usize>,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "text-embedding-ada-002".to_string(),
            dimension: None,
            batch_size: 512,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreProvider {
    Pinecone,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub provider: VectorStoreProvider,
    /// Data-plane host of the Pinecone index, e.g. `https://docs-abc123.svc.pinecone.io`.
    pub index_host: String,
    pub api_key: String,
    pub namespace: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: VectorStoreProvider::Pinecone,
            index_host: String::new(),
            api_key: String::new(),
            namespace: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Number of recent turns kept verbatim before folding into the summary.
    pub recent_messages_count: usize,
    pub avg_tokens_per_message: usize,
    pub session_ttl_seconds: u64,
    pub max_sessions: usize,
    pub cleanup_interval_seconds: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_messages_count: 20,
            avg_tokens_per_message: 100,
            session_ttl_seconds: 6 * 60 * 60,
            max_sessions: 10_000,
            cleanup_interval_seconds: 300,
        }
    }
}

impl MemoryConfig {
    pub fn token_budget(&self) -> usize {
        self.recent_messages_count
            .saturating_mul(self.avg_tokens_per_message)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            allowed_extensions: [".pdf", ".docx", ".doc", ".txt", ".md"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_well_known_env();
        Ok(settings)
    }

    /// Fill empty credentials from the variable names operators already use.
    fn apply_well_known_env(&mut self) {
        let openai_key = std::env::var("OPENAI_API_KEY").ok();

        if self.llm.api_key.is_empty() {
            if let Some(key) = &openai_key {
                self.llm.api_key = key.clone();
            }
        }
        if self.embedding.api_key.is_empty() {
            if let Some(key) = &openai_key {
                self.embedding.api_key = key.clone();
            }
        }
        if self.vector_store.api_key.is_empty() {
            if let Ok(key) = std::env::var("PINECONE_API_KEY") {
                self.vector_store.api_key = key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let settings = Settings::default();
        assert_eq!(settings.memory.token_budget(), 2000);
        assert_eq!(settings.upload.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.rag.top_k, 4);
        assert_eq!(settings.llm.max_iterations, 15);
        assert!(!settings.server.is_production());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = Config::builder()
            .set_override("memory.recent_messages_count", 2i64)
            .unwrap()
            .set_override("vector_store.provider", "memory")
            .unwrap()
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();

        assert_eq!(settings.memory.token_budget(), 200);
        assert_eq!(settings.vector_store.provider, VectorStoreProvider::Memory);
        assert_eq!(settings.llm.model, "gpt-3.5-turbo");
    }

    #[test]
    fn oversized_budget_saturates() {
        let memory = MemoryConfig {
            recent_messages_count: usize::MAX,
            avg_tokens_per_message: 100,
            ..MemoryConfig::default()
        };
        assert_eq!(memory.token_budget(), usize::MAX);
    }
}
