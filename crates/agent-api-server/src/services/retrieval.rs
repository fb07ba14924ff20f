use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::services::vector_store::{Metadata, VectorIndex, VectorRecord};

/// Metadata key holding the chunk text inside the index.
pub const TEXT_KEY: &str = "text";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Chunk ready for embedding.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Embeds queries and chunks and talks to the vector index.
pub struct RetrievalService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl RetrievalService {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<Value>,
    ) -> Result<Vec<RetrievedChunk>> {
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;

        let matches = self
            .index
            .query(vector, k, filter)
            .await
            .context("Vector search failed")?;

        debug!("Similarity search returned {} matches", matches.len());

        Ok(matches
            .into_iter()
            .map(|m| {
                let mut metadata = m.metadata;
                let content = match metadata.remove(TEXT_KEY) {
                    Some(Value::String(text)) => text,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                RetrievedChunk {
                    content,
                    metadata,
                    score: m.score,
                }
            })
            .collect())
    }

    /// Embed and upsert chunks, returning the generated vector ids in chunk order.
    pub async fn add_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_documents(texts)
            .await
            .context("Failed to embed document chunks")?;

        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "Expected {} embeddings, received {}",
                chunks.len(),
                vectors.len()
            );
        }

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, values)| {
                let mut metadata = chunk.metadata;
                metadata.insert(TEXT_KEY.to_string(), Value::String(chunk.content));
                VectorRecord {
                    id: Uuid::new_v4().to_string(),
                    values,
                    metadata,
                }
            })
            .collect();

        self.index
            .upsert(records)
            .await
            .context("Failed to upsert vectors")
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.index
            .delete_by_filter(json!({ "documentId": document_id }))
            .await
            .with_context(|| format!("Failed to delete vectors of document {}", document_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::vector_store::{InMemoryIndex, MockVectorIndex, ScoredRecord};

    fn chunk(text: &str, document_id: &str) -> DocumentChunk {
        let mut metadata = Metadata::new();
        metadata.insert("documentId".into(), json!(document_id));
        DocumentChunk {
            content: text.to_string(),
            metadata,
        }
    }

    fn keyword_embedder() -> MockEmbeddingProvider {
        fn embed(text: &str) -> Vec<f32> {
            vec![
                text.matches("rust").count() as f32 + 0.01,
                text.matches("python").count() as f32 + 0.01,
            ]
        }
        let mut mock = MockEmbeddingProvider::new();
        mock.expect_embed_query().returning(|q| Ok(embed(q)));
        mock.expect_embed_documents()
            .returning(|texts| Ok(texts.iter().map(|t| embed(t)).collect()));
        mock
    }

    #[tokio::test]
    async fn test_add_then_search_strips_text_key() {
        let service = RetrievalService::new(Arc::new(keyword_embedder()), Arc::new(InMemoryIndex::new()));
        let ids = service
            .add_chunks(vec![chunk("rust rust", "d1"), chunk("python", "d2")])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let results = service.similarity_search("rust", 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "rust rust");
        assert_eq!(results[0].metadata["documentId"], "d1");
        assert!(!results[0].metadata.contains_key(TEXT_KEY));
    }

    #[tokio::test]
    async fn test_delete_document_uses_document_filter() {
        let mut index = MockVectorIndex::new();
        index
            .expect_delete_by_filter()
            .withf(|filter| filter == &json!({"documentId": "doc-1"}))
            .times(1)
            .returning(|_| Ok(()));
        let service = RetrievalService::new(Arc::new(keyword_embedder()), Arc::new(index));

        service.delete_document("doc-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_embedding_failure_is_reported() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed_query()
            .returning(|_| Err(anyhow::anyhow!("quota exceeded")));
        let mut index = MockVectorIndex::new();
        index.expect_query().never();
        let service = RetrievalService::new(Arc::new(embedder), Arc::new(index));

        let err = service.similarity_search("q", 4, None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_missing_text_metadata_yields_empty_content() {
        let mut index = MockVectorIndex::new();
        index.expect_query().returning(|_, _, _| {
            Ok(vec![ScoredRecord {
                id: "v1".into(),
                score: 0.5,
                metadata: Metadata::new(),
            }])
        });
        let service = RetrievalService::new(Arc::new(keyword_embedder()), Arc::new(index));

        let results = service.similarity_search("q", 4, None).await.unwrap();
        assert_eq!(results[0].content, "");
    }
}
