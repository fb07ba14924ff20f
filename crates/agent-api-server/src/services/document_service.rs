use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::UploadConfig;
use crate::document::{check_extension, DocumentParser, IngestError, TextChunker};
use crate::services::retrieval::{DocumentChunk, RetrievalService};
use crate::services::vector_store::Metadata;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub chunks_count: usize,
    pub vector_ids: Vec<String>,
}

/// Upload → text extraction → chunking → embedding → upsert.
pub struct DocumentService {
    retrieval: Arc<RetrievalService>,
    chunker: TextChunker,
    upload: UploadConfig,
}

impl DocumentService {
    pub fn new(retrieval: Arc<RetrievalService>, chunker: TextChunker, upload: UploadConfig) -> Self {
        Self {
            retrieval,
            chunker,
            upload,
        }
    }

    pub fn upload_config(&self) -> &UploadConfig {
        &self.upload
    }

    /// Extension check only; callers run this before reading the body.
    pub fn check_filename(&self, filename: &str) -> Result<String, IngestError> {
        check_extension(filename, &self.upload.allowed_extensions)
    }

    fn check_size(&self, size: usize) -> Result<(), IngestError> {
        if size > self.upload.max_file_size_bytes {
            return Err(IngestError::TooLarge {
                size,
                limit: self.upload.max_file_size_bytes,
            });
        }
        Ok(())
    }

    pub async fn ingest(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        document_id: Option<String>,
    ) -> Result<IngestReport> {
        self.check_filename(filename)?;
        self.check_size(bytes.len())?;

        let document_id = document_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("doc-{}", Utc::now().timestamp_millis()));

        let name = filename.to_string();
        let parsed = tokio::task::spawn_blocking(move || DocumentParser::parse(&name, &bytes))
            .await
            .context("Document parser task failed")??;

        let pieces = self.chunker.chunk(&parsed.content);
        if pieces.is_empty() {
            return Err(IngestError::Empty {
                filename: filename.to_string(),
            }
            .into());
        }

        let added_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| {
                let mut metadata = Metadata::new();
                metadata.insert("source".into(), json!(filename));
                metadata.insert("documentId".into(), json!(document_id));
                metadata.insert("filename".into(), json!(filename));
                metadata.insert("type".into(), json!(parsed.file_type));
                metadata.insert("addedAt".into(), json!(added_at));
                metadata.insert("chunkIndex".into(), json!(index));
                if let Some(pages) = parsed.pages {
                    metadata.insert("pages".into(), json!(pages));
                }
                DocumentChunk { content, metadata }
            })
            .collect();

        let chunks_count = chunks.len();
        let vector_ids = self.retrieval.add_chunks(chunks).await?;

        info!(
            "Ingested {} as {} ({} chunks)",
            filename, document_id, chunks_count
        );

        Ok(IngestReport {
            document_id,
            filename: filename.to_string(),
            chunks_count,
            vector_ids,
        })
    }

    pub async fn delete(&self, document_id: &str) -> Result<()> {
        self.retrieval.delete_document(document_id).await?;
        info!("Deleted vectors of document {}", document_id);
        Ok(())
    }

    /// Replace every chunk of `document_id` with the content of a new upload.
    pub async fn reindex(
        &self,
        document_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestReport> {
        // Validate before deleting so a bad upload leaves the old vectors in place
        self.check_filename(filename)?;
        self.check_size(bytes.len())?;

        self.delete(document_id).await?;
        self.ingest(filename, bytes, Some(document_id.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::retrieval::MockEmbeddingProvider;
    use crate::services::vector_store::InMemoryIndex;

    fn service_with_limit(limit: usize) -> (DocumentService, Arc<InMemoryIndex>) {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed_documents()
            .returning(|texts| Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect()));
        embedder.expect_embed_query().returning(|_| Ok(vec![1.0, 1.0]));

        let index = Arc::new(InMemoryIndex::new());
        let retrieval = Arc::new(RetrievalService::new(Arc::new(embedder), index.clone()));
        let upload = UploadConfig {
            max_file_size_bytes: limit,
            ..UploadConfig::default()
        };
        let service = DocumentService::new(retrieval, TextChunker::new(1000, 200).unwrap(), upload);
        (service, index)
    }

    fn service() -> (DocumentService, Arc<InMemoryIndex>) {
        service_with_limit(10 * 1024 * 1024)
    }

    #[tokio::test]
    async fn test_ingest_text_file() {
        let (service, index) = service();
        let report = service
            .ingest("notes.txt", b"Rust ownership rules.".to_vec(), Some("doc-7".into()))
            .await
            .unwrap();

        assert_eq!(report.document_id, "doc-7");
        assert_eq!(report.filename, "notes.txt");
        assert_eq!(report.chunks_count, 1);
        assert_eq!(report.vector_ids.len(), 1);
        assert_eq!(index.len(), 1);

        let results = service
            .retrieval
            .similarity_search("ownership", 4, None)
            .await
            .unwrap();
        let metadata = &results[0].metadata;
        assert_eq!(metadata["documentId"], "doc-7");
        assert_eq!(metadata["type"], "txt");
        assert_eq!(metadata["chunkIndex"], 0);
        assert!(metadata["addedAt"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_generated_document_id() {
        let (service, _) = service();
        let report = service.ingest("a.md", b"# Title".to_vec(), None).await.unwrap();
        assert!(report.document_id.starts_with("doc-"));
    }

    #[tokio::test]
    async fn test_unsupported_extension_rejected() {
        let (service, index) = service();
        let err = service.ingest("virus.exe", b"MZ".to_vec(), None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::UnsupportedType { .. })
        ));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_file_rejected() {
        let (service, _) = service_with_limit(4);
        let err = service.ingest("big.txt", b"12345".to_vec(), None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::TooLarge { size: 5, limit: 4 })
        ));
    }

    #[tokio::test]
    async fn test_reindex_replaces_vectors() {
        let (service, index) = service();
        service
            .ingest("v1.txt", b"first version".to_vec(), Some("doc-1".into()))
            .await
            .unwrap();
        service
            .ingest("other.txt", b"unrelated".to_vec(), Some("doc-2".into()))
            .await
            .unwrap();

        let report = service
            .reindex("doc-1", "v2.txt", b"second version".to_vec())
            .await
            .unwrap();

        assert_eq!(report.document_id, "doc-1");
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_reindex_with_bad_upload_keeps_old_vectors() {
        let (service, index) = service();
        service
            .ingest("v1.txt", b"first version".to_vec(), Some("doc-1".into()))
            .await
            .unwrap();

        assert!(service.reindex("doc-1", "v2.exe", b"x".to_vec()).await.is_err());
        assert_eq!(index.len(), 1);
    }
}
