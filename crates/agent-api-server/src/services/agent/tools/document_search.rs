use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use super::Tool;
use crate::services::retrieval::{RetrievalService, RetrievedChunk};

pub struct DocumentSearchTool {
    retrieval: Arc<RetrievalService>,
    top_k: usize,
}

impl DocumentSearchTool {
    pub fn new(retrieval: Arc<RetrievalService>, top_k: usize) -> Self {
        Self { retrieval, top_k }
    }
}

fn format_results(results: &[RetrievedChunk]) -> String {
    if results.is_empty() {
        return "No relevant documents found.".to_string();
    }

    let blocks = results
        .iter()
        .enumerate()
        .map(|(idx, chunk)| {
            let source = chunk
                .metadata
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("Unknown");
            format!(
                "[Document {}]\nSource: {}\nContent: {}\n",
                idx + 1,
                source,
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n");

    format!("Found {} relevant document(s):\n\n{}", results.len(), blocks)
}

#[async_trait]
impl Tool for DocumentSearchTool {
    fn name(&self) -> &str {
        "document_search"
    }

    fn description(&self) -> &str {
        "Searches internal documents for relevant information. Use this when you need to find \
         information from company documents, manuals, or knowledge base."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find relevant documents"
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, input: Value) -> String {
        let Some(query) = input.get("query").and_then(Value::as_str) else {
            return "Error searching documents: missing 'query'".to_string();
        };

        match self.retrieval.similarity_search(query, self.top_k, None).await {
            Ok(results) => format_results(&results),
            Err(e) => {
                error!("Document search error: {:#}", e);
                format!("Error searching documents: {}", e)
            }
        }
    }
}
