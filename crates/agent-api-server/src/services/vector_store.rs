use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::VectorStoreConfig;
use crate::utils::cosine_similarity;

pub type Metadata = Map<String, Value>;

/// Pinecone limits upsert requests to 1000 vectors; stay well below it.
const UPSERT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Similarity index over embedded chunks.
///
/// Filters use the Pinecone metadata filter language; [`InMemoryIndex`] understands
/// plain equality plus `$eq`, `$ne` and `$in`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>>;

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<Value>,
    ) -> Result<Vec<ScoredRecord>>;

    async fn delete_by_filter(&self, filter: Value) -> Result<()>;
}

// ============ Pinecone ============

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredRecord>,
}

/// REST client for a Pinecone index data plane.
pub struct PineconeIndex {
    client: Client,
    config: VectorStoreConfig,
}

impl PineconeIndex {
    pub fn new(config: VectorStoreConfig) -> Result<Self> {
        if config.index_host.is_empty() {
            anyhow::bail!("vector_store.index_host is required for the pinecone provider");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.index_host.trim_end_matches('/'), path)
    }

    fn namespace(&self) -> Option<&str> {
        self.config.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .header("Api-Key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call Pinecone {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Pinecone API error on {} ({}): {}", path, status, body);
        }
        Ok(response)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>> {
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let request = UpsertRequest {
                vectors: batch,
                namespace: self.namespace(),
            };
            self.post("/vectors/upsert", &request).await?;
        }
        debug!("Upserted {} vectors to Pinecone", records.len());
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<Value>,
    ) -> Result<Vec<ScoredRecord>> {
        let request = QueryRequest {
            vector: &vector,
            top_k,
            include_metadata: true,
            filter: filter.as_ref(),
            namespace: self.namespace(),
        };
        let response: QueryResponse = self
            .post("/query", &request)
            .await?
            .json()
            .await
            .context("Failed to parse Pinecone query response")?;
        Ok(response.matches)
    }

    async fn delete_by_filter(&self, filter: Value) -> Result<()> {
        let mut body = json!({ "filter": filter });
        if let Some(ns) = self.namespace() {
            body["namespace"] = json!(ns);
        }
        self.post("/vectors/delete", &body).await?;
        Ok(())
    }
}

// ============ In-memory ============

/// Brute-force cosine index for local runs and tests.
#[derive(Default)]
pub struct InMemoryIndex {
    records: DashMap<String, VectorRecord>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        info!("Using in-memory vector index");
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn matches_condition(actual: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, expected)| match op.as_str() {
                "$eq" => actual == Some(expected),
                "$ne" => actual != Some(expected),
                "$in" => expected
                    .as_array()
                    .is_some_and(|values| actual.is_some_and(|a| values.contains(a))),
                _ => false,
            })
        }
        expected => actual == Some(expected),
    }
}

fn matches_filter(metadata: &Metadata, filter: &Value) -> bool {
    match filter.as_object() {
        Some(fields) => fields
            .iter()
            .all(|(key, condition)| matches_condition(metadata.get(key), condition)),
        None => true,
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>> {
        let ids = records.iter().map(|r| r.id.clone()).collect();
        for record in records {
            self.records.insert(record.id.clone(), record);
        }
        Ok(ids)
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<Value>,
    ) -> Result<Vec<ScoredRecord>> {
        let mut scored: Vec<ScoredRecord> = self
            .records
            .iter()
            .filter(|r| filter.as_ref().is_none_or(|f| matches_filter(&r.metadata, f)))
            .filter_map(|r| {
                cosine_similarity(&vector, &r.values).map(|score| ScoredRecord {
                    id: r.id.clone(),
                    score,
                    metadata: r.metadata.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_filter(&self, filter: Value) -> Result<()> {
        let before = self.records.len();
        self.records.retain(|_, r| !matches_filter(&r.metadata, &filter));
        debug!("Deleted {} vectors", before.saturating_sub(self.records.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(id: &str, values: Vec<f32>, document_id: &str) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("documentId".into(), json!(document_id));
        VectorRecord {
            id: id.to_string(),
            values,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_in_memory_query_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index
            .upsert(vec![
                record("a", vec![1.0, 0.0], "d1"),
                record("b", vec![0.7, 0.7], "d1"),
                record("c", vec![0.0, 1.0], "d2"),
            ])
            .await
            .unwrap();

        let results = index.query(vec![1.0, 0.1], 2, None).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_in_memory_filter_and_delete() {
        let index = InMemoryIndex::new();
        index
            .upsert(vec![
                record("a", vec![1.0, 0.0], "d1"),
                record("c", vec![0.0, 1.0], "d2"),
            ])
            .await
            .unwrap();

        let filtered = index
            .query(vec![1.0, 0.0], 4, Some(json!({"documentId": {"$eq": "d2"}})))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "c");

        index.delete_by_filter(json!({"documentId": "d1"})).await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_filter_operators() {
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), json!("pdf"));
        assert!(matches_filter(&metadata, &json!({"type": {"$in": ["pdf", "txt"]}})));
        assert!(matches_filter(&metadata, &json!({"type": {"$ne": "md"}})));
        assert!(!matches_filter(&metadata, &json!({"type": "md"})));
        assert!(!matches_filter(&metadata, &json!({"missing": "x"})));
    }

    fn pinecone(host: String) -> PineconeIndex {
        PineconeIndex::new(VectorStoreConfig {
            index_host: host,
            api_key: "pc-key".to_string(),
            namespace: Some("docs".to_string()),
            ..VectorStoreConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_pinecone_query_sends_top_k_and_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .and(header("Api-Key", "pc-key"))
            .and(body_partial_json(json!({
                "topK": 3,
                "includeMetadata": true,
                "namespace": "docs",
                "filter": {"documentId": "d1"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "matches": [{"id": "v1", "score": 0.92, "metadata": {"text": "hello"}}]
            })))
            .mount(&server)
            .await;

        let results = pinecone(server.uri())
            .query(vec![0.1, 0.2], 3, Some(json!({"documentId": "d1"})))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["text"], "hello");
    }

    #[tokio::test]
    async fn test_pinecone_upsert_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vectors/upsert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"upsertedCount": 1})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/vectors/delete"))
            .and(body_partial_json(json!({"filter": {"documentId": "d1"}, "namespace": "docs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let index = pinecone(server.uri());
        let ids = index.upsert(vec![record("v1", vec![0.5], "d1")]).await.unwrap();
        assert_eq!(ids, vec!["v1".to_string()]);
        index.delete_by_filter(json!({"documentId": "d1"})).await.unwrap();
    }

    #[test]
    fn test_pinecone_requires_host() {
        assert!(PineconeIndex::new(VectorStoreConfig::default()).is_err());
    }
}
