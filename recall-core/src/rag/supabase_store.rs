//! Supabase (PostgREST) document storage.
//!
//! Rows live in one table with `{id, content, embedding, metadata,
//! project_id}` columns. Similarity search runs server-side through a
//! Postgres function exposed as an RPC endpoint.
//!
//! A document is identified by `(id, project_id)`, so the table needs a
//! unique constraint on that pair:
//!
//! ```sql
//! alter table knowledge_vectors
//!     add constraint knowledge_vectors_id_project_key unique (id, project_id);
//! ```

use super::store::{KnowledgeStore, Result, StoreError};
use super::types::{null_as_default, DocumentMetadata, KnowledgeDocument, MatchQuery, SearchResult};
use crate::config::{ConfigError, StorageConfig, ENV_SUPABASE_KEY, ENV_SUPABASE_URL};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// A [`KnowledgeStore`] backed by a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    rest_url: String,
    key: String,
    table: String,
    match_function: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl SupabaseStore {
    /// Creates a store for the project at `url`.
    ///
    /// Fails with [`ConfigError::MissingCredential`] when the URL or key is
    /// blank.
    pub fn new(url: &str, key: &str, config: &StorageConfig) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(ConfigError::MissingCredential(ENV_SUPABASE_URL).into());
        }
        if key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(ENV_SUPABASE_KEY).into());
        }

        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StoreError::Request)?;

        Ok(Self {
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            key: key.to_string(),
            table: config.table.clone(),
            match_function: config.match_function.clone(),
            timeout,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url, path))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::from_reqwest(e, self.timeout))?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl KnowledgeStore for SupabaseStore {
    async fn match_documents(&self, query: MatchQuery<'_>) -> Result<Vec<SearchResult>> {
        let body = MatchRequest {
            query_embedding: query.embedding,
            match_threshold: query.threshold,
            match_count: query.top_k,
            filter_project_id: query.project_id,
        };

        let builder = self
            .request(reqwest::Method::POST, &format!("rpc/{}", self.match_function))
            .json(&body);
        let response = self.send(builder).await?;
        let results: Vec<SearchResult> = self.read_json(response).await?;

        debug!(
            project = query.project_id,
            count = results.len(),
            "Server-side match completed"
        );
        Ok(results)
    }

    async fn fetch_partition(&self, project_id: &str) -> Result<Vec<KnowledgeDocument>> {
        let builder = self
            .request(reqwest::Method::GET, &self.table)
            .query(&[("select", "*".to_string()), ("project_id", format!("eq.{project_id}"))]);
        let response = self.send(builder).await?;
        let rows: Vec<Row> = self.read_json(response).await?;

        Ok(rows.into_iter().map(Row::into_document).collect())
    }

    async fn upsert(&self, document: KnowledgeDocument) -> Result<()> {
        let row = UpsertRow {
            id: &document.id,
            content: &document.content,
            embedding: document.embedding.as_deref(),
            metadata: &document.metadata,
            project_id: &document.project_id,
        };

        let builder = self
            .request(reqwest::Method::POST, &self.table)
            .query(&[("on_conflict", "id,project_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);
        self.send(builder).await?;
        Ok(())
    }

    async fn delete(&self, id: &str, project_id: &str) -> Result<()> {
        let builder = self
            .request(reqwest::Method::DELETE, &self.table)
            .query(&[("id", format!("eq.{id}")), ("project_id", format!("eq.{project_id}"))]);
        self.send(builder).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    query_embedding: &'a [f32],
    match_threshold: f32,
    match_count: usize,
    filter_project_id: &'a str,
}

#[derive(Serialize)]
struct UpsertRow<'a> {
    id: &'a str,
    content: &'a str,
    embedding: Option<&'a [f32]>,
    metadata: &'a DocumentMetadata,
    project_id: &'a str,
}

#[derive(Deserialize)]
struct Row {
    id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    content: String,
    #[serde(default, deserialize_with = "lenient_embedding")]
    embedding: Option<Vec<f32>>,
    #[serde(default, deserialize_with = "null_as_default")]
    metadata: DocumentMetadata,
    #[serde(default, deserialize_with = "null_as_default")]
    project_id: String,
}

impl Row {
    fn into_document(self) -> KnowledgeDocument {
        KnowledgeDocument {
            id: self.id,
            content: self.content,
            embedding: self.embedding,
            metadata: self.metadata,
            project_id: self.project_id,
        }
    }
}

/// Accepts an embedding as a JSON array or as pgvector's `"[1,2,3]"` text
/// form. Anything else is treated as missing.
fn lenient_embedding<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Null => None,
        Value::Array(_) => serde_json::from_value(value.clone()).ok(),
        Value::String(text) => serde_json::from_str(text).ok(),
        _ => None,
    };

    if parsed.is_none() && !value.is_null() {
        warn!("Ignoring undecodable embedding column");
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn store_for(url: &str) -> SupabaseStore {
        SupabaseStore::new(url, "service-key", &StorageConfig::default()).unwrap()
    }

    #[test]
    fn test_blank_credentials_fail_fast() {
        let config = StorageConfig::default();
        assert!(matches!(
            SupabaseStore::new("", "key", &config),
            Err(StoreError::Config(ConfigError::MissingCredential(ENV_SUPABASE_URL)))
        ));
        assert!(matches!(
            SupabaseStore::new("https://x.supabase.co", " ", &config),
            Err(StoreError::Config(ConfigError::MissingCredential(ENV_SUPABASE_KEY)))
        ));
    }

    #[test]
    fn test_row_embedding_decoding() {
        let rows: Vec<Row> = serde_json::from_value(json!([
            {"id": "a", "content": "x", "embedding": [0.6, 0.8], "metadata": null, "project_id": "p"},
            {"id": "b", "content": "y", "embedding": "[1,0]", "metadata": {"title": "B"}, "project_id": "p"},
            {"id": "c", "content": "z", "embedding": null, "project_id": "p"},
            {"id": "d", "content": "w", "embedding": "garbage", "project_id": "p"}
        ]))
        .unwrap();

        let docs: Vec<KnowledgeDocument> = rows.into_iter().map(Row::into_document).collect();
        assert_eq!(docs[0].embedding, Some(vec![0.6, 0.8]));
        assert_eq!(docs[1].embedding, Some(vec![1.0, 0.0]));
        assert_eq!(docs[1].metadata.title.as_deref(), Some("B"));
        assert_eq!(docs[2].embedding, None);
        assert_eq!(docs[3].embedding, None);
    }

    #[tokio::test]
    async fn test_match_documents_calls_rpc() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/rpc/match_knowledge")
            .match_header("apikey", "service-key")
            .match_header("authorization", "Bearer service-key")
            .match_body(Matcher::Json(json!({
                "query_embedding": [1.0, 0.0],
                "match_threshold": 0.5,
                "match_count": 3,
                "filter_project_id": "shop"
            })))
            .with_status(200)
            .with_body(r#"[{"id":"a","content":"alpha","metadata":{"title":"A"},"similarity":0.9}]"#)
            .create_async()
            .await;

        let store = store_for(&server.url());
        let results = store
            .match_documents(MatchQuery {
                embedding: &[1.0, 0.0],
                threshold: 0.5,
                top_k: 3,
                project_id: "shop",
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].metadata.title.as_deref(), Some("A"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rest/v1/rpc/match_knowledge")
            .with_status(404)
            .with_body(r#"{"message":"function not found"}"#)
            .create_async()
            .await;

        let store = store_for(&server.url());
        let err = store
            .match_documents(MatchQuery {
                embedding: &[1.0],
                threshold: 0.1,
                top_k: 10,
                project_id: "global",
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fetch_partition_filters_by_project() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/knowledge_vectors")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), "*".into()),
                Matcher::UrlEncoded("project_id".into(), "eq.shop".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"id":"a","content":"alpha","embedding":"[1,0]","metadata":{},"project_id":"shop"}]"#)
            .create_async()
            .await;

        let store = store_for(&server.url());
        let docs = store.fetch_partition("shop").await.unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].project_id, "shop");
        assert!(docs[0].has_embedding());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_merges_on_id_within_project() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/knowledge_vectors")
            .match_query(Matcher::UrlEncoded("on_conflict".into(), "id,project_id".into()))
            .match_header("prefer", Matcher::Regex("resolution=merge-duplicates".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""id":"doc_1""#.into()),
                Matcher::Regex(r#""project_id":"shop""#.into()),
                Matcher::Regex(r#""embedding":\[1\.0,0\.0\]"#.into()),
            ]))
            .with_status(201)
            .create_async()
            .await;

        let store = store_for(&server.url());
        let doc = KnowledgeDocument::new("doc_1", "body")
            .with_embedding(vec![1.0, 0.0])
            .in_project("shop");
        store.upsert(doc).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_partition() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/rest/v1/knowledge_vectors")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "eq.doc_1".into()),
                Matcher::UrlEncoded("project_id".into(), "eq.shop".into()),
            ]))
            .with_status(204)
            .create_async()
            .await;

        let store = store_for(&server.url());
        store.delete("doc_1", "shop").await.unwrap();

        mock.assert_async().await;
    }
}
