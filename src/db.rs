//! Qdrant vector store client (REST)
//!
//! Addresses two collections: a filename collection for discovery and a
//! content collection for retrieval. Collection creation and index setup
//! are external; this client only upserts, scrolls, and health-checks.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::store::retry_backoff;
use crate::types::Point;

const UPSERT_ATTEMPTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert `points` in batches of at most `batch_size`, waiting for
    /// durability per batch. Any failed batch fails the whole call. The
    /// cancellation token is checked between batches.
    async fn upsert(
        &self,
        collection: &str,
        points: &[Point],
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Scroll for one point whose `metadata.md5_hash` equals `fingerprint`.
    /// Works (slower) even when the payload field is not indexed.
    async fn exists_by_fingerprint(&self, collection: &str, fingerprint: &str) -> Result<bool>;

    async fn health(&self) -> bool;
}

pub struct QdrantClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantClient {
    pub fn new(config: &Config) -> Self {
        if config.qdrant_prefer_grpc || config.qdrant_grpc_port.is_some() {
            eprintln!(
                "Warning: gRPC transport requested but this client speaks REST; using {}",
                config.qdrant_url()
            );
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.qdrant_url(),
            api_key: config.qdrant_api_key.clone(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn upsert_batch(&self, collection: &str, batch: &[Point]) -> Result<()> {
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, collection
        );
        let body = json!({
            "points": batch
                .iter()
                .map(|p| json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>(),
        });

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let result = self.request(self.http.put(&url)).json(&body).send().await;
            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) if response.status().is_client_error() => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(PipelineError::VectorStoreWriteError(format!(
                        "upsert to '{}' returned {}: {}",
                        collection, status, text
                    )));
                }
                Ok(response) if attempt < UPSERT_ATTEMPTS => {
                    eprintln!(
                        "upsert retry {}/{} for '{}': HTTP {}",
                        attempt,
                        UPSERT_ATTEMPTS,
                        collection,
                        response.status()
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Ok(response) => {
                    return Err(PipelineError::VectorStoreWriteError(format!(
                        "upsert to '{}' returned {}",
                        collection,
                        response.status()
                    )));
                }
                Err(err) if attempt < UPSERT_ATTEMPTS => {
                    eprintln!(
                        "upsert retry {}/{} for '{}': {}",
                        attempt, UPSERT_ATTEMPTS, collection, err
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => {
                    return Err(PipelineError::VectorStoreWriteError(err.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl VectorStore for QdrantClient {
    async fn upsert(
        &self,
        collection: &str,
        points: &[Point],
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for batch in points.chunks(batch_size.max(1)) {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.upsert_batch(collection, batch).await?;
        }
        Ok(())
    }

    async fn exists_by_fingerprint(&self, collection: &str, fingerprint: &str) -> Result<bool> {
        let url = format!("{}/collections/{}/points/scroll", self.base_url, collection);
        let body = json!({
            "filter": {
                "must": [
                    { "key": "metadata.md5_hash", "match": { "value": fingerprint } }
                ]
            },
            "limit": 1,
            "with_payload": false,
            "with_vector": false,
        });

        let response = self
            .request(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::VectorStoreQueryError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::VectorStoreQueryError(format!(
                "scroll on '{}' returned {}",
                collection,
                response.status()
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::VectorStoreQueryError(e.to_string()))?;
        let found = parsed["result"]["points"]
            .as_array()
            .map(|points| !points.is_empty())
            .unwrap_or(false);
        Ok(found)
    }

    async fn health(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{filename_point_id, FilenamePayload};

    #[test]
    fn test_upsert_body_shape() {
        let point = Point {
            id: filename_point_id("doc.pdf"),
            vector: vec![0.1, 0.2],
            payload: serde_json::to_value(FilenamePayload::new("doc.pdf", "00ff00ff00ff00ff"))
                .unwrap(),
        };
        let body = json!({
            "points": [json!({
                "id": point.id,
                "vector": point.vector,
                "payload": point.payload,
            })],
        });
        assert_eq!(body["points"][0]["payload"]["pagecontent"], "doc.pdf");
        assert_eq!(
            body["points"][0]["payload"]["metadata"]["hash"],
            "00ff00ff00ff00ff"
        );
    }

    #[test]
    fn test_scroll_result_parsing() {
        let hit: serde_json::Value = serde_json::from_str(
            r#"{"result": {"points": [{"id": "x"}], "next_page_offset": null}, "status": "ok"}"#,
        )
        .unwrap();
        let found = hit["result"]["points"]
            .as_array()
            .map(|p| !p.is_empty())
            .unwrap_or(false);
        assert!(found);

        let miss: serde_json::Value =
            serde_json::from_str(r#"{"result": {"points": []}, "status": "ok"}"#).unwrap();
        let found = miss["result"]["points"]
            .as_array()
            .map(|p| !p.is_empty())
            .unwrap_or(false);
        assert!(!found);
    }
}
