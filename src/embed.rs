//! Embedding client and dedup-aware embedding service
//!
//! Two models serve two collections: a small filename model for discovery
//! vectors and a larger content model for chunk vectors. The remote service
//! exposes one native batch operation; vectors come back in input order.
//!
//! The service layer owns the dedup decision: the embedding journal is
//! consulted first, the vector store second, and only a miss on both sides
//! costs an embed call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::db::VectorStore;
use crate::error::{PipelineError, Result};
use crate::journal::Journal;
use crate::store::retry_backoff;
use crate::types::{Chunk, FoundIn, SkipReason};

const EMBED_ATTEMPTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Remote batch embedding operation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `inputs` with `model`; the result has the same length and order.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn health(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.ollama_url(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let request = EmbedRequest { model, input: inputs };
            let result = self.http.post(&url).json(&request).send().await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbedResponse = response.json().await.map_err(|e| {
                        PipelineError::EmbedderUnavailable(format!("bad embed response: {}", e))
                    })?;
                    if parsed.embeddings.len() != inputs.len() {
                        return Err(PipelineError::EmbedderRejected(format!(
                            "expected {} vectors, got {}",
                            inputs.len(),
                            parsed.embeddings.len()
                        )));
                    }
                    return Ok(parsed.embeddings);
                }
                Ok(response) if response.status().is_client_error() => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(PipelineError::EmbedderRejected(format!(
                        "model '{}' returned {}: {}",
                        model, status, body
                    )));
                }
                Ok(response) if attempt < EMBED_ATTEMPTS => {
                    eprintln!(
                        "embed retry {}/{} ({}): HTTP {}",
                        attempt,
                        EMBED_ATTEMPTS,
                        model,
                        response.status()
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Ok(response) => {
                    return Err(PipelineError::EmbedderUnavailable(format!(
                        "embed returned {}",
                        response.status()
                    )));
                }
                Err(err) if attempt < EMBED_ATTEMPTS => {
                    eprintln!("embed retry {}/{} ({}): {}", attempt, EMBED_ATTEMPTS, model, err);
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => {
                    return Err(PipelineError::EmbedderUnavailable(err.to_string()));
                }
            }
        }
    }

    async fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Embedding orchestration over the raw client: model routing, batching,
/// dedup against journal and vector store, and journaling of successes.
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    journal: Arc<Journal>,
    filename_model: String,
    content_model: String,
    batch_size: usize,
}

impl EmbeddingService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        journal: Arc<Journal>,
        config: &Config,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            journal,
            filename_model: config.filename_model.clone(),
            content_model: config.content_model.clone(),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Embed the original filename with the filename model and journal the
    /// embedding for the filename collection.
    pub async fn embed_filename(
        &self,
        filename: &str,
        fingerprint: &str,
        collection: &str,
    ) -> Result<Vec<f32>> {
        let started = Instant::now();
        let vectors = self
            .embedder
            .embed(&self.filename_model, &[filename.to_string()])
            .await?;
        let vector = vectors.into_iter().next().ok_or_else(|| {
            PipelineError::EmbedderRejected("empty vector list for filename".to_string())
        })?;

        self.journal
            .add_embedding_entry(
                filename,
                fingerprint,
                collection,
                1,
                started.elapsed().as_secs_f64(),
                &self.filename_model,
            )
            .map_err(|e| PipelineError::Internal(e.to_string()))?;

        Ok(vector)
    }

    /// Embed all chunks with the content model unless the fingerprint is
    /// already known. Returns `None` when the document was skipped; the
    /// skip is journaled with its truth source.
    pub async fn embed_batch_with_dedup(
        &self,
        filename: &str,
        fingerprint: &str,
        chunks: &[Chunk],
        collection: &str,
        force: bool,
    ) -> Result<Option<Vec<Vec<f32>>>> {
        if !force {
            if self.journal.check_embedding_exists(fingerprint, collection) {
                self.journal
                    .add_skipped_entry(
                        filename,
                        fingerprint,
                        SkipReason::AlreadyEmbedded,
                        FoundIn::LogFile,
                        collection,
                    )
                    .map_err(|e| PipelineError::Internal(e.to_string()))?;
                return Ok(None);
            }
            if self
                .vector_store
                .exists_by_fingerprint(collection, fingerprint)
                .await?
            {
                self.journal
                    .add_skipped_entry(
                        filename,
                        fingerprint,
                        SkipReason::AlreadyInQdrant,
                        FoundIn::VectorStore,
                        collection,
                    )
                    .map_err(|e| PipelineError::Internal(e.to_string()))?;
                return Ok(None);
            }
        }

        let started = Instant::now();
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_vectors = self.embedder.embed(&self.content_model, &texts).await?;
            vectors.extend(batch_vectors);
        }

        self.journal
            .add_embedding_entry(
                filename,
                fingerprint,
                collection,
                chunks.len() as u32,
                started.elapsed().as_secs_f64(),
                &self.content_model,
            )
            .map_err(|e| PipelineError::Internal(e.to_string()))?;

        Ok(Some(vectors))
    }

    pub fn content_model(&self) -> &str {
        &self.content_model
    }

    pub fn filename_model(&self) -> &str {
        &self.filename_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_request_shape() {
        let inputs = vec!["alpha".to_string(), "beta".to_string()];
        let request = EmbedRequest {
            model: "nomic-embed-text",
            input: &inputs,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "nomic-embed-text");
        assert_eq!(json["input"], serde_json::json!(["alpha", "beta"]));
    }

    #[test]
    fn test_embed_response_parsing() {
        let parsed: EmbedResponse = serde_json::from_str(
            r#"{"model": "m", "embeddings": [[0.1, 0.2], [0.3, 0.4]], "total_duration": 1}"#,
        )
        .unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1], vec![0.3, 0.4]);
    }
}
