//! Remote Markdown conversion client
//!
//! The converter is a job service: submit bytes, poll the task until it
//! completes or fails, then fetch the Markdown result. The poll loop is
//! bounded by a total wall-clock timeout and checks the cancellation token
//! every interval, so shutdown never waits on a slow conversion.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::store::retry_backoff;

const SUBMIT_ATTEMPTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert a document to Markdown. Fails with `converter_unavailable`,
    /// `converter_timeout` or `converter_rejected`.
    async fn convert(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn health(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
    markdown_content: String,
}

pub struct DoclingClient {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    total_timeout: Duration,
}

impl DoclingClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.docling_base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(config.docling_poll_interval_secs),
            total_timeout: Duration::from_secs(config.docling_timeout_secs),
        }
    }

    /// Submit the document; transport errors are retried with backoff.
    async fn submit(&self, bytes: Vec<u8>, filename: &str) -> Result<String> {
        let url = format!("{}/api/convert", self.base_url);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(filename.to_string())
                .mime_str("application/octet-stream")
                .map_err(|e| PipelineError::Internal(e.to_string()))?;
            let form = reqwest::multipart::Form::new()
                .part("file", part)
                .text("filename", filename.to_string());

            let result = self.http.post(&url).multipart(form).send().await;
            match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: SubmitResponse = response.json().await.map_err(|e| {
                        PipelineError::ConverterUnavailable(format!("bad submit response: {}", e))
                    })?;
                    return Ok(parsed.task_id);
                }
                Ok(response) if response.status().is_client_error() => {
                    return Err(PipelineError::ConverterRejected(format!(
                        "submit returned {}",
                        response.status()
                    )));
                }
                Ok(response) if attempt < SUBMIT_ATTEMPTS => {
                    eprintln!(
                        "converter submit retry {}/{} for '{}': HTTP {}",
                        attempt,
                        SUBMIT_ATTEMPTS,
                        filename,
                        response.status()
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Ok(response) => {
                    return Err(PipelineError::ConverterUnavailable(format!(
                        "submit returned {}",
                        response.status()
                    )));
                }
                Err(err) if attempt < SUBMIT_ATTEMPTS => {
                    eprintln!(
                        "converter submit retry {}/{} for '{}': {}",
                        attempt, SUBMIT_ATTEMPTS, filename, err
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => {
                    return Err(PipelineError::ConverterUnavailable(err.to_string()));
                }
            }
        }
    }

    /// Poll until completed/failed, bounded by the total timeout and the
    /// cancellation token.
    async fn wait_for_completion(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = format!("{}/api/status/{}", self.base_url, task_id);
        let deadline = tokio::time::Instant::now() + self.total_timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PipelineError::ConverterTimeout(self.total_timeout.as_secs()));
            }

            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: StatusResponse = response.json().await.map_err(|e| {
                        PipelineError::ConverterUnavailable(format!("bad status response: {}", e))
                    })?;
                    match parsed.status.as_str() {
                        "completed" => return Ok(()),
                        "failed" => {
                            return Err(PipelineError::ConverterRejected(format!(
                                "task {} reported failure",
                                task_id
                            )));
                        }
                        // pending | running: keep polling
                        _ => {}
                    }
                }
                Ok(response) => {
                    eprintln!(
                        "converter status poll for task {}: HTTP {}",
                        task_id,
                        response.status()
                    );
                }
                Err(err) => {
                    eprintln!("converter status poll for task {}: {}", task_id, err);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn fetch_result(&self, task_id: &str) -> Result<String> {
        let url = format!("{}/api/result/{}/json", self.base_url, task_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::ConverterUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::ConverterUnavailable(format!(
                "result fetch returned {}",
                response.status()
            )));
        }

        let parsed: ResultResponse = response.json().await.map_err(|e| {
            PipelineError::ConverterUnavailable(format!("bad result response: {}", e))
        })?;
        Ok(parsed.markdown_content)
    }
}

#[async_trait]
impl Converter for DoclingClient {
    async fn convert(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let task_id = self.submit(bytes, filename).await?;
        self.wait_for_completion(&task_id, cancel).await?;
        self.fetch_result(&task_id).await
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

    #[test]
    fn test_response_parsing() {
        let submit: SubmitResponse =
            serde_json::from_str(r#"{"task_id": "t-123", "queued": true}"#).unwrap();
        assert_eq!(submit.task_id, "t-123");

        let status: StatusResponse =
            serde_json::from_str(r#"{"status": "running", "progress": 0.4}"#).unwrap();
        assert_eq!(status.status, "running");

        let result: ResultResponse =
            serde_json::from_str(r##"{"markdown_content": "# Title"}"##).unwrap();
        assert_eq!(result.markdown_content, "# Title");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let mut config = crate::config::test_config();
        config.docling_base_url = "http://docling.local:5001/".to_string();
        let client = DoclingClient::new(&config);
        assert_eq!(client.base_url, "http://docling.local:5001");
    }
}
