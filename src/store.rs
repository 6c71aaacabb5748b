//! S3-compatible object store client
//!
//! Works against any S3-compatible endpoint (R2 included): the endpoint is
//! the bare host URL and path-style addressing is forced. Transport errors
//! are retried with exponential backoff inside the client; a missing key is
//! permanent and surfaces as `ObjectNotFound`.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::types::ObjectInfo;

const MAX_ATTEMPTS: usize = 3;

/// Backoff before the given retry attempt (1-based).
pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let exp = attempt.saturating_sub(1).min(6) as u32;
    Duration::from_millis(200u64.saturating_mul(2u64.saturating_pow(exp)).min(10_000))
}

/// List / get / put over a bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Recursive listing under a prefix; paginates transparently and omits
    /// directory-marker keys.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Result<()>;

    async fn health(&self) -> bool;
}

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from the environment config. The endpoint must be the
    /// bare host URL, without the bucket.
    pub fn connect(config: &Config) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            &config.r2_access_key,
            &config.r2_secret_key,
            None,
            None,
            "env",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(&config.r2_endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.r2_bucket.clone(),
        }
    }
}

fn is_not_found<E, R>(err: &SdkError<E, R>) -> bool
where
    E: aws_sdk_s3::error::ProvideErrorMetadata,
{
    matches!(
        aws_sdk_s3::error::ProvideErrorMetadata::code(err),
        Some("NoSuchKey") | Some("NotFound")
    )
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let page = request.send().await.map_err(|e| {
                PipelineError::ObjectStoreGetFailed {
                    key: prefix.to_string(),
                    message: format!("list failed: {}", e),
                }
            })?;

            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    etag: obj.e_tag().map(|t| t.trim_matches('"').to_string()),
                });
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let result = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await;

            match result {
                Ok(output) => {
                    let bytes = output.body.collect().await.map_err(|e| {
                        PipelineError::ObjectStoreGetFailed {
                            key: key.to_string(),
                            message: format!("body read failed: {}", e),
                        }
                    })?;
                    return Ok(bytes.into_bytes().to_vec());
                }
                Err(err) if is_not_found(&err) => {
                    return Err(PipelineError::ObjectNotFound {
                        key: key.to_string(),
                    });
                }
                Err(err) if attempt < MAX_ATTEMPTS => {
                    eprintln!(
                        "get retry {}/{} for '{}': {}",
                        attempt, MAX_ATTEMPTS, key, err
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => {
                    return Err(PipelineError::ObjectStoreGetFailed {
                        key: key.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let mut request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(bytes.clone()));
            if let Some(ct) = content_type {
                request = request.content_type(ct);
            }

            match request.send().await {
                Ok(_) => return Ok(()),
                Err(err) if attempt < MAX_ATTEMPTS => {
                    eprintln!(
                        "put retry {}/{} for '{}': {}",
                        attempt, MAX_ATTEMPTS, key, err
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => {
                    return Err(PipelineError::ObjectStorePutFailed {
                        key: key.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    async fn health(&self) -> bool {
        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send()
            .await
            .is_ok()
    }
}
