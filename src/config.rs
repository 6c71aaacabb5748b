//! Configuration for the ingestion pipeline
//!
//! Everything is environment-driven. Unknown keys are ignored; missing
//! required keys fail once at startup, before any client is constructed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_SOURCE_PREFIX: &str = "source/";
const DEFAULT_MARKDOWN_PREFIX: &str = "markdown/";
const DEFAULT_QDRANT_PORT: u16 = 6333;
const DEFAULT_OLLAMA_PORT: u16 = 11434;
const DEFAULT_DOCLING_TIMEOUT_SECS: u64 = 300;
const DEFAULT_DOCLING_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_CHUNK_SIZE_TOKENS: usize = 500;
const DEFAULT_CHUNK_OVERLAP_TOKENS: usize = 0;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_LOG_DIR: &str = "logs/";

/// On-disk journal file names, overridable per file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalFiles {
    pub conversion: String,
    pub markdown_upload: String,
    pub embedding: String,
    pub vector_upload: String,
    pub skipped: String,
    pub failed: String,
}

impl Default for JournalFiles {
    fn default() -> Self {
        Self {
            conversion: "conversion_log.json".to_string(),
            markdown_upload: "markdown_upload_log.json".to_string(),
            embedding: "embedding_log.json".to_string(),
            vector_upload: "vector_upload_log.json".to_string(),
            skipped: "skipped_files.json".to_string(),
            failed: "failed_files.json".to_string(),
        }
    }
}

/// Pipeline configuration, resolved from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Object store
    pub r2_endpoint: String,
    pub r2_access_key: String,
    pub r2_secret_key: String,
    pub r2_bucket: String,
    pub source_prefix: String,
    pub markdown_prefix: String,

    // Vector store
    pub qdrant_host: String,
    pub qdrant_port: u16,
    pub qdrant_use_https: bool,
    pub qdrant_api_key: Option<String>,
    pub qdrant_prefer_grpc: bool,
    pub qdrant_grpc_port: Option<u16>,
    pub filename_collection: String,
    pub content_collection: String,

    // Embedder
    pub ollama_host: String,
    pub ollama_port: u16,
    pub filename_model: String,
    pub content_model: String,

    // Converter
    pub docling_base_url: String,
    pub docling_timeout_secs: u64,
    pub docling_poll_interval_secs: u64,

    // Chunking
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,

    // Batching (shared by embedder native batch and upsert batch)
    pub batch_size: usize,

    pub force_reprocess: bool,
    /// Lowercased, dot-prefixed extensions dropped at listing time
    pub skip_extensions: Vec<String>,
    pub worker_count: usize,

    // Journals
    pub log_dir: PathBuf,
    pub journal_files: JournalFiles,
}

impl Config {
    /// Resolve the full configuration from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            r2_endpoint: required("R2_ENDPOINT")?,
            r2_access_key: required("R2_ACCESS_KEY")?,
            r2_secret_key: required("R2_SECRET_KEY")?,
            r2_bucket: required("R2_BUCKET_NAME")?,
            source_prefix: var_or("R2_SOURCE_PREFIX", DEFAULT_SOURCE_PREFIX),
            markdown_prefix: var_or("R2_MARKDOWN_PREFIX", DEFAULT_MARKDOWN_PREFIX),

            qdrant_host: required("QDRANT_HOST")?,
            qdrant_port: parse_or("QDRANT_PORT", DEFAULT_QDRANT_PORT)?,
            qdrant_use_https: bool_or("QDRANT_USE_HTTPS", false),
            qdrant_api_key: optional("QDRANT_API_KEY"),
            qdrant_prefer_grpc: bool_or("QDRANT_PREFER_GRPC", false),
            qdrant_grpc_port: optional("QDRANT_GRPC_PORT")
                .map(|v| v.parse().context("invalid QDRANT_GRPC_PORT"))
                .transpose()?,
            filename_collection: required("QDRANT_FILENAME_COLLECTION")?,
            content_collection: required("QDRANT_CONTENT_COLLECTION")?,

            ollama_host: required("OLLAMA_HOST")?,
            ollama_port: parse_or("OLLAMA_PORT", DEFAULT_OLLAMA_PORT)?,
            filename_model: required("OLLAMA_FILENAME_MODEL")?,
            content_model: required("OLLAMA_CONTENT_MODEL")?,

            docling_base_url: required("DOCLING_BASE_URL")?,
            docling_timeout_secs: parse_or("DOCLING_TIMEOUT", DEFAULT_DOCLING_TIMEOUT_SECS)?,
            docling_poll_interval_secs: parse_or(
                "DOCLING_POLL_INTERVAL",
                DEFAULT_DOCLING_POLL_INTERVAL_SECS,
            )?,

            chunk_size_tokens: parse_or("CHUNK_SIZE_TOKENS", DEFAULT_CHUNK_SIZE_TOKENS)?,
            chunk_overlap_tokens: parse_or("CHUNK_OVERLAP_TOKENS", DEFAULT_CHUNK_OVERLAP_TOKENS)?,
            batch_size: parse_or("BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            force_reprocess: bool_or("FORCE_REPROCESS", false),
            skip_extensions: parse_skip_extensions(optional("SKIP_EXTENSIONS").as_deref()),
            worker_count: parse_or("WORKER_COUNT", DEFAULT_WORKER_COUNT)?,

            log_dir: PathBuf::from(var_or("LOG_DIR", DEFAULT_LOG_DIR)),
            journal_files: JournalFiles {
                conversion: var_or("CONVERSION_LOG_FILE", "conversion_log.json"),
                markdown_upload: var_or("MARKDOWN_UPLOAD_LOG_FILE", "markdown_upload_log.json"),
                embedding: var_or("EMBEDDING_LOG_FILE", "embedding_log.json"),
                vector_upload: var_or("VECTOR_UPLOAD_LOG_FILE", "vector_upload_log.json"),
                skipped: var_or("SKIPPED_LOG_FILE", "skipped_files.json"),
                failed: var_or("FAILED_LOG_FILE", "failed_files.json"),
            },
        })
    }

    /// Base URL of the Qdrant REST endpoint.
    pub fn qdrant_url(&self) -> String {
        let scheme = if self.qdrant_use_https { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.qdrant_host, self.qdrant_port)
    }

    /// Base URL of the Ollama endpoint.
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.ollama_host, self.ollama_port)
    }

    /// Whether a source key's final extension is on the skip list.
    pub fn is_skipped_extension(&self, key: &str) -> bool {
        let name = key.rsplit('/').next().unwrap_or(key);
        match name.rfind('.') {
            Some(idx) => {
                let ext = name[idx..].to_lowercase();
                self.skip_extensions.iter().any(|s| s == &ext)
            }
            None => false,
        }
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{} environment variable not set", key))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(v) => v.parse().with_context(|| format!("invalid {}: {}", key, v)),
        None => Ok(default),
    }
}

fn bool_or(key: &str, default: bool) -> bool {
    match optional(key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

/// Normalize `SKIP_EXTENSIONS`: comma separated, case-insensitive, with or
/// without a leading dot.
fn parse_skip_extensions(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| {
            if e.starts_with('.') {
                e
            } else {
                format!(".{}", e)
            }
        })
        .collect()
}

/// A fully-populated config for tests; no environment reads.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        r2_endpoint: "https://account.r2.example.com".to_string(),
        r2_access_key: "key".to_string(),
        r2_secret_key: "secret".to_string(),
        r2_bucket: "docs".to_string(),
        source_prefix: DEFAULT_SOURCE_PREFIX.to_string(),
        markdown_prefix: DEFAULT_MARKDOWN_PREFIX.to_string(),
        qdrant_host: "qdrant.local".to_string(),
        qdrant_port: DEFAULT_QDRANT_PORT,
        qdrant_use_https: false,
        qdrant_api_key: None,
        qdrant_prefer_grpc: false,
        qdrant_grpc_port: None,
        filename_collection: "filenames".to_string(),
        content_collection: "content".to_string(),
        ollama_host: "ollama.local".to_string(),
        ollama_port: DEFAULT_OLLAMA_PORT,
        filename_model: "all-minilm".to_string(),
        content_model: "nomic-embed-text".to_string(),
        docling_base_url: "http://docling.local:5001".to_string(),
        docling_timeout_secs: DEFAULT_DOCLING_TIMEOUT_SECS,
        docling_poll_interval_secs: DEFAULT_DOCLING_POLL_INTERVAL_SECS,
        chunk_size_tokens: DEFAULT_CHUNK_SIZE_TOKENS,
        chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP_TOKENS,
        batch_size: DEFAULT_BATCH_SIZE,
        force_reprocess: false,
        skip_extensions: Vec::new(),
        worker_count: DEFAULT_WORKER_COUNT,
        log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        journal_files: JournalFiles::default(),
    }
}
