//! Ingot - document ingestion orchestrator
//!
//! Pulls binary documents (PDF, Word) out of an S3-compatible bucket,
//! converts them to Markdown through a remote conversion service, chunks
//! and embeds the result, and upserts vectors into two Qdrant collections:
//! one for filename discovery, one for content retrieval.
//!
//! Progress is journaled per document in append-only JSON logs, so re-runs
//! skip everything already carried through and a crash never loses more
//! than the in-flight documents.

pub mod chunker;
pub mod config;
pub mod convert;
pub mod db;
pub mod embed;
pub mod error;
pub mod hash;
pub mod journal;
pub mod pipeline;
pub mod router;
pub mod store;
pub mod types;

pub use chunker::{Chunker, TokenCounter, WordCounter};
pub use config::{Config, JournalFiles};
pub use convert::{Converter, DoclingClient};
pub use db::{QdrantClient, VectorStore};
pub use embed::{Embedder, EmbeddingService, OllamaClient};
pub use error::{PipelineError, Stage};
pub use journal::{Journal, JournalCounts};
pub use pipeline::retry::RetryReport;
pub use pipeline::Pipeline;
pub use store::{ObjectStore, S3ObjectStore};
pub use types::{
    content_point_id, filename_point_id, Chunk, ContentPayload, DocOutcome, ElementType,
    FilenamePayload, FoundIn, ObjectInfo, Point, RunSummary, SkipReason,
};
