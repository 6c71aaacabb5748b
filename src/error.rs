//! Pipeline error taxonomy
//!
//! Every error is classified by the stage that emitted it; the stage tag is
//! what ends up in the `failed` journal. Clients retry their own retriable
//! transport errors internally, so by the time a `PipelineError` reaches the
//! driver it is terminal for that document.

use thiserror::Error;

/// Pipeline stage that produced an error. Serialized into `failed` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Converter,
    ObjectStore,
    Chunker,
    Embedder,
    VectorStore,
    Pipeline,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Converter => "converter",
            Stage::ObjectStore => "object_store",
            Stage::Chunker => "chunker",
            Stage::Embedder => "embedder",
            Stage::VectorStore => "vector_store",
            Stage::Pipeline => "pipeline",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Stage {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "converter" => Ok(Stage::Converter),
            "object_store" => Ok(Stage::ObjectStore),
            "chunker" => Ok(Stage::Chunker),
            "embedder" => Ok(Stage::Embedder),
            "vector_store" => Ok(Stage::VectorStore),
            "pipeline" => Ok(Stage::Pipeline),
            _ => Err(format!("unknown stage: {}", s)),
        }
    }
}

/// Errors produced by pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("converter unavailable: {0}")]
    ConverterUnavailable(String),

    #[error("converter timed out after {0}s")]
    ConverterTimeout(u64),

    #[error("converter rejected document: {0}")]
    ConverterRejected(String),

    #[error("object store get failed for '{key}': {message}")]
    ObjectStoreGetFailed { key: String, message: String },

    #[error("object not found: '{key}'")]
    ObjectNotFound { key: String },

    #[error("object store put failed for '{key}': {message}")]
    ObjectStorePutFailed { key: String, message: String },

    #[error("chunker failed: {0}")]
    ChunkerFailed(String),

    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    #[error("embedder rejected batch: {0}")]
    EmbedderRejected(String),

    #[error("vector store write failed: {0}")]
    VectorStoreWriteError(String),

    #[error("vector store query failed: {0}")]
    VectorStoreQueryError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// The stage tag recorded in the `failed` journal for this error.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::ConverterUnavailable(_)
            | PipelineError::ConverterTimeout(_)
            | PipelineError::ConverterRejected(_) => Stage::Converter,
            PipelineError::ObjectStoreGetFailed { .. }
            | PipelineError::ObjectNotFound { .. }
            | PipelineError::ObjectStorePutFailed { .. } => Stage::ObjectStore,
            PipelineError::ChunkerFailed(_) => Stage::Chunker,
            PipelineError::EmbedderUnavailable(_) | PipelineError::EmbedderRejected(_) => {
                Stage::Embedder
            }
            PipelineError::VectorStoreWriteError(_) | PipelineError::VectorStoreQueryError(_) => {
                Stage::VectorStore
            }
            PipelineError::Cancelled | PipelineError::Internal(_) => Stage::Pipeline,
        }
    }

    /// Whether a client-level retry (with backoff) is worth attempting.
    /// Terminal rejections and cancellation are never retried.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::ConverterUnavailable(_)
                | PipelineError::ObjectStoreGetFailed { .. }
                | PipelineError::ObjectStorePutFailed { .. }
                | PipelineError::EmbedderUnavailable(_)
                | PipelineError::VectorStoreWriteError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        assert_eq!(
            PipelineError::ConverterTimeout(300).stage(),
            Stage::Converter
        );
        assert_eq!(
            PipelineError::ObjectStoreGetFailed {
                key: "a".into(),
                message: "io".into()
            }
            .stage(),
            Stage::ObjectStore
        );
        assert_eq!(
            PipelineError::ChunkerFailed("bad".into()).stage(),
            Stage::Chunker
        );
        assert_eq!(
            PipelineError::EmbedderRejected("dim".into()).stage(),
            Stage::Embedder
        );
        assert_eq!(
            PipelineError::VectorStoreWriteError("409".into()).stage(),
            Stage::VectorStore
        );
        assert_eq!(PipelineError::Cancelled.stage(), Stage::Pipeline);
    }

    #[test]
    fn test_retriability() {
        assert!(PipelineError::EmbedderUnavailable("conn refused".into()).is_retriable());
        assert!(!PipelineError::EmbedderRejected("unknown model".into()).is_retriable());
        assert!(!PipelineError::ConverterRejected("corrupt pdf".into()).is_retriable());
        assert!(!PipelineError::Cancelled.is_retriable());
    }

    #[test]
    fn test_stage_roundtrip() {
        for stage in [
            Stage::Converter,
            Stage::ObjectStore,
            Stage::Chunker,
            Stage::Embedder,
            Stage::VectorStore,
            Stage::Pipeline,
        ] {
            let s = stage.to_string();
            let parsed: Stage = s.parse().unwrap();
            assert_eq!(stage, parsed);
        }
    }

    #[test]
    fn test_stage_serde_snake_case() {
        let json = serde_json::to_string(&Stage::VectorStore).unwrap();
        assert_eq!(json, "\"vector_store\"");
        let back: Stage = serde_json::from_str("\"object_store\"").unwrap();
        assert_eq!(back, Stage::ObjectStore);
    }
}
