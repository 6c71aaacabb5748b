//! Shared types for the ingestion pipeline

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A listed object in the source store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

impl ObjectInfo {
    /// Basename of the key, extension preserved
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Element class inferred for a chunk of Markdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Text,
    Table,
    List,
    Image,
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementType::Text => write!(f, "Text"),
            ElementType::Table => write!(f, "Table"),
            ElementType::List => write!(f, "List"),
            ElementType::Image => write!(f, "Image"),
        }
    }
}

/// An ordered fragment of a Markdown artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// 1-based, dense
    pub sequence: u32,
    pub text: String,
    pub element_type: ElementType,
    /// md5 digest of the body text
    pub digest: String,
}

/// Why a document was skipped instead of embedded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyEmbedded,
    AlreadyInQdrant,
    ForceReprocessDisabled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyEmbedded => write!(f, "already_embedded"),
            SkipReason::AlreadyInQdrant => write!(f, "already_in_qdrant"),
            SkipReason::ForceReprocessDisabled => write!(f, "force_reprocess_disabled"),
        }
    }
}

/// Which truth source reported the duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoundIn {
    LogFile,
    VectorStore,
    Both,
}

impl std::fmt::Display for FoundIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FoundIn::LogFile => write!(f, "log_file"),
            FoundIn::VectorStore => write!(f, "vector_store"),
            FoundIn::Both => write!(f, "both"),
        }
    }
}

/// A point ready for upsert into a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// Payload of a filename-collection point.
///
/// `metadata.hash` carries the fast xxh64 fingerprint of the source bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilenamePayload {
    pub pagecontent: String,
    pub source: String,
    pub metadata: FilenameMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilenameMetadata {
    pub hash: String,
}

impl FilenamePayload {
    pub fn new(filename: &str, fingerprint: &str) -> Self {
        Self {
            pagecontent: filename.to_string(),
            source: filename.to_string(),
            metadata: FilenameMetadata {
                hash: fingerprint.to_string(),
            },
        }
    }
}

/// Payload of a content-collection point.
///
/// `metadata.md5_hash` carries the fingerprint of the SOURCE document, not
/// the chunk digest: it is the field the dedup scroll filters on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPayload {
    pub pagecontent: String,
    pub metadata: ContentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub filename: String,
    pub page_number: u32,
    pub element_type: String,
    pub md5_hash: String,
}

impl ContentPayload {
    pub fn new(chunk: &Chunk, filename: &str, fingerprint: &str) -> Self {
        Self {
            pagecontent: chunk.text.clone(),
            metadata: ContentMetadata {
                filename: filename.to_string(),
                page_number: chunk.sequence,
                element_type: chunk.element_type.to_string(),
                md5_hash: fingerprint.to_string(),
            },
        }
    }
}

/// Deterministic point id for a filename record.
pub fn filename_point_id(filename: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, filename.as_bytes()).to_string()
}

/// Deterministic point id for a content record, keyed on (filename, sequence).
pub fn content_point_id(filename: &str, sequence: u32) -> String {
    let name = format!("{}:{}", filename, sequence);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Terminal outcome of one document's pass through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOutcome {
    Done,
    Skipped,
    Failed,
}

/// Result of a full pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_files: u64,
    pub new_files: u64,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duration_seconds: f64,
    pub files_per_second: f64,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_key() {
        let obj = ObjectInfo {
            key: "source/a/b/doc.pdf".to_string(),
            size: 10,
            etag: None,
        };
        assert_eq!(obj.filename(), "doc.pdf");

        let flat = ObjectInfo {
            key: "doc.pdf".to_string(),
            size: 10,
            etag: None,
        };
        assert_eq!(flat.filename(), "doc.pdf");
    }

    #[test]
    fn test_element_type_display() {
        assert_eq!(ElementType::Table.to_string(), "Table");
        assert_eq!(ElementType::Image.to_string(), "Image");
    }

    #[test]
    fn test_point_ids_deterministic() {
        assert_eq!(filename_point_id("doc.pdf"), filename_point_id("doc.pdf"));
        assert_ne!(filename_point_id("doc.pdf"), filename_point_id("other.pdf"));
        assert_eq!(content_point_id("doc.pdf", 3), content_point_id("doc.pdf", 3));
        assert_ne!(content_point_id("doc.pdf", 3), content_point_id("doc.pdf", 4));
        // content ids never collide with the filename id
        assert_ne!(filename_point_id("doc.pdf"), content_point_id("doc.pdf", 1));
    }

    #[test]
    fn test_filename_payload_shape() {
        let p = FilenamePayload::new("doc.pdf", "00ff00ff00ff00ff");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["pagecontent"], "doc.pdf");
        assert_eq!(json["source"], "doc.pdf");
        assert_eq!(json["metadata"]["hash"], "00ff00ff00ff00ff");
    }

    #[test]
    fn test_content_payload_shape() {
        let chunk = Chunk {
            sequence: 2,
            text: "| a |\n|---|\n| b |".to_string(),
            element_type: ElementType::Table,
            digest: "d".repeat(32),
        };
        let p = ContentPayload::new(&chunk, "doc.pdf", "00ff00ff00ff00ff");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["pagecontent"], chunk.text);
        assert_eq!(json["metadata"]["filename"], "doc.pdf");
        assert_eq!(json["metadata"]["page_number"], 2);
        assert_eq!(json["metadata"]["element_type"], "Table");
        // source fingerprint, not the chunk digest
        assert_eq!(json["metadata"]["md5_hash"], "00ff00ff00ff00ff");
    }

    #[test]
    fn test_skip_enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&SkipReason::AlreadyInQdrant).unwrap(),
            "\"already_in_qdrant\""
        );
        assert_eq!(
            serde_json::to_string(&FoundIn::LogFile).unwrap(),
            "\"log_file\""
        );
    }
}
