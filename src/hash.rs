//! Content hashing for journaling and deduplication
//!
//! Two hash families with distinct jobs:
//! - md5 (32 hex chars) for journal digests and chunk identity
//! - xxh64 (16 hex chars) as the deduplication fingerprint shared between
//!   journals and the vector store payloads

use xxhash_rust::xxh64::xxh64;

/// Strong 128-bit digest of raw bytes, lowercase hex.
pub fn strong(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Fast 64-bit fingerprint of raw bytes, lowercase hex, zero-padded to 16.
///
/// This is the dedup key. It is stored under the historical field names
/// `md5_hash` and `metadata.hash` even though it is not an md5 value.
pub fn fast(bytes: &[u8]) -> String {
    format!("{:016x}", xxh64(bytes, 0))
}

/// Strong digest of a text chunk body, lowercase hex.
pub fn digest(text: &str) -> String {
    strong(text.as_bytes())
}
