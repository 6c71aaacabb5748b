//! Append-only JSON journals with in-memory membership indices
//!
//! Six journals track per-document progress: conversion, markdown upload,
//! embedding, vector upload, skipped, failed. Each is a single JSON array on
//! disk. Appends rewrite the array through a sibling temp file, fsync, then
//! rename, so a crash at any point leaves either the old or the new file,
//! never a torn one.
//!
//! The journals are the source of truth for "has this document been
//! processed"; the vector store is the fallback truth consulted by the
//! embedding service.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::JournalFiles;
use crate::error::Stage;
use crate::types::{FoundIn, SkipReason};

/// Current UTC time as an ISO-8601 string.
pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionEntry {
    pub filename: String,
    /// strong digest of the source bytes
    pub hash: String,
    pub datetime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownUploadEntry {
    pub filename: String,
    pub hash: String,
    pub datetime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub filename: String,
    /// fast fingerprint, historical field name
    pub md5_hash: String,
    pub collection_name: String,
    pub chunks_created: u32,
    /// seconds spent in the embed call
    pub embedding_time: f64,
    pub model_name: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorUploadEntry {
    pub filename: String,
    pub md5_hash: String,
    pub collection_name: String,
    pub points_uploaded: u32,
    pub point_ids: Vec<String>,
    pub batch_size: u32,
    pub upload_time_seconds: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub filename: String,
    pub md5_hash: String,
    pub skip_reason: SkipReason,
    pub found_in: FoundIn,
    pub collection_name: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    pub filename: String,
    /// strong digest of the source bytes (empty when hashing never ran)
    pub hash: String,
    pub error: String,
    pub stage: Stage,
    pub timestamp: String,
}

/// Entry counts across all six journals, for operator status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalCounts {
    pub conversion: usize,
    pub markdown_upload: usize,
    pub embedding: usize,
    pub vector_upload: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// One on-disk JSON array plus its in-memory copy.
#[derive(Debug)]
struct Log<T> {
    path: PathBuf,
    entries: Vec<T>,
}

impl<T: Serialize + DeserializeOwned> Log<T> {
    /// Read the file; missing or empty files are an empty journal.
    fn load(path: PathBuf) -> Result<Self> {
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt journal file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read {}", path.display()));
            }
        };
        Ok(Self { path, entries })
    }

    fn append(&mut self, entry: T) -> Result<()> {
        self.entries.push(entry);
        self.persist()
    }

    /// Write the full array to `<file>.tmp`, fsync, rename over the target.
    fn persist(&self) -> Result<()> {
        let tmp = tmp_path(&self.path);
        let data = serde_json::to_vec_pretty(&self.entries)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("cannot create {}", tmp.display()))?;
        file.write_all(&data)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("cannot replace {}", self.path.display()))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// All six journals behind one handle. Every method is safe to call from
/// concurrent workers; each journal serializes behind its own mutex.
#[derive(Debug)]
pub struct Journal {
    conversion: Mutex<(Log<ConversionEntry>, HashSet<String>)>,
    markdown_upload: Mutex<(Log<MarkdownUploadEntry>, HashSet<String>)>,
    embedding: Mutex<(Log<EmbeddingEntry>, HashSet<(String, String)>)>,
    vector_upload: Mutex<(Log<VectorUploadEntry>, HashSet<String>)>,
    skipped: Mutex<(Log<SkippedEntry>, HashSet<(String, String)>)>,
    failed: Mutex<Log<FailedEntry>>,
}

impl Journal {
    /// Load all journals from `log_dir`, creating the directory if needed.
    pub fn load(log_dir: &Path, files: &JournalFiles) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("cannot create log dir {}", log_dir.display()))?;

        let conversion: Log<ConversionEntry> = Log::load(log_dir.join(&files.conversion))?;
        let conversion_index = conversion.entries.iter().map(|e| e.hash.clone()).collect();

        let markdown_upload: Log<MarkdownUploadEntry> =
            Log::load(log_dir.join(&files.markdown_upload))?;
        let markdown_index = markdown_upload
            .entries
            .iter()
            .map(|e| e.hash.clone())
            .collect();

        let embedding: Log<EmbeddingEntry> = Log::load(log_dir.join(&files.embedding))?;
        let embedding_index = embedding
            .entries
            .iter()
            .map(|e| (e.md5_hash.clone(), e.collection_name.clone()))
            .collect();

        let vector_upload: Log<VectorUploadEntry> =
            Log::load(log_dir.join(&files.vector_upload))?;
        let vector_index = vector_upload
            .entries
            .iter()
            .map(|e| e.md5_hash.clone())
            .collect();

        let skipped: Log<SkippedEntry> = Log::load(log_dir.join(&files.skipped))?;
        let skipped_index = skipped
            .entries
            .iter()
            .map(|e| (e.md5_hash.clone(), e.collection_name.clone()))
            .collect();

        let failed: Log<FailedEntry> = Log::load(log_dir.join(&files.failed))?;

        Ok(Self {
            conversion: Mutex::new((conversion, conversion_index)),
            markdown_upload: Mutex::new((markdown_upload, markdown_index)),
            embedding: Mutex::new((embedding, embedding_index)),
            vector_upload: Mutex::new((vector_upload, vector_index)),
            skipped: Mutex::new((skipped, skipped_index)),
            failed: Mutex::new(failed),
        })
    }

    /// O(1): has any vector-upload entry been journaled for this fingerprint?
    pub fn is_uploaded(&self, fingerprint: &str) -> bool {
        self.vector_upload.lock().unwrap().1.contains(fingerprint)
    }

    /// O(1): has an embedding entry been journaled for (fingerprint, collection)?
    pub fn check_embedding_exists(&self, fingerprint: &str, collection: &str) -> bool {
        self.embedding
            .lock()
            .unwrap()
            .1
            .contains(&(fingerprint.to_string(), collection.to_string()))
    }

    /// O(1): has a conversion been journaled for this strong digest?
    pub fn has_conversion(&self, hash: &str) -> bool {
        self.conversion.lock().unwrap().1.contains(hash)
    }

    /// O(1): has a markdown upload been journaled for this strong digest?
    pub fn has_markdown_upload(&self, hash: &str) -> bool {
        self.markdown_upload.lock().unwrap().1.contains(hash)
    }

    pub fn add_conversion_entry(&self, filename: &str, hash: &str) -> Result<()> {
        let mut guard = self.conversion.lock().unwrap();
        guard.0.append(ConversionEntry {
            filename: filename.to_string(),
            hash: hash.to_string(),
            datetime: now_iso(),
        })?;
        guard.1.insert(hash.to_string());
        Ok(())
    }

    pub fn add_markdown_upload_entry(&self, filename: &str, hash: &str) -> Result<()> {
        let mut guard = self.markdown_upload.lock().unwrap();
        guard.0.append(MarkdownUploadEntry {
            filename: filename.to_string(),
            hash: hash.to_string(),
            datetime: now_iso(),
        })?;
        guard.1.insert(hash.to_string());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_embedding_entry(
        &self,
        filename: &str,
        fingerprint: &str,
        collection: &str,
        chunks_created: u32,
        embedding_time: f64,
        model_name: &str,
    ) -> Result<()> {
        let mut guard = self.embedding.lock().unwrap();
        guard.0.append(EmbeddingEntry {
            filename: filename.to_string(),
            md5_hash: fingerprint.to_string(),
            collection_name: collection.to_string(),
            chunks_created,
            embedding_time,
            model_name: model_name.to_string(),
            timestamp: now_iso(),
        })?;
        guard
            .1
            .insert((fingerprint.to_string(), collection.to_string()));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_vector_upload_entry(
        &self,
        filename: &str,
        fingerprint: &str,
        collection: &str,
        points_uploaded: u32,
        point_ids: Vec<String>,
        batch_size: u32,
        upload_time_seconds: f64,
    ) -> Result<()> {
        let mut guard = self.vector_upload.lock().unwrap();
        guard.0.append(VectorUploadEntry {
            filename: filename.to_string(),
            md5_hash: fingerprint.to_string(),
            collection_name: collection.to_string(),
            points_uploaded,
            point_ids,
            batch_size,
            upload_time_seconds,
            timestamp: now_iso(),
        })?;
        guard.1.insert(fingerprint.to_string());
        Ok(())
    }

    pub fn add_skipped_entry(
        &self,
        filename: &str,
        fingerprint: &str,
        skip_reason: SkipReason,
        found_in: FoundIn,
        collection: &str,
    ) -> Result<()> {
        let mut guard = self.skipped.lock().unwrap();
        guard.0.append(SkippedEntry {
            filename: filename.to_string(),
            md5_hash: fingerprint.to_string(),
            skip_reason,
            found_in,
            collection_name: collection.to_string(),
            timestamp: now_iso(),
        })?;
        guard
            .1
            .insert((fingerprint.to_string(), collection.to_string()));
        Ok(())
    }

    pub fn add_failed_entry(
        &self,
        filename: &str,
        hash: &str,
        error: &str,
        stage: Stage,
    ) -> Result<()> {
        self.failed.lock().unwrap().append(FailedEntry {
            filename: filename.to_string(),
            hash: hash.to_string(),
            error: error.to_string(),
            stage,
            timestamp: now_iso(),
        })
    }

    /// Snapshot of the failed journal, for the retry pass.
    pub fn failed_entries(&self) -> Vec<FailedEntry> {
        self.failed.lock().unwrap().entries.clone()
    }

    /// Drop all failed entries for `filename`. Returns true if any were removed.
    pub fn remove_failed(&self, filename: &str) -> Result<bool> {
        let mut guard = self.failed.lock().unwrap();
        let before = guard.entries.len();
        guard.entries.retain(|e| e.filename != filename);
        if guard.entries.len() == before {
            return Ok(false);
        }
        guard.persist()?;
        Ok(true)
    }

    /// Replace the error on an existing failed entry (or append a fresh one).
    pub fn update_failed(
        &self,
        filename: &str,
        hash: &str,
        error: &str,
        stage: Stage,
    ) -> Result<()> {
        let mut guard = self.failed.lock().unwrap();
        if let Some(entry) = guard.entries.iter_mut().find(|e| e.filename == filename) {
            entry.error = error.to_string();
            entry.stage = stage;
            entry.timestamp = now_iso();
            if !hash.is_empty() {
                entry.hash = hash.to_string();
            }
            guard.persist()
        } else {
            guard.append(FailedEntry {
                filename: filename.to_string(),
                hash: hash.to_string(),
                error: error.to_string(),
                stage,
                timestamp: now_iso(),
            })
        }
    }

    pub fn counts(&self) -> JournalCounts {
        JournalCounts {
            conversion: self.conversion.lock().unwrap().0.entries.len(),
            markdown_upload: self.markdown_upload.lock().unwrap().0.entries.len(),
            embedding: self.embedding.lock().unwrap().0.entries.len(),
            vector_upload: self.vector_upload.lock().unwrap().0.entries.len(),
            skipped: self.skipped.lock().unwrap().0.entries.len(),
            failed: self.failed.lock().unwrap().entries.len(),
        }
    }

    /// Snapshot of the skipped journal.
    pub fn skipped_entries(&self) -> Vec<SkippedEntry> {
        self.skipped.lock().unwrap().0.entries.clone()
    }
}
