//! Ingestion pipeline driver
//!
//! A producer lists the source prefix and feeds a bounded queue; a fixed
//! pool of workers drains it, each running one document through the
//! per-document state machine:
//!
//! get -> hash -> dedup check -> convert -> upload markdown -> chunk ->
//! embed filename -> upsert filename point -> embed chunks -> upsert
//! content points -> journal
//!
//! A failure at any stage journals the document as failed and moves on;
//! other documents are unaffected. The journals (and, behind them, the
//! vector store) make re-runs no-ops for already-processed fingerprints.

pub mod retry;

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunker;
use crate::config::Config;
use crate::convert::Converter;
use crate::db::VectorStore;
use crate::embed::{Embedder, EmbeddingService};
use crate::error::{PipelineError, Result as StageResult};
use crate::hash;
use crate::journal::Journal;
use crate::router;
use crate::store::ObjectStore;
use crate::types::{
    content_point_id, filename_point_id, Chunk, ContentPayload, DocOutcome, FilenamePayload,
    FoundIn, ObjectInfo, Point, RunSummary, SkipReason,
};

/// Shared outcome counters across workers
#[derive(Default)]
struct Counters {
    new_files: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

pub struct Pipeline {
    config: Config,
    store: Arc<dyn ObjectStore>,
    converter: Arc<dyn Converter>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    embeddings: EmbeddingService,
    journal: Arc<Journal>,
    chunker: Chunker,
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: Arc<dyn ObjectStore>,
        converter: Arc<dyn Converter>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        journal: Arc<Journal>,
    ) -> Self {
        let embeddings = EmbeddingService::new(
            Arc::clone(&embedder),
            Arc::clone(&vector_store),
            Arc::clone(&journal),
            &config,
        );
        let chunker = Chunker::new(config.chunk_size_tokens, config.chunk_overlap_tokens);
        Self {
            config,
            store,
            converter,
            embedder,
            vector_store,
            embeddings,
            journal,
            chunker,
        }
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Probe every external collaborator. Returns (name, healthy) pairs.
    pub async fn health_report(&self) -> Vec<(&'static str, bool)> {
        let (store, converter, embedder, vectors) = tokio::join!(
            self.store.health(),
            self.converter.health(),
            self.embedder.health(),
            self.vector_store.health(),
        );
        vec![
            ("object store", store),
            ("converter", converter),
            ("embedder", embedder),
            ("vector store", vectors),
        ]
    }

    /// Abort early when a collaborator is down, instead of journaling every
    /// document as failed.
    pub async fn preflight(&self) -> anyhow::Result<()> {
        for (name, healthy) in self.health_report().await {
            if !healthy {
                anyhow::bail!("{} is not reachable; aborting run", name);
            }
        }
        Ok(())
    }

    /// Run the full ingestion pass over the configured source prefix.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<RunSummary> {
        let started = Instant::now();

        let listed = self.store.list(&self.config.source_prefix).await?;
        let eligible: Vec<ObjectInfo> = listed
            .into_iter()
            .filter(|obj| !self.config.is_skipped_extension(&obj.key))
            .collect();
        let total_files = eligible.len() as u64;

        let progress = ProgressBar::new(total_files);
        progress.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let counters = Arc::new(Counters::default());
        let worker_count = self.config.worker_count.max(1);
        let (tx, rx) = mpsc::channel::<ObjectInfo>(worker_count * 2);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..worker_count {
            let pipeline = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&counters);
            let cancel = cancel.clone();
            let progress = progress.clone();
            workers.spawn(async move {
                loop {
                    let next = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(obj) = next else { break };

                    let outcome = pipeline.process_document(&obj, &cancel, &counters).await;
                    match outcome {
                        DocOutcome::Done => counters.processed.fetch_add(1, Ordering::Relaxed),
                        DocOutcome::Skipped => counters.skipped.fetch_add(1, Ordering::Relaxed),
                        DocOutcome::Failed => counters.failed.fetch_add(1, Ordering::Relaxed),
                    };
                    progress.inc(1);
                    progress.set_message(obj.filename().to_string());
                }
            });
        }

        // producer: feed the bounded queue until done or cancelled
        for obj in eligible {
            if cancel.is_cancelled() {
                break;
            }
            if tx.send(obj).await.is_err() {
                break;
            }
        }
        drop(tx);

        while workers.join_next().await.is_some() {}
        progress.finish_and_clear();

        let duration = started.elapsed().as_secs_f64();
        let processed = counters.processed.load(Ordering::Relaxed);
        Ok(RunSummary {
            total_files,
            new_files: counters.new_files.load(Ordering::Relaxed),
            processed,
            failed: counters.failed.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            duration_seconds: duration,
            files_per_second: if duration > 0.0 {
                total_files as f64 / duration
            } else {
                0.0
            },
        })
    }

    /// Run one document to a terminal state, journaling the outcome.
    async fn process_document(
        &self,
        obj: &ObjectInfo,
        cancel: &CancellationToken,
        counters: &Counters,
    ) -> DocOutcome {
        match self.drive_document(obj, cancel, counters).await {
            Ok(outcome) => outcome,
            Err((strong_hash, err)) => {
                if let Err(journal_err) = self.journal.add_failed_entry(
                    &obj.key,
                    &strong_hash,
                    &err.to_string(),
                    err.stage(),
                ) {
                    eprintln!("cannot journal failure for '{}': {}", obj.key, journal_err);
                }
                DocOutcome::Failed
            }
        }
    }

    /// The state machine proper. Errors carry the strong digest computed so
    /// far (empty before hashing) for the failed journal entry.
    async fn drive_document(
        &self,
        obj: &ObjectInfo,
        cancel: &CancellationToken,
        counters: &Counters,
    ) -> Result<DocOutcome, (String, PipelineError)> {
        if cancel.is_cancelled() {
            return Err((String::new(), PipelineError::Cancelled));
        }

        let bytes = self
            .store
            .get(&obj.key)
            .await
            .map_err(|e| (String::new(), e))?;
        let strong = hash::strong(&bytes);
        let fingerprint = hash::fast(&bytes);

        // dedup pre-flight: the vector-upload journal is the source of truth
        if !self.config.force_reprocess && self.journal.is_uploaded(&fingerprint) {
            self.journal
                .add_skipped_entry(
                    &obj.key,
                    &fingerprint,
                    SkipReason::ForceReprocessDisabled,
                    FoundIn::LogFile,
                    &self.config.content_collection,
                )
                .map_err(|e| (strong.clone(), PipelineError::Internal(e.to_string())))?;
            return Ok(DocOutcome::Skipped);
        }
        counters.new_files.fetch_add(1, Ordering::Relaxed);

        self.execute(
            &obj.key,
            bytes,
            &strong,
            &fingerprint,
            self.config.force_reprocess,
            cancel,
        )
        .await
        .map_err(|e| (strong, e))
    }

    /// Convert onward: everything after get+hash+pre-flight. `force`
    /// bypasses the dedup checks inside the embedding service.
    pub(crate) async fn execute(
        &self,
        key: &str,
        bytes: Vec<u8>,
        strong: &str,
        fingerprint: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> StageResult<DocOutcome> {
        let filename = key.rsplit('/').next().unwrap_or(key).to_string();

        let markdown = self.converter.convert(bytes, &filename, cancel).await?;
        self.journal
            .add_conversion_entry(key, strong)
            .map_err(|e| PipelineError::Internal(e.to_string()))?;

        let md_key = router::route(
            key,
            &self.config.source_prefix,
            &self.config.markdown_prefix,
        )?;
        self.store
            .put(&md_key, markdown.clone().into_bytes(), Some("text/markdown"))
            .await?;
        self.journal
            .add_markdown_upload_entry(key, strong)
            .map_err(|e| PipelineError::Internal(e.to_string()))?;

        self.finish_from_markdown(key, &filename, &markdown, fingerprint, force, cancel)
            .await
    }

    /// Chunk onward: shared by the main pass and the retry pass (which may
    /// only have the markdown artifact left).
    pub(crate) async fn finish_from_markdown(
        &self,
        key: &str,
        filename: &str,
        markdown: &str,
        fingerprint: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> StageResult<DocOutcome> {
        let chunks = self.chunker.chunk(markdown);

        // filename record first: a reader that can discover the file may not
        // yet see its content, never the reverse
        let filename_vector = self
            .embeddings
            .embed_filename(filename, fingerprint, &self.config.filename_collection)
            .await?;
        let filename_point = Point {
            id: filename_point_id(filename),
            vector: filename_vector,
            payload: serde_json::to_value(FilenamePayload::new(filename, fingerprint))
                .map_err(|e| PipelineError::Internal(e.to_string()))?,
        };
        self.upsert_and_journal(
            key,
            fingerprint,
            &self.config.filename_collection,
            vec![filename_point],
            cancel,
        )
        .await?;

        let Some(vectors) = self
            .embeddings
            .embed_batch_with_dedup(
                key,
                fingerprint,
                &chunks,
                &self.config.content_collection,
                force,
            )
            .await?
        else {
            return Ok(DocOutcome::Skipped);
        };

        let content_points = build_content_points(&chunks, vectors, filename, fingerprint)?;
        self.upsert_and_journal(
            key,
            fingerprint,
            &self.config.content_collection,
            content_points,
            cancel,
        )
        .await?;

        Ok(DocOutcome::Done)
    }

    async fn upsert_and_journal(
        &self,
        key: &str,
        fingerprint: &str,
        collection: &str,
        points: Vec<Point>,
        cancel: &CancellationToken,
    ) -> StageResult<()> {
        let started = Instant::now();
        self.vector_store
            .upsert(collection, &points, self.config.batch_size, cancel)
            .await?;
        let point_ids: Vec<String> = points.iter().map(|p| p.id.clone()).collect();
        self.journal
            .add_vector_upload_entry(
                key,
                fingerprint,
                collection,
                points.len() as u32,
                point_ids,
                self.config.batch_size as u32,
                started.elapsed().as_secs_f64(),
            )
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        Ok(())
    }
}

fn build_content_points(
    chunks: &[Chunk],
    vectors: Vec<Vec<f32>>,
    filename: &str,
    fingerprint: &str,
) -> StageResult<Vec<Point>> {
    if vectors.len() != chunks.len() {
        return Err(PipelineError::Internal(format!(
            "vector count {} does not match chunk count {}",
            vectors.len(),
            chunks.len()
        )));
    }
    chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| {
            Ok(Point {
                id: content_point_id(filename, chunk.sequence),
                vector,
                payload: serde_json::to_value(ContentPayload::new(chunk, filename, fingerprint))
                    .map_err(|e| PipelineError::Internal(e.to_string()))?,
            })
        })
        .collect()
}
