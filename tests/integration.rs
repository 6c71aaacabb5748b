//! End-to-end pipeline scenarios against in-memory service doubles
//!
//! The four external collaborators are replaced by in-memory fakes so the
//! full state machine, dedup logic and journaling run without a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use ingot::{
    filename_point_id, Chunker, Config, Converter, Embedder, Journal, JournalFiles, ObjectInfo,
    ObjectStore, Pipeline, PipelineError, Point, Stage, VectorStore,
};

// ---------------------------------------------------------------------------
// doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    fn insert(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }

    fn get_sync(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, PipelineError> {
        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<_> = objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix) && !k.ends_with('/'))
            .map(|(k, v)| ObjectInfo {
                key: k.clone(),
                size: v.len() as u64,
                etag: None,
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, PipelineError> {
        self.get_sync(key).ok_or(PipelineError::ObjectNotFound {
            key: key.to_string(),
        })
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), PipelineError> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}

/// Deterministic converter: wraps the document bytes into fixed markdown.
/// `transient_failures` models the client-internal retry budget: that many
/// transport errors are absorbed (and counted) before the call succeeds.
struct StubConverter {
    markdown: String,
    calls: AtomicUsize,
    transport_errors: AtomicUsize,
    transient_failures: AtomicUsize,
}

impl StubConverter {
    fn returning(markdown: &str) -> Self {
        Self {
            markdown: markdown.to_string(),
            calls: AtomicUsize::new(0),
            transport_errors: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
        }
    }

    fn fail_transiently(&self, times: usize) {
        self.transient_failures.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl Converter for StubConverter {
    async fn convert(
        &self,
        _bytes: Vec<u8>,
        _filename: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // the real client retries transport errors with backoff before the
        // error ever becomes terminal; absorb the budget here
        while self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            self.transport_errors.fetch_add(1, Ordering::SeqCst);
        }
        Ok(self.markdown.clone())
    }

    async fn health(&self) -> bool {
        true
    }
}

/// Embedder double: fixed-dimension vectors, optional rejection on a text
/// marker, call counting for the at-most-once property.
#[derive(Default)]
struct StubEmbedder {
    calls: AtomicUsize,
    reject_containing: Mutex<Option<String>>,
}

impl StubEmbedder {
    fn reject_inputs_containing(&self, marker: &str) {
        *self.reject_containing.lock().unwrap() = Some(marker.to_string());
    }

    fn clear_rejection(&self) {
        *self.reject_containing.lock().unwrap() = None;
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.reject_containing.lock().unwrap().as_deref() {
            if inputs.iter().any(|i| i.contains(marker)) {
                return Err(PipelineError::EmbedderRejected(format!(
                    "input rejected by model {}",
                    model
                )));
            }
        }
        let dim = if model.contains("mini") { 4 } else { 8 };
        Ok(inputs.iter().map(|_| vec![0.5f32; dim]).collect())
    }

    async fn health(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct MemoryVectorStore {
    collections: Mutex<HashMap<String, HashMap<String, Point>>>,
    upsert_calls: AtomicUsize,
}

impl MemoryVectorStore {
    fn points(&self, collection: &str) -> Vec<Point> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        collection: &str,
        points: &[Point],
        _batch_size: usize,
        _cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        let target = collections.entry(collection.to_string()).or_default();
        for point in points {
            target.insert(point.id.clone(), point.clone());
        }
        Ok(())
    }

    async fn exists_by_fingerprint(
        &self,
        collection: &str,
        fingerprint: &str,
    ) -> Result<bool, PipelineError> {
        let collections = self.collections.lock().unwrap();
        let Some(points) = collections.get(collection) else {
            return Ok(false);
        };
        Ok(points
            .values()
            .any(|p| p.payload["metadata"]["md5_hash"] == fingerprint))
    }

    async fn health(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// harness
// ---------------------------------------------------------------------------

const MARKDOWN: &str = "# Release Notes\n\nThe quick brown fox jumps over the lazy dog and \
keeps running through the meadow until it reaches the river bank.\n\n\
- first change\n- second change\n\n\
| component | version |\n| --- | --- |\n| core | 2.1 |\n| api | 3.0 |\n\n\
![architecture](images/arch.png)";

fn test_config(log_dir: PathBuf) -> Config {
    Config {
        r2_endpoint: "https://account.r2.example.com".to_string(),
        r2_access_key: "key".to_string(),
        r2_secret_key: "secret".to_string(),
        r2_bucket: "docs".to_string(),
        source_prefix: "source/".to_string(),
        markdown_prefix: "markdown/".to_string(),
        qdrant_host: "qdrant.local".to_string(),
        qdrant_port: 6333,
        qdrant_use_https: false,
        qdrant_api_key: None,
        qdrant_prefer_grpc: false,
        qdrant_grpc_port: None,
        filename_collection: "filenames".to_string(),
        content_collection: "content".to_string(),
        ollama_host: "ollama.local".to_string(),
        ollama_port: 11434,
        filename_model: "all-minilm".to_string(),
        content_model: "nomic-embed-text".to_string(),
        docling_base_url: "http://docling.local:5001".to_string(),
        docling_timeout_secs: 300,
        docling_poll_interval_secs: 2,
        chunk_size_tokens: 20,
        chunk_overlap_tokens: 0,
        batch_size: 100,
        force_reprocess: false,
        skip_extensions: Vec::new(),
        worker_count: 2,
        log_dir,
        journal_files: JournalFiles::default(),
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    converter: Arc<StubConverter>,
    embedder: Arc<StubEmbedder>,
    vectors: Arc<MemoryVectorStore>,
    config: Config,
}

impl Harness {
    fn new(log_dir: PathBuf) -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            converter: Arc::new(StubConverter::returning(MARKDOWN)),
            embedder: Arc::new(StubEmbedder::default()),
            vectors: Arc::new(MemoryVectorStore::default()),
            config: test_config(log_dir),
        }
    }

    /// A fresh pipeline over the shared doubles; the journal reloads from
    /// disk, exactly as a new process would.
    fn pipeline(&self) -> Arc<Pipeline> {
        let journal = Arc::new(
            Journal::load(&self.config.log_dir, &self.config.journal_files).unwrap(),
        );
        Arc::new(Pipeline::new(
            self.config.clone(),
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            Arc::clone(&self.converter) as Arc<dyn Converter>,
            Arc::clone(&self.embedder) as Arc<dyn Embedder>,
            Arc::clone(&self.vectors) as Arc<dyn VectorStore>,
            journal,
        ))
    }

    fn expected_chunks(&self) -> usize {
        Chunker::new(
            self.config.chunk_size_tokens,
            self.config.chunk_overlap_tokens,
        )
        .chunk(MARKDOWN)
        .len()
    }
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_happy_path_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    let bytes = b"%PDF-1.7 fake document body";
    harness.store.insert("source/a/b/doc.pdf", bytes);
    let fingerprint = ingot::hash::fast(bytes);

    let pipeline = harness.pipeline();
    let summary = pipeline.clone().run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.total_files, 1);
    assert_eq!(summary.new_files, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);

    // markdown artifact landed at the routed key
    let artifact = harness.store.get_sync("markdown/a/b/doc.md").unwrap();
    assert_eq!(artifact, MARKDOWN.as_bytes());

    // exactly one filename point with the documented payload
    let filename_points = harness.vectors.points("filenames");
    assert_eq!(filename_points.len(), 1);
    let point = &filename_points[0];
    assert_eq!(point.id, filename_point_id("doc.pdf"));
    assert_eq!(point.payload["pagecontent"], "doc.pdf");
    assert_eq!(point.payload["source"], "doc.pdf");
    assert_eq!(point.payload["metadata"]["hash"], fingerprint);

    // one content point per chunk, page numbers dense from 1
    let expected = harness.expected_chunks();
    assert!(expected > 1, "fixture should chunk into several pieces");
    let mut content_points = harness.vectors.points("content");
    assert_eq!(content_points.len(), expected);
    content_points.sort_by_key(|p| p.payload["metadata"]["page_number"].as_u64());
    for (i, point) in content_points.iter().enumerate() {
        assert_eq!(
            point.payload["metadata"]["page_number"].as_u64(),
            Some(i as u64 + 1)
        );
        assert_eq!(point.payload["metadata"]["filename"], "doc.pdf");
        assert_eq!(point.payload["metadata"]["md5_hash"], fingerprint);
    }
    let classes: Vec<&str> = content_points
        .iter()
        .filter_map(|p| p.payload["metadata"]["element_type"].as_str())
        .collect();
    assert!(classes.contains(&"Table"));
    assert!(classes.contains(&"Image"));
    assert!(classes.contains(&"List"));

    // journals grew by the expected amounts
    let counts = pipeline.journal().counts();
    assert_eq!(counts.conversion, 1);
    assert_eq!(counts.markdown_upload, 1);
    assert_eq!(counts.embedding, 2); // once per collection
    assert_eq!(counts.vector_upload, 2);
    assert_eq!(counts.skipped, 0);
    assert_eq!(counts.failed, 0);
}

#[tokio::test]
async fn test_replay_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    harness.store.insert("source/a/doc.pdf", b"doc bytes");

    let first = harness.pipeline();
    first.clone().run(CancellationToken::new()).await.unwrap();
    let embed_calls_after_first = harness.embedder.calls.load(Ordering::SeqCst);
    let content_count = harness.vectors.count("content");

    // fresh process: journal reloaded from disk
    let second = harness.pipeline();
    let summary = second.clone().run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.new_files, 0);
    assert_eq!(
        harness.embedder.calls.load(Ordering::SeqCst),
        embed_calls_after_first,
        "replay must not touch the embedder"
    );
    assert_eq!(harness.vectors.count("content"), content_count);
    assert_eq!(harness.vectors.count("filenames"), 1);

    // the skip is journaled against the log-file truth source
    let skipped = second.journal().skipped_entries();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].found_in, ingot::FoundIn::LogFile);
}

#[tokio::test]
async fn test_force_reprocess_overwrites_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    harness.store.insert("source/doc.pdf", b"doc bytes");

    let first = harness.pipeline();
    first.clone().run(CancellationToken::new()).await.unwrap();
    let content_count = harness.vectors.count("content");
    let embed_calls = harness.embedder.calls.load(Ordering::SeqCst);
    let upsert_calls = harness.vectors.upsert_calls.load(Ordering::SeqCst);

    let mut forced = Harness {
        store: Arc::clone(&harness.store),
        converter: Arc::clone(&harness.converter),
        embedder: Arc::clone(&harness.embedder),
        vectors: Arc::clone(&harness.vectors),
        config: harness.config.clone(),
    };
    forced.config.force_reprocess = true;

    let summary = forced.pipeline().run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 0);

    assert!(
        harness.embedder.calls.load(Ordering::SeqCst) > embed_calls,
        "force must re-embed"
    );
    assert!(
        harness.vectors.upsert_calls.load(Ordering::SeqCst) > upsert_calls,
        "force must re-upsert"
    );
    // deterministic ids overwrite in place
    assert_eq!(harness.vectors.count("content"), content_count);
    assert_eq!(harness.vectors.count("filenames"), 1);
}

#[tokio::test]
async fn test_transient_converter_failure_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    harness.store.insert("source/doc.pdf", b"doc bytes");
    harness.converter.fail_transiently(1);

    let pipeline = harness.pipeline();
    let summary = pipeline.clone().run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        harness.converter.transport_errors.load(Ordering::SeqCst),
        1,
        "one transient error absorbed by the client retry"
    );

    let counts = pipeline.journal().counts();
    assert_eq!(counts.conversion, 1);
    assert_eq!(counts.failed, 0);
}

#[tokio::test]
async fn test_partial_failure_isolates_documents() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    harness.store.insert("source/bad.pdf", b"first document");
    harness.store.insert("source/good.pdf", b"second document");
    // the filename embed for bad.pdf is the first embedder touch for it
    harness.embedder.reject_inputs_containing("bad.pdf");

    let pipeline = harness.pipeline();
    let summary = pipeline.clone().run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);

    let failed = pipeline.journal().failed_entries();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].filename, "source/bad.pdf");
    assert_eq!(failed[0].stage, Stage::Embedder);

    // the good document is fully present in both collections
    let filename_points = harness.vectors.points("filenames");
    assert_eq!(filename_points.len(), 1);
    assert_eq!(filename_points[0].payload["pagecontent"], "good.pdf");
    assert_eq!(harness.vectors.count("content"), harness.expected_chunks());
}

#[tokio::test]
async fn test_skip_extensions_filter_at_listing_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = Harness::new(dir.path().to_path_buf());
    harness.config.skip_extensions = vec![".md".to_string()];
    harness.store.insert("source/x/NOTE.MD", b"already markdown");

    let pipeline = harness.pipeline();
    let summary = pipeline.clone().run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.total_files, 0);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(harness.converter.calls.load(Ordering::SeqCst), 0);

    let counts = pipeline.journal().counts();
    assert_eq!(counts.conversion, 0);
    assert_eq!(counts.skipped, 0);
    assert_eq!(counts.failed, 0);
}

#[tokio::test]
async fn test_retry_pass_recovers_failed_documents() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    harness.store.insert("source/bad.pdf", b"flaky document");
    harness.embedder.reject_inputs_containing("bad.pdf");

    let pipeline = harness.pipeline();
    let summary = pipeline.clone().run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(pipeline.journal().failed_entries().len(), 1);

    // the embedder comes back; the retry pass re-drives the document
    harness.embedder.clear_rejection();
    let retrier = harness.pipeline();
    let report = retrier
        .retry_failed(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.recovered, 1);
    assert_eq!(report.still_failing, 0);
    assert!(retrier.journal().failed_entries().is_empty());
    assert_eq!(harness.vectors.count("filenames"), 1);
    assert_eq!(harness.vectors.count("content"), harness.expected_chunks());
}

#[tokio::test]
async fn test_retry_reports_missing_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());

    // journal a failure for a document that no longer exists anywhere
    {
        let pipeline = harness.pipeline();
        pipeline
            .journal()
            .add_failed_entry("source/gone.pdf", "", "converter blew up", Stage::Converter)
            .unwrap();
    }

    let pipeline = harness.pipeline();
    let report = pipeline
        .retry_failed(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(report.recovered, 0);

    let failed = pipeline.journal().failed_entries();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.contains("not found"));
}

#[tokio::test]
async fn test_cancelled_run_returns_partial_summary() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    harness.store.insert("source/doc.pdf", b"doc bytes");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let pipeline = harness.pipeline();
    let summary = pipeline.clone().run(cancel).await.unwrap();

    // nothing was handed to the workers after cancellation
    assert_eq!(summary.processed, 0);
    assert_eq!(harness.converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sequential_runs_embed_each_fingerprint_once() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    // two keys, identical bytes: one fingerprint
    harness.store.insert("source/a.pdf", b"same bytes");
    harness.store.insert("source/b.pdf", b"same bytes");

    // serialize the race on the shared fingerprint
    let mut config = harness.config.clone();
    config.worker_count = 1;
    let serial = Harness {
        store: Arc::clone(&harness.store),
        converter: Arc::clone(&harness.converter),
        embedder: Arc::clone(&harness.embedder),
        vectors: Arc::clone(&harness.vectors),
        config,
    };

    let pipeline = serial.pipeline();
    let summary = pipeline.clone().run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.total_files, 2);

    // the second document deduped against the first one's content embedding
    let content_embed_calls = harness.embedder.calls.load(Ordering::SeqCst);
    let second = serial.pipeline();
    second.clone().run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        harness.embedder.calls.load(Ordering::SeqCst),
        content_embed_calls,
        "a second run over the same input must not embed again"
    );
}

#[tokio::test]
async fn test_dedup_inside_embedder_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path().to_path_buf());
    harness.store.insert("source/doc.pdf", b"doc bytes");

    // pre-seed the vector store with a content point carrying the
    // fingerprint, with no journal entry: simulates an earlier run whose
    // logs were lost
    let fingerprint = ingot::hash::fast(b"doc bytes");
    let pre_seeded = Point {
        id: "11111111-1111-1111-1111-111111111111".to_string(),
        vector: vec![0.5; 8],
        payload: serde_json::json!({
            "pagecontent": "old chunk",
            "metadata": { "filename": "doc.pdf", "page_number": 1,
                          "element_type": "Text", "md5_hash": fingerprint }
        }),
    };
    harness
        .vectors
        .upsert("content", &[pre_seeded], 100, &CancellationToken::new())
        .await
        .unwrap();

    let pipeline = harness.pipeline();
    let summary = pipeline.clone().run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 0);
    let skipped = pipeline.journal().skipped_entries();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].found_in, ingot::FoundIn::VectorStore);
    assert_eq!(skipped[0].skip_reason, ingot::SkipReason::AlreadyInQdrant);
}
