//! Offline pipeline: load documents, chunk, embed in parallel batches and append
//! to a [`Snapshot`] in deterministic order.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::Serialize;

use crate::chunker::Chunker;
use crate::embedder::{BatchOutcome, EmbeddingClient};
use crate::error::{IngestError, ValidationError};
use crate::loader::{Document, SourceLoader};
use crate::metadata::MetadataRecord;
use crate::snapshot::Snapshot;

/// Chunks sent to the provider per request.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Batching and parallelism for an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Chunks per embedding request; bounds request count, not correctness.
    pub batch_size: usize,
    /// Embedding worker threads.
    pub workers: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
        }
    }
}

/// Counters describing a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents loaded and chunked.
    pub files_loaded: usize,
    /// Files that could not be read or decoded.
    pub files_skipped: usize,
    /// Chunks appended to the snapshot.
    pub chunks_indexed: usize,
    /// Chunks whose embedding failed and were left out.
    pub chunks_failed: usize,
}

/// Drives documents through chunking and embedding into a snapshot.
pub struct Ingestor {
    chunker: Chunker,
    embedder: EmbeddingClient,
    loader: SourceLoader,
    options: IngestOptions,
}

impl Ingestor {
    /// Assembles a pipeline from its stages.
    pub fn new(
        chunker: Chunker,
        embedder: EmbeddingClient,
        loader: SourceLoader,
        options: IngestOptions,
    ) -> Self {
        Self {
            chunker,
            embedder,
            loader,
            options,
        }
    }

    /// Ingests every supported file under `root` in sorted order.
    ///
    /// Unreadable files are logged and counted as skipped; the run continues.
    pub fn ingest_dir(
        &self,
        root: &Path,
        snapshot: &mut Snapshot,
    ) -> Result<IngestReport, IngestError> {
        let files = self.loader.discover(root);
        tracing::info!("found {} candidate files under {:?}", files.len(), root);
        let mut skipped = 0usize;
        let documents = files.iter().filter_map(|path| match self.loader.load(path) {
            Ok(document) => {
                tracing::debug!(
                    "loaded {:?} ({} chars) as {}",
                    path,
                    document.text.len(),
                    document.source_id
                );
                Some(document)
            }
            Err(err) => {
                tracing::warn!("skipping {:?}: {}", path, err);
                skipped += 1;
                None
            }
        });
        let mut report = IngestReport::default();
        self.run(documents, snapshot, &mut report)?;
        report.files_skipped = skipped;
        Ok(report)
    }

    /// Ingests already-loaded documents in the order given.
    pub fn ingest_documents<I>(
        &self,
        documents: I,
        snapshot: &mut Snapshot,
    ) -> Result<IngestReport, IngestError>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut report = IngestReport::default();
        self.run(documents.into_iter(), snapshot, &mut report)?;
        Ok(report)
    }

    fn run<I>(
        &self,
        documents: I,
        snapshot: &mut Snapshot,
        report: &mut IngestReport,
    ) -> Result<(), IngestError>
    where
        I: Iterator<Item = Document>,
    {
        if snapshot.dimension() != self.embedder.dimension() {
            return Err(ValidationError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: self.embedder.dimension(),
            }
            .into());
        }
        let batch_size = self.options.batch_size.max(1);
        let workers = self.options.workers.max(1);
        tracing::info!(
            "launching ingestion with batch size {} across {} worker(s)...",
            batch_size,
            workers
        );

        let (task_tx, task_rx) = bounded::<EmbedTask>(workers * 2);
        // Unbounded so a worker never blocks while the coordinator waits on the task queue.
        let (result_tx, result_rx) = unbounded::<EmbeddedBatch>();
        for worker_id in 0..workers {
            let embedder = self.embedder.clone();
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            thread::spawn(move || worker_loop(worker_id, rx, tx, embedder));
        }
        drop(task_rx);
        drop(result_tx);

        let mut coordinator = Coordinator {
            snapshot,
            report,
            pending_results: BTreeMap::new(),
            next_result_id: 0,
            inflight: 0,
        };
        let mut pending: Vec<PendingChunk> = Vec::with_capacity(batch_size);
        let mut next_batch_id = 0usize;

        for document in documents {
            coordinator.report.files_loaded += 1;
            let chunks = self.chunker.chunk(&document.text);
            tracing::debug!("{} -> {} chunk(s)", document.source_id, chunks.len());
            for (chunk_id, text) in chunks.into_iter().enumerate() {
                if text.trim().is_empty() {
                    continue;
                }
                pending.push(PendingChunk {
                    text,
                    source: document.source_id.clone(),
                    chunk_id,
                });
                if pending.len() >= batch_size {
                    dispatch(&mut pending, &mut next_batch_id, &task_tx)?;
                    coordinator.inflight += 1;
                    coordinator.drain_ready(&result_rx)?;
                }
            }
        }
        if !pending.is_empty() {
            dispatch(&mut pending, &mut next_batch_id, &task_tx)?;
            coordinator.inflight += 1;
        }
        drop(task_tx);

        while coordinator.inflight > 0 {
            match result_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(batch) => coordinator.accept(batch)?,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::info!(
                        "still waiting on {} embedding batch(es); oldest pending batch id {}...",
                        coordinator.inflight,
                        coordinator.next_result_id
                    );
                }
                Err(RecvTimeoutError::Disconnected) => return Err(IngestError::WorkersGone),
            }
        }

        let report = *coordinator.report;
        tracing::info!(
            "ingestion complete: {} chunks indexed from {} files ({} chunks failed).",
            report.chunks_indexed,
            report.files_loaded,
            report.chunks_failed
        );
        if report.chunks_indexed == 0 {
            tracing::warn!("no chunks were indexed; check the data directory and provider");
        }
        Ok(())
    }
}

struct PendingChunk {
    text: String,
    source: String,
    chunk_id: usize,
}

struct EmbedTask {
    id: usize,
    chunks: Vec<PendingChunk>,
}

struct EmbeddedBatch {
    id: usize,
    chunks: Vec<PendingChunk>,
    outcome: BatchOutcome,
}

/// Owns the only mutable path into the snapshot; batches are applied in id order.
struct Coordinator<'a> {
    snapshot: &'a mut Snapshot,
    report: &'a mut IngestReport,
    pending_results: BTreeMap<usize, EmbeddedBatch>,
    next_result_id: usize,
    inflight: usize,
}

impl Coordinator<'_> {
    fn drain_ready(&mut self, results: &Receiver<EmbeddedBatch>) -> Result<(), IngestError> {
        loop {
            match results.try_recv() {
                Ok(batch) => self.accept(batch)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(IngestError::WorkersGone),
            }
        }
    }

    fn accept(&mut self, batch: EmbeddedBatch) -> Result<(), IngestError> {
        self.inflight = self.inflight.saturating_sub(1);
        self.pending_results.insert(batch.id, batch);
        while let Some(batch) = self.pending_results.remove(&self.next_result_id) {
            self.apply(batch)?;
            self.next_result_id += 1;
        }
        Ok(())
    }

    fn apply(&mut self, batch: EmbeddedBatch) -> Result<(), IngestError> {
        for (chunk, result) in batch.chunks.into_iter().zip(batch.outcome) {
            match result {
                Ok(vector) => {
                    let record = MetadataRecord::new(chunk.text, chunk.source, chunk.chunk_id)?;
                    self.snapshot.append(vector, record)?;
                    self.report.chunks_indexed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        "skipping chunk {} of {}: {}",
                        chunk.chunk_id,
                        chunk.source,
                        err
                    );
                    self.report.chunks_failed += 1;
                }
            }
        }
        debug_assert_eq!(self.snapshot.index().size(), self.snapshot.store().len());
        tracing::info!(
            "embedded {} chunks ({} files processed, {} failed)...",
            self.report.chunks_indexed,
            self.report.files_loaded,
            self.report.chunks_failed
        );
        Ok(())
    }
}

fn dispatch(
    pending: &mut Vec<PendingChunk>,
    next_batch_id: &mut usize,
    sender: &Sender<EmbedTask>,
) -> Result<(), IngestError> {
    let chunks = std::mem::take(pending);
    let task = EmbedTask {
        id: *next_batch_id,
        chunks,
    };
    tracing::debug!("queued embedding batch {} of {} chunks", task.id, task.chunks.len());
    *next_batch_id += 1;
    sender.send(task).map_err(|_| IngestError::WorkersGone)
}

fn worker_loop(
    worker_id: usize,
    receiver: Receiver<EmbedTask>,
    sender: Sender<EmbeddedBatch>,
    embedder: EmbeddingClient,
) {
    for EmbedTask { id, chunks } in receiver.iter() {
        tracing::debug!(
            "worker {} embedding batch {} ({} chunks)...",
            worker_id,
            id,
            chunks.len()
        );
        let inputs: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let outcome = embedder.embed_batch(&inputs);
        if sender.send(EmbeddedBatch { id, chunks, outcome }).is_err() {
            break;
        }
    }
}
