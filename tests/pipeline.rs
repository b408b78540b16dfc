//! End-to-end: corpus on disk -> snapshot on disk -> retrieval.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{hashing_client, word_chunker, DIM};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use virta::{
    IngestOptions, Ingestor, Retrieval, RetrievalConfig, RetrievalQuery, Retriever, Snapshot,
    SnapshotError, SnapshotPaths, SourceLoader, SourceResolver,
};

const DOCKER: &str = "docker builds container images from a dockerfile";
const PANDAS: &str = "pandas dataframes support groupby and merge operations";

fn write_corpus(root: &Path) {
    fs::create_dir_all(root.join("course_content")).unwrap();
    fs::create_dir_all(root.join("misc")).unwrap();
    fs::write(root.join("course_content/docker.md"), format!("# Docker\n\n{DOCKER}\n")).unwrap();
    fs::write(
        root.join("misc/pandas.html"),
        format!("<html><body><p>{PANDAS}</p><script>var x = 1;</script></body></html>"),
    )
    .unwrap();
    fs::write(
        root.join("misc/long.txt"),
        "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi",
    )
    .unwrap();
    fs::write(root.join("misc/corrupt.txt"), [0xc3u8, 0x28, 0xa0, 0xa1]).unwrap();
    fs::write(root.join("misc/diagram.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
}

fn build(root: &Path, batch_size: usize, workers: usize) -> (Snapshot, virta::IngestReport) {
    let ingestor = Ingestor::new(
        word_chunker(8, 2),
        hashing_client(10_000),
        SourceLoader::new(SourceResolver::default()),
        IngestOptions {
            batch_size,
            workers,
        },
    );
    let mut snapshot = Snapshot::new(DIM).unwrap();
    let report = ingestor.ingest_dir(root, &mut snapshot).unwrap();
    (snapshot, report)
}

fn retriever(snapshot: Snapshot) -> Retriever {
    Retriever::new(
        Arc::new(snapshot),
        hashing_client(10_000),
        RetrievalConfig {
            dimension: DIM,
            ..RetrievalConfig::default()
        },
    )
    .unwrap()
}

#[test]
fn ingests_corpus_and_skips_unreadable_files() {
    let dir = tempdir().unwrap();
    write_corpus(dir.path());
    let (snapshot, report) = build(dir.path(), 16, 1);

    assert_eq!(report.files_loaded, 3);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.chunks_failed, 0);
    assert_eq!(report.chunks_indexed, snapshot.len());
    assert_eq!(snapshot.index().size(), snapshot.store().len());

    let records = snapshot.store().records();
    assert_eq!(records[0].source, "https://tds.s-anand.net/#/docker");
    // heading plus seven words fill the first 8-token window exactly
    assert_eq!(records[0].text, format!("Docker {DOCKER}"));
    assert_eq!(records[1].text, "a dockerfile");
    assert_eq!(records[1].chunk_id, 1);

    // 16 words with an 8-token window advancing by 6: chunks 0, 1 and 2.
    let long_ids: Vec<usize> = records
        .iter()
        .filter(|r| r.source.ends_with("long.txt"))
        .map(|r| r.chunk_id)
        .collect();
    assert_eq!(long_ids, vec![0, 1, 2]);
}

#[test]
fn snapshot_round_trip_preserves_search() {
    let dir = tempdir().unwrap();
    let corpus = dir.path().join("data");
    write_corpus(&corpus);
    let (snapshot, _) = build(&corpus, 2, 3);

    let paths = SnapshotPaths {
        index: dir.path().join("model/virta.index"),
        metadata: dir.path().join("model/metadata.json"),
    };
    snapshot.save(&paths).unwrap();
    let loaded = Snapshot::load(&paths, DIM).unwrap();

    let mut query = common::HashingProvider::vector(PANDAS);
    virta::index::normalize(&mut query).unwrap();
    assert_eq!(
        snapshot.search(&query, 5).unwrap(),
        loaded.search(&query, 5).unwrap()
    );
    assert_eq!(loaded, snapshot);
}

#[test]
fn batch_size_and_workers_do_not_change_the_snapshot() {
    let dir = tempdir().unwrap();
    write_corpus(dir.path());
    let (serial, _) = build(dir.path(), 1, 1);
    let (parallel, _) = build(dir.path(), 3, 4);
    assert_eq!(serial, parallel);
}

#[test]
fn retrieves_the_matching_document_first() {
    let dir = tempdir().unwrap();
    write_corpus(dir.path());
    let (snapshot, _) = build(dir.path(), 16, 2);
    let retriever = retriever(snapshot);

    let retrieval = retriever.retrieve(&RetrievalQuery::new(PANDAS)).unwrap();
    let excerpts = retrieval.excerpts();
    assert!(!excerpts.is_empty());
    assert!(excerpts[0].source.ends_with("pandas.html"));
    assert!(excerpts[0].score > 0.99);
    assert!(excerpts.iter().all(|e| e.score >= 0.35));
    assert!(excerpts.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn empty_snapshot_yields_no_relevant_context() {
    let retriever = retriever(Snapshot::new(DIM).unwrap());
    assert_eq!(
        retriever.retrieve(&RetrievalQuery::new("anything at all")).unwrap(),
        Retrieval::NoRelevantContext
    );
}

#[test]
fn mismatched_metadata_is_rejected_at_load() {
    let dir = tempdir().unwrap();
    write_corpus(&dir.path().join("data"));
    let (snapshot, _) = build(&dir.path().join("data"), 16, 1);
    let paths = SnapshotPaths {
        index: dir.path().join("virta.index"),
        metadata: dir.path().join("metadata.json"),
    };
    snapshot.save(&paths).unwrap();
    fs::write(&paths.metadata, "[]").unwrap();
    assert!(matches!(
        Snapshot::load(&paths, DIM),
        Err(SnapshotError::IndexConsistency { metadata_len: 0, .. })
    ));
}
