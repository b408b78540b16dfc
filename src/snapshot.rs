//! Durable pairing of the vector index with its metadata records.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SnapshotError, ValidationError};
use crate::index::{Hit, VectorIndex};
use crate::metadata::{MetadataRecord, MetadataStore};

/// Default on-disk location of the serialized index.
pub const DEFAULT_INDEX_PATH: &str = "model/virta.index";
/// Default on-disk location of the metadata array.
pub const DEFAULT_METADATA_PATH: &str = "model/metadata.json";

/// File locations of the two snapshot artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    /// Binary vector index.
    pub index: PathBuf,
    /// JSON metadata array.
    pub metadata: PathBuf,
}

impl Default for SnapshotPaths {
    fn default() -> Self {
        Self {
            index: PathBuf::from(DEFAULT_INDEX_PATH),
            metadata: PathBuf::from(DEFAULT_METADATA_PATH),
        }
    }
}

/// Vector index and metadata store that always hold the same number of entries.
///
/// The only mutation is [`Snapshot::append`], which validates the pair before
/// touching either side. Taking `&mut self` makes it the single serialized
/// insertion path; once built, the snapshot is shared read-only (`Arc<Snapshot>`)
/// and searched without locks.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    index: VectorIndex,
    store: MetadataStore,
}

impl Snapshot {
    /// Creates an empty snapshot for `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Result<Self, ValidationError> {
        Ok(Self {
            index: VectorIndex::new(dimension)?,
            store: MetadataStore::new(),
        })
    }

    /// Pairs an index with a store, failing if their lengths differ.
    pub fn from_parts(index: VectorIndex, store: MetadataStore) -> Result<Self, SnapshotError> {
        if index.size() != store.len() {
            return Err(SnapshotError::IndexConsistency {
                index_size: index.size(),
                metadata_len: store.len(),
            });
        }
        Ok(Self { index, store })
    }

    /// Adds one vector and its record at the next ordinal.
    pub fn append(
        &mut self,
        vector: Vec<f32>,
        record: MetadataRecord,
    ) -> Result<usize, ValidationError> {
        self.index.check(&vector)?;
        record.validate()?;
        let range = self.index.add(std::slice::from_ref(&vector))?;
        let ordinal = self.store.append(record)?;
        debug_assert_eq!(range.start, ordinal);
        Ok(ordinal)
    }

    /// Vector index.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Metadata store.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.index.size()
    }

    /// Returns `true` when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Embedding dimension.
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Nearest neighbours of `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, ValidationError> {
        self.index.search(query, k)
    }

    /// Record paired with `ordinal`.
    pub fn record(&self, ordinal: usize) -> Option<&MetadataRecord> {
        self.store.get(ordinal)
    }

    /// Writes both artifacts, creating parent directories as needed.
    ///
    /// Each file is written to a sibling temp file and renamed into place so a
    /// reader never sees a half-written artifact.
    pub fn save(&self, paths: &SnapshotPaths) -> Result<(), SnapshotError> {
        write_atomic(&paths.index, &self.index.to_bytes())?;
        write_atomic(&paths.metadata, &self.store.to_json()?)?;
        tracing::info!(
            "saved snapshot with {} vectors to {:?} and {:?}",
            self.len(),
            paths.index,
            paths.metadata
        );
        Ok(())
    }

    /// Loads both artifacts and re-verifies the pairing.
    ///
    /// `expected_dimension` guards against serving with a provider whose vectors
    /// the index was not built for.
    pub fn load(paths: &SnapshotPaths, expected_dimension: usize) -> Result<Self, SnapshotError> {
        let index_bytes = read(&paths.index)?;
        let index = VectorIndex::from_bytes(&index_bytes)?;
        if index.dimension() != expected_dimension {
            return Err(SnapshotError::Validation(
                ValidationError::DimensionMismatch {
                    expected: expected_dimension,
                    actual: index.dimension(),
                },
            ));
        }
        let metadata_bytes = read(&paths.metadata)?;
        let records: Vec<MetadataRecord> = serde_json::from_slice(&metadata_bytes)?;
        let store = MetadataStore::from_records(records)?;
        let snapshot = Self::from_parts(index, store)?;
        tracing::info!(
            "loaded snapshot with {} vectors (dimension {}) from {:?}",
            snapshot.len(),
            snapshot.dimension(),
            paths.index
        );
        Ok(snapshot)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, SnapshotError> {
    fs::read(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
