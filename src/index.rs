//! Exact inner-product vector index addressed by insertion ordinal.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crc32fast::Hasher as Crc32;
use serde::Serialize;

use crate::error::{SnapshotError, ValidationError};

/// Largest deviation from unit length accepted for stored and query vectors.
pub const NORM_TOLERANCE: f32 = 1e-3;

const MAGIC: &[u8; 8] = b"VIRTAIDX";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 8 + 1 + 1 + 2 + 4 + 8;

/// Similarity metric recorded in the index header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Plain dot product; cosine similarity when both sides are unit vectors.
    InnerProduct,
}

impl Metric {
    fn tag(self) -> u8 {
        match self {
            Self::InnerProduct => 0,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::InnerProduct),
            _ => None,
        }
    }
}

/// Search result: index ordinal plus similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Hit {
    /// Insertion ordinal of the matching vector.
    pub ordinal: usize,
    /// Inner product with the query, in `[-1, 1]` for unit vectors.
    pub score: f32,
}

/// Flat (brute-force) index over unit vectors.
///
/// Ordinals are assigned in insertion order and never reused; there is no
/// removal. Search is exact, so recall is always complete.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Creates an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Result<Self, ValidationError> {
        if dimension == 0 {
            return Err(ValidationError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            metric: Metric::InnerProduct,
            data: Vec::new(),
        })
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Similarity metric.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of stored vectors (the next ordinal to be assigned).
    pub fn size(&self) -> usize {
        self.data.len() / self.dimension
    }

    /// Returns `true` when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checks that `vector` can be stored or used as a query.
    pub fn check(&self, vector: &[f32]) -> Result<(), ValidationError> {
        check_unit(vector, self.dimension)
    }

    /// Appends vectors at the next ordinals.
    ///
    /// All vectors are validated before any is stored, so a rejected call leaves
    /// the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<OrdinalRange, ValidationError> {
        for vector in vectors {
            self.check(vector)?;
        }
        let start = self.size();
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(OrdinalRange {
            start,
            end: self.size(),
        })
    }

    /// Vector stored at `ordinal`.
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Returns up to `k` hits ordered by descending score; ties go to the lower ordinal.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, ValidationError> {
        self.check(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        // min-heap of the best k seen so far
        let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(k + 1);
        for (ordinal, vector) in self.data.chunks_exact(self.dimension).enumerate() {
            let candidate = Ranked(Hit {
                ordinal,
                score: dot(query, vector),
            });
            if heap.len() < k {
                heap.push(Reverse(candidate));
            } else if heap
                .peek()
                .is_some_and(|Reverse(worst)| candidate > *worst)
            {
                heap.pop();
                heap.push(Reverse(candidate));
            }
        }

        let mut hits: Vec<Hit> = heap.into_iter().map(|Reverse(ranked)| ranked.0).collect();
        hits.sort_by(|a, b| Ranked(*b).cmp(&Ranked(*a)));
        Ok(hits)
    }

    /// Encodes the index as
    /// `magic | version | metric | reserved | dimension | count | f32 LE payload | crc32`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4 + 4);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.push(self.metric.tag());
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&(self.size() as u64).to_le_bytes());
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        let mut hasher = Crc32::new();
        hasher.update(&out);
        out.extend_from_slice(&hasher.finalize().to_le_bytes());
        out
    }

    /// Decodes bytes produced by [`VectorIndex::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        if bytes.len() < HEADER_LEN + 4 {
            return Err(SnapshotError::Corrupt(format!(
                "{} bytes is shorter than the index header",
                bytes.len()
            )));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let mut hasher = Crc32::new();
        hasher.update(body);
        let expected = u32::from_le_bytes(le_array(trailer));
        let actual = hasher.finalize();
        if expected != actual {
            return Err(SnapshotError::Corrupt(format!(
                "checksum mismatch (stored {expected:#010x}, computed {actual:#010x})"
            )));
        }
        if &body[..8] != MAGIC {
            return Err(SnapshotError::Corrupt("bad magic".to_string()));
        }
        if body[8] != FORMAT_VERSION {
            return Err(SnapshotError::Corrupt(format!(
                "unsupported format version {}",
                body[8]
            )));
        }
        let metric = Metric::from_tag(body[9])
            .ok_or_else(|| SnapshotError::Corrupt(format!("unknown metric tag {}", body[9])))?;
        let dimension = u32::from_le_bytes(le_array(&body[12..16])) as usize;
        let count = u64::from_le_bytes(le_array(&body[16..24])) as usize;
        if dimension == 0 {
            return Err(SnapshotError::Validation(ValidationError::ZeroDimension));
        }
        let payload = &body[HEADER_LEN..];
        let expected_len = count
            .checked_mul(dimension)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| SnapshotError::Corrupt("vector count overflows".to_string()))?;
        if payload.len() != expected_len {
            return Err(SnapshotError::Corrupt(format!(
                "payload holds {} bytes, header promises {expected_len}",
                payload.len()
            )));
        }
        let data = payload
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes(le_array(raw)))
            .collect();
        Ok(Self {
            dimension,
            metric,
            data,
        })
    }
}

/// Half-open ordinal range assigned by [`VectorIndex::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrdinalRange {
    /// First assigned ordinal.
    pub start: usize,
    /// One past the last assigned ordinal.
    pub end: usize,
}

/// Scales `vector` to unit length in place.
pub fn normalize(vector: &mut [f32]) -> Result<(), ValidationError> {
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(ValidationError::NonFinite);
    }
    let norm = l2_norm(vector);
    if norm == 0.0 {
        return Err(ValidationError::ZeroVector);
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    Ok(())
}

/// Euclidean length of `vector`.
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

fn check_unit(vector: &[f32], dimension: usize) -> Result<(), ValidationError> {
    if vector.len() != dimension {
        return Err(ValidationError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(ValidationError::NonFinite);
    }
    let norm = l2_norm(vector);
    if (norm - 1.0).abs() > NORM_TOLERANCE {
        return Err(ValidationError::NotNormalized { norm });
    }
    Ok(())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn le_array<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[..N]);
    out
}

/// Orders hits by score, then prefers the lower ordinal.
#[derive(Debug, Clone, Copy)]
struct Ranked(Hit);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.ordinal.cmp(&self.0.ordinal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut v = values.to_vec();
        normalize(&mut v).unwrap();
        v
    }

    #[test]
    fn orthogonal_pair_scores() {
        let mut index = VectorIndex::new(2).unwrap();
        index.add(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(
            hits,
            vec![
                Hit {
                    ordinal: 0,
                    score: 1.0
                },
                Hit {
                    ordinal: 1,
                    score: 0.0
                }
            ]
        );
    }

    #[test]
    fn returns_best_k_in_descending_order() {
        let mut index = VectorIndex::new(3).unwrap();
        let vectors = vec![
            unit(&[0.0, 1.0, 0.0]),
            unit(&[1.0, 0.0, 0.0]),
            unit(&[0.5, 0.5, 0.0]),
            unit(&[-1.0, 0.0, 0.0]),
        ];
        index.add(&vectors).unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        let ordinals: Vec<usize> = hits.iter().map(|hit| hit.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn k_larger_than_index_and_empty_index() {
        let mut index = VectorIndex::new(2).unwrap();
        assert!(index.search(&[1.0, 0.0], 15).unwrap().is_empty());
        index.add(&[vec![0.0, 1.0]]).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 15).unwrap().len(), 1);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_prefer_lower_ordinal() {
        let mut index = VectorIndex::new(2).unwrap();
        index
            .add(&[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]])
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].ordinal, 1);
        assert_eq!(hits[1].ordinal, 2);
    }

    #[test]
    fn rejects_wrong_dimension_and_unnormalized_vectors() {
        let mut index = VectorIndex::new(2).unwrap();
        assert_eq!(
            index.add(&[vec![1.0, 0.0, 0.0]]),
            Err(ValidationError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
        assert!(matches!(
            index.add(&[vec![1.0, 0.0], vec![3.0, 4.0]]),
            Err(ValidationError::NotNormalized { .. })
        ));
        assert_eq!(index.size(), 0, "rejected batch must not be partially stored");
        assert!(index.search(&[f32::NAN, 0.0], 1).is_err());
    }

    #[test]
    fn add_assigns_consecutive_ordinals() {
        let mut index = VectorIndex::new(2).unwrap();
        let first = index.add(&[vec![1.0, 0.0]]).unwrap();
        let second = index.add(&[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        assert_eq!(first, OrdinalRange { start: 0, end: 1 });
        assert_eq!(second, OrdinalRange { start: 1, end: 3 });
        assert_eq!(index.vector(1), Some(&[0.0, 1.0][..]));
        assert_eq!(index.vector(3), None);
    }

    #[test]
    fn bytes_round_trip() {
        let mut index = VectorIndex::new(3).unwrap();
        index
            .add(&[unit(&[1.0, 2.0, 3.0]), unit(&[-3.0, 0.5, 1.0])])
            .unwrap();
        let restored = VectorIndex::from_bytes(&index.to_bytes()).unwrap();
        assert_eq!(restored, index);
        let query = unit(&[0.2, 0.4, 0.1]);
        assert_eq!(
            restored.search(&query, 5).unwrap(),
            index.search(&query, 5).unwrap()
        );
    }

    #[test]
    fn detects_corruption() {
        let mut index = VectorIndex::new(2).unwrap();
        index.add(&[vec![1.0, 0.0]]).unwrap();
        let mut bytes = index.to_bytes();
        bytes[HEADER_LEN] ^= 0xff;
        assert!(matches!(
            VectorIndex::from_bytes(&bytes),
            Err(SnapshotError::Corrupt(_))
        ));
        assert!(matches!(
            VectorIndex::from_bytes(&bytes[..10]),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn normalize_rejects_zero_vector() {
        let mut zero = vec![0.0, 0.0];
        assert_eq!(normalize(&mut zero), Err(ValidationError::ZeroVector));
        let mut v = vec![3.0, 4.0];
        normalize(&mut v).unwrap();
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }
}
