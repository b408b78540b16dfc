//! Ordinal-addressed chunk records kept alongside the vector index.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Provenance and text for one indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Chunk body as submitted to the embedding model.
    pub text: String,
    /// Canonical URL or path of the owning document.
    pub source: String,
    /// Zero-based position of the chunk within its document.
    pub chunk_id: usize,
}

impl MetadataRecord {
    /// Builds a record, rejecting empty text or provenance.
    pub fn new(
        text: impl Into<String>,
        source: impl Into<String>,
        chunk_id: usize,
    ) -> Result<Self, ValidationError> {
        let record = Self {
            text: text.into(),
            source: source.into(),
            chunk_id,
        };
        record.validate()?;
        Ok(record)
    }

    /// Checks the required fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::MissingField("text"));
        }
        if self.source.trim().is_empty() {
            return Err(ValidationError::MissingField("source"));
        }
        Ok(())
    }
}

/// Append-only record list; record `i` describes index ordinal `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStore {
    records: Vec<MetadataRecord>,
}

impl MetadataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from records loaded off disk, validating each one.
    pub fn from_records(records: Vec<MetadataRecord>) -> Result<Self, ValidationError> {
        for record in &records {
            record.validate()?;
        }
        Ok(Self { records })
    }

    /// Appends a record and returns its ordinal.
    pub fn append(&mut self, record: MetadataRecord) -> Result<usize, ValidationError> {
        record.validate()?;
        self.records.push(record);
        Ok(self.records.len() - 1)
    }

    /// Record stored at `ordinal`.
    pub fn get(&self, ordinal: usize) -> Option<&MetadataRecord> {
        self.records.get(ordinal)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in ordinal order.
    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    /// Serializes the store as a JSON array whose position `i` is ordinal `i`.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn append_assigns_ordinals() {
        let mut store = MetadataStore::new();
        let a = store
            .append(MetadataRecord::new("first", "https://example.com/a", 0).unwrap())
            .unwrap();
        let b = store
            .append(MetadataRecord::new("second", "https://example.com/a", 1).unwrap())
            .unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(store.get(1).map(|r| r.text.as_str()), Some("second"));
        assert!(store.get(2).is_none());
    }

    #[test]
    fn rejects_missing_fields() {
        assert_eq!(
            MetadataRecord::new("text", "  ", 0),
            Err(ValidationError::MissingField("source"))
        );
        assert_eq!(
            MetadataRecord::new("", "a.md", 0),
            Err(ValidationError::MissingField("text"))
        );
    }

    #[test]
    fn json_layout_matches_record_fields() {
        let mut store = MetadataStore::new();
        store
            .append(MetadataRecord::new("body", "data/notes.txt", 3).unwrap())
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&store.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{ "text": "body", "source": "data/notes.txt", "chunk_id": 3 }])
        );
    }

    #[test]
    fn deserializing_requires_every_field() {
        let missing: Result<Vec<MetadataRecord>, _> =
            serde_json::from_str(r#"[{"text": "t", "chunk_id": 0}]"#);
        assert!(missing.is_err());
    }
}
