use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Serializer;

use crate::extract::DocumentRecord;

/// In-memory result set. Structurally equal records are stored once;
/// otherwise insertion order is kept.
#[derive(Debug, Default)]
pub struct Accumulator {
    records: Vec<DocumentRecord>,
    by_hash: HashMap<u64, Vec<usize>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an equal record is already present.
    pub fn add(&mut self, record: DocumentRecord) -> bool {
        let hash = fingerprint(&record);
        let slots = self.by_hash.entry(hash).or_default();
        if slots.iter().any(|&i| self.records[i] == record) {
            return false;
        }
        slots.push(self.records.len());
        self.records.push(record);
        true
    }

    pub fn all(&self) -> &[DocumentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The run's output: one JSON array, indented by four spaces.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut out = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut ser = Serializer::with_formatter(&mut out, formatter);
        self.records.serialize(&mut ser)?;
        // serde_json only ever writes valid UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

fn fingerprint(record: &DocumentRecord) -> u64 {
    let mut hasher = DefaultHasher::new();
    record.hash(&mut hasher);
    hasher.finish()
}
