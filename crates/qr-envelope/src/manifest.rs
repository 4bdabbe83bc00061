//! Out-of-band description of an encode run.
//!
//! The manifest is written once after encoding and is optional on decode:
//! it only adds expected fingerprints and sizes to cross-check against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::checksum::Fingerprint;
use crate::envelope::Envelope;
use crate::symbol::ErrorCorrection;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeMode {
    /// A set of files from an unpacked archive.
    #[default]
    Archive,
    /// One file carried as-is.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginInfo {
    pub filename: String,
    pub size: u64,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub created_at: DateTime<Utc>,
    pub chunk_size_budget: usize,
    pub error_correction: ErrorCorrection,
    pub mode: EncodeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub size: u64,
    pub fingerprint: Fingerprint,
    pub chunk_count: u32,
    /// Sequence indices carrying this file, in chunk order.
    pub sequence_indices: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub total_chunks: u64,
    pub files: BTreeMap<String, ManifestEntry>,
    pub run: RunMetadata,
}

impl Manifest {
    pub fn new(mode: EncodeMode, chunk_size_budget: usize, error_correction: ErrorCorrection) -> Self {
        Self {
            total_chunks: 0,
            files: BTreeMap::new(),
            run: RunMetadata {
                created_at: Utc::now(),
                chunk_size_budget,
                error_correction,
                mode,
                origin: None,
            },
        }
    }

    pub fn with_origin(mut self, origin: OriginInfo) -> Self {
        self.run.origin = Some(origin);
        self
    }

    /// Record one encoded file. `envelopes` are that file's chunks.
    pub fn record_file(
        &mut self,
        source: &str,
        size: u64,
        fingerprint: Fingerprint,
        envelopes: &[Envelope],
    ) {
        let mut sequence_indices: Vec<(u32, u64)> =
            envelopes.iter().map(|e| (e.chunk_index, e.sequence_index)).collect();
        sequence_indices.sort_unstable();

        let entry = ManifestEntry {
            size,
            fingerprint,
            chunk_count: envelopes.first().map(|e| e.chunk_count).unwrap_or(0),
            sequence_indices: sequence_indices.into_iter().map(|(_, seq)| seq).collect(),
        };
        if let Some(old) = self.files.insert(source.to_string(), entry) {
            self.total_chunks -= old.sequence_indices.len() as u64;
        }
        self.total_chunks += envelopes.len() as u64;
    }

    /// Drop a file that was recorded but will not be delivered.
    pub fn remove_file(&mut self, source: &str) -> Option<ManifestEntry> {
        let old = self.files.remove(source)?;
        self.total_chunks -= old.sequence_indices.len() as u64;
        if self.run.origin.as_ref().is_some_and(|o| o.filename == source) {
            self.run.origin = None;
        }
        Some(old)
    }

    pub fn entry(&self, source: &str) -> Option<&ManifestEntry> {
        self.files.get(source)
    }

    /// Fingerprint a reconstruction of `source` should match. In direct mode
    /// the origin record answers for its own filename.
    pub fn expected_fingerprint(&self, source: &str) -> Option<&Fingerprint> {
        self.files.get(source).map(|e| &e.fingerprint).or_else(|| {
            self.run
                .origin
                .as_ref()
                .filter(|o| o.filename == source)
                .map(|o| &o.fingerprint)
        })
    }

    pub fn expected_size(&self, source: &str) -> Option<u64> {
        self.files.get(source).map(|e| e.size).or_else(|| {
            self.run
                .origin
                .as_ref()
                .filter(|o| o.filename == source)
                .map(|o| o.size)
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }
}
