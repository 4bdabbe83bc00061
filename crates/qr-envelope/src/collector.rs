//! Decode path: group scanned envelopes by source file and track completeness.
//!
//! Envelopes arrive in any order, possibly duplicated, possibly with gaps. The
//! collector keys them by `(source, chunk_index)`; a repeat of the same pair
//! overwrites the earlier copy. `chunk_count` is redundant in every envelope of
//! a file, so the first envelope seen fixes the declared count and any later
//! disagreement is reported as corrupt input rather than resolved.
//!
//! `ingest` takes `&self` and is safe to call from several scanning workers at
//! once: each source's group is mutated under its own `DashMap` shard lock,
//! and statistics queries only take read locks.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use thiserror::Error;

use crate::envelope::Envelope;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectError {
    /// The envelope's `chunk_count` contradicts the one recorded for its file.
    #[error("'{file}' declares {declared} chunks but {recorded} were recorded earlier")]
    InconsistentChunkCount { file: String, recorded: u32, declared: u32 },

    /// The envelope's position lies outside `1..=chunk_count`.
    #[error("'{file}' chunk {chunk_index} is outside 1..={chunk_count}")]
    IndexOutOfRange { file: String, chunk_index: u32, chunk_count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First copy of this chunk.
    New,
    /// Replaced an earlier copy of the same chunk.
    Duplicate,
}

// ---------------------------------------------------------------------------
// FileChunkGroup
// ---------------------------------------------------------------------------

/// All chunks seen so far for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunkGroup {
    /// Chunk count fixed by the first envelope seen for this file.
    pub declared_count: u32,
    /// Chunks keyed by 1-based index; iteration is numeric order.
    pub chunks: BTreeMap<u32, Envelope>,
    /// Chunk counts seen in rejected envelopes that disagreed with `declared_count`.
    pub conflicting_counts: BTreeSet<u32>,
}

/// Completeness verdict for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub complete: bool,
    pub declared: u32,
    pub found: usize,
    pub missing: Vec<u32>,
    pub consistent: bool,
}

impl FileChunkGroup {
    pub fn new(declared_count: u32) -> Self {
        Self {
            declared_count,
            chunks: BTreeMap::new(),
            conflicting_counts: BTreeSet::new(),
        }
    }

    /// Build a group from envelopes directly, bypassing the collector.
    /// The first envelope fixes the declared count; disagreeing ones are
    /// recorded as conflicts and skipped.
    pub fn from_envelopes(envelopes: impl IntoIterator<Item = Envelope>) -> Option<Self> {
        let mut iter = envelopes.into_iter().peekable();
        let mut group = Self::new(iter.peek()?.chunk_count);
        for env in iter {
            let _ = group.insert(env);
        }
        Some(group)
    }

    fn insert(&mut self, envelope: Envelope) -> Result<IngestOutcome, CollectError> {
        if envelope.chunk_count != self.declared_count {
            self.conflicting_counts.insert(envelope.chunk_count);
            return Err(CollectError::InconsistentChunkCount {
                file: envelope.source,
                recorded: self.declared_count,
                declared: envelope.chunk_count,
            });
        }
        if envelope.chunk_index == 0 || envelope.chunk_index > self.declared_count {
            return Err(CollectError::IndexOutOfRange {
                file: envelope.source,
                chunk_index: envelope.chunk_index,
                chunk_count: self.declared_count,
            });
        }
        match self.chunks.insert(envelope.chunk_index, envelope) {
            Some(_) => Ok(IngestOutcome::Duplicate),
            None => Ok(IngestOutcome::New),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.conflicting_counts.is_empty()
    }

    /// Indices in `1..=declared_count` with no chunk, ascending.
    pub fn missing(&self) -> Vec<u32> {
        (1..=self.declared_count)
            .filter(|i| !self.chunks.contains_key(i))
            .collect()
    }

    pub fn completeness(&self) -> Completeness {
        let missing = self.missing();
        Completeness {
            complete: missing.is_empty(),
            declared: self.declared_count,
            found: self.chunks.len(),
            missing,
            consistent: self.is_consistent(),
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub found: usize,
    pub total: u32,
    pub complete: bool,
    pub missing: Vec<u32>,
    pub consistent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectorStats {
    pub files: BTreeMap<String, FileStats>,
    pub total_files: usize,
    pub complete_files: usize,
    pub envelopes_ingested: u64,
    pub duplicates: u64,
    pub conflicts: u64,
}

impl CollectorStats {
    pub fn incomplete_files(&self) -> impl Iterator<Item = (&String, &FileStats)> {
        self.files.iter().filter(|(_, f)| !f.complete)
    }

    pub fn inconsistent_files(&self) -> impl Iterator<Item = (&String, &FileStats)> {
        self.files.iter().filter(|(_, f)| !f.consistent)
    }
}

// ---------------------------------------------------------------------------
// ChunkCollector
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ChunkCollector {
    groups: DashMap<String, FileChunkGroup>,
    envelopes_ingested: AtomicU64,
    duplicates: AtomicU64,
    conflicts: AtomicU64,
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one envelope. Out-of-order and duplicate input never fails.
    pub fn ingest(&self, envelope: Envelope) -> Result<IngestOutcome, CollectError> {
        self.envelopes_ingested.fetch_add(1, Relaxed);

        if envelope.chunk_index == 0 || envelope.chunk_index > envelope.chunk_count {
            return Err(CollectError::IndexOutOfRange {
                file: envelope.source,
                chunk_index: envelope.chunk_index,
                chunk_count: envelope.chunk_count,
            });
        }

        let mut group = self
            .groups
            .entry(envelope.source.clone())
            .or_insert_with(|| FileChunkGroup::new(envelope.chunk_count));

        let result = group.insert(envelope);
        match &result {
            Ok(IngestOutcome::Duplicate) => {
                self.duplicates.fetch_add(1, Relaxed);
            }
            Err(CollectError::InconsistentChunkCount { .. }) => {
                self.conflicts.fetch_add(1, Relaxed);
            }
            _ => {}
        }
        result
    }

    /// Snapshot of one file's chunks.
    pub fn group(&self, source: &str) -> Option<FileChunkGroup> {
        self.groups.get(source).map(|g| g.clone())
    }

    /// Snapshot of every group, ordered by source.
    pub fn groups(&self) -> BTreeMap<String, FileChunkGroup> {
        self.groups
            .iter()
            .map(|g| (g.key().clone(), g.value().clone()))
            .collect()
    }

    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.groups.iter().map(|g| g.key().clone()).collect();
        sources.sort();
        sources
    }

    pub fn completeness(&self, source: &str) -> Option<Completeness> {
        self.groups.get(source).map(|g| g.completeness())
    }

    pub fn statistics(&self) -> CollectorStats {
        let files: BTreeMap<String, FileStats> = self
            .groups
            .iter()
            .map(|g| {
                let c = g.completeness();
                let stats = FileStats {
                    found: c.found,
                    total: c.declared,
                    complete: c.complete,
                    missing: c.missing,
                    consistent: c.consistent,
                };
                (g.key().clone(), stats)
            })
            .collect();

        CollectorStats {
            total_files: files.len(),
            complete_files: files.values().filter(|f| f.complete).count(),
            files,
            envelopes_ingested: self.envelopes_ingested.load(Relaxed),
            duplicates: self.duplicates.load(Relaxed),
            conflicts: self.conflicts.load(Relaxed),
        }
    }

    /// Drop every group and zero the counters.
    pub fn reset(&self) {
        self.groups.clear();
        self.envelopes_ingested.store(0, Relaxed);
        self.duplicates.store(0, Relaxed);
        self.conflicts.store(0, Relaxed);
        tracing::debug!("collector reset");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::DEFAULT_MARKER;
    use std::sync::Arc;

    fn env(source: &str, chunk_index: u32, chunk_count: u32) -> Envelope {
        Envelope {
            sequence_index: u64::from(chunk_index),
            source: source.into(),
            chunk_index,
            chunk_count,
            payload: format!("P{}", chunk_index),
            marker: DEFAULT_MARKER.into(),
        }
    }

    #[test]
    fn test_missing_chunk_three_of_five() {
        let c = ChunkCollector::new();
        for i in [5, 1, 4, 2] {
            c.ingest(env("f", i, 5)).unwrap();
        }
        let verdict = c.completeness("f").unwrap();
        assert!(!verdict.complete);
        assert_eq!(verdict.missing, vec![3]);
        assert_eq!(verdict.found, 4);
        assert!(verdict.consistent);
    }

    #[test]
    fn test_duplicates_overwrite() {
        let c = ChunkCollector::new();
        assert_eq!(c.ingest(env("f", 1, 2)).unwrap(), IngestOutcome::New);
        let mut again = env("f", 1, 2);
        again.payload = "newer".into();
        assert_eq!(c.ingest(again).unwrap(), IngestOutcome::Duplicate);
        c.ingest(env("f", 2, 2)).unwrap();

        let group = c.group("f").unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.chunks[&1].payload, "newer");
        assert!(c.completeness("f").unwrap().complete);
        assert_eq!(c.statistics().duplicates, 1);
    }

    #[test]
    fn test_inconsistent_count_is_rejected_and_flagged() {
        let c = ChunkCollector::new();
        c.ingest(env("f", 1, 3)).unwrap();
        let err = c.ingest(env("f", 2, 4)).unwrap_err();
        assert_eq!(
            err,
            CollectError::InconsistentChunkCount { file: "f".into(), recorded: 3, declared: 4 }
        );
        let group = c.group("f").unwrap();
        assert_eq!(group.len(), 1);
        assert!(!group.is_consistent());
        assert_eq!(group.conflicting_counts.iter().copied().collect::<Vec<_>>(), vec![4]);

        let stats = c.statistics();
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.inconsistent_files().count(), 1);
    }

    #[test]
    fn test_index_out_of_range_is_rejected() {
        let c = ChunkCollector::new();
        c.ingest(env("f", 1, 2)).unwrap();
        assert!(matches!(c.ingest(env("f", 3, 2)), Err(CollectError::IndexOutOfRange { .. })));
        assert_eq!(c.group("f").unwrap().len(), 1);
    }

    #[test]
    fn test_statistics_across_files() {
        let c = ChunkCollector::new();
        c.ingest(env("a", 1, 1)).unwrap();
        c.ingest(env("b", 2, 3)).unwrap();

        let stats = c.statistics();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.complete_files, 1);
        assert_eq!(stats.envelopes_ingested, 2);
        assert_eq!(stats.files["b"].missing, vec![1, 3]);
        assert_eq!(stats.files["b"].total, 3);
        assert_eq!(stats.incomplete_files().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(c.sources(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let c = ChunkCollector::new();
        c.ingest(env("a", 1, 1)).unwrap();
        c.reset();
        assert!(c.group("a").is_none());
        assert_eq!(c.statistics(), CollectorStats::default());
    }

    #[test]
    fn test_ordering_is_numeric() {
        let group =
            FileChunkGroup::from_envelopes([env("f", 10, 10), env("f", 9, 10), env("f", 2, 10)])
                .unwrap();
        let order: Vec<u32> = group.chunks.keys().copied().collect();
        assert_eq!(order, vec![2, 9, 10]);
    }

    #[test]
    fn test_concurrent_ingest() {
        let c = Arc::new(ChunkCollector::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for i in 1..=200u32 {
                        let source = if i % 2 == 0 { "even" } else { "odd" };
                        // every thread delivers every chunk → 3 duplicates each
                        c.ingest(env(source, i.div_ceil(2), 100)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = c.statistics();
        assert_eq!(stats.envelopes_ingested, 800);
        assert_eq!(stats.complete_files, 2);
        assert_eq!(stats.duplicates, 600);
    }
}
