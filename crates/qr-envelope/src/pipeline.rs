//! Whole-run drivers: encode a batch of files, reconstruct everything a
//! collector holds, and fold the outcomes into a report.

use std::sync::Arc;

use crate::assembler::{reconstruct, ReconstructError, ReconstructPolicy, Reconstruction};
use crate::checksum::fingerprint;
use crate::collector::ChunkCollector;
use crate::config::CodecConfig;
use crate::envelope::{Envelope, EnvelopeError};
use crate::manifest::{EncodeMode, Manifest, OriginInfo};
use crate::report::ReconstructionReport;
use crate::splitter::{ChunkSplitter, SequenceAllocator};
use crate::symbol::ErrorCorrection;

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// One input file: `source` is its `/`-separated relative identifier.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub source: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub chunk_size_budget: usize,
    pub error_correction: ErrorCorrection,
    pub mode: EncodeMode,
    /// Split threads; clamped to at least one.
    pub workers: usize,
    pub first_sequence: u64,
}

impl EncodeOptions {
    pub fn from_codec(codec: &CodecConfig, mode: EncodeMode, workers: usize) -> Self {
        Self {
            chunk_size_budget: codec.chunk_size_budget,
            error_correction: codec.error_correction,
            mode,
            workers,
            first_sequence: 1,
        }
    }
}

#[derive(Debug)]
pub struct EncodeFailure {
    pub source: String,
    pub error: EnvelopeError,
}

#[derive(Debug)]
pub struct EncodeOutput {
    /// Every envelope of the run, ascending by sequence index.
    pub envelopes: Vec<Envelope>,
    pub manifest: Manifest,
    pub failures: Vec<EncodeFailure>,
}

struct Split {
    source: String,
    size: u64,
    fingerprint: crate::checksum::Fingerprint,
    result: Result<Vec<Envelope>, EnvelopeError>,
}

fn split_one(splitter: &ChunkSplitter, file: SourceFile) -> Split {
    Split {
        size: file.bytes.len() as u64,
        fingerprint: fingerprint(&file.bytes),
        result: splitter.split(&file.bytes, &file.source),
        source: file.source,
    }
}

/// Split every file on a pool of worker threads sharing one sequence counter.
///
/// A file whose identifier cannot fit the budget is reported in
/// `failures`; the rest of the batch is still encoded.
pub fn encode_files(files: Vec<SourceFile>, opts: &EncodeOptions) -> EncodeOutput {
    let allocator = Arc::new(SequenceAllocator::starting_at(opts.first_sequence));
    let splitter = ChunkSplitter::new(allocator, opts.chunk_size_budget);
    let workers = opts.workers.max(1).min(files.len().max(1));

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<SourceFile>();
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<Split>();
    for file in files {
        // Receiver is alive until the scope below ends.
        let _ = job_tx.send(file);
    }
    drop(job_tx);

    std::thread::scope(|s| {
        let mut spawned = 0usize;
        for i in 0..workers {
            let rx = job_rx.clone();
            let tx = done_tx.clone();
            let splitter = &splitter;
            let handle = std::thread::Builder::new()
                .name(format!("split-{i}"))
                .spawn_scoped(s, move || {
                    for file in rx.iter() {
                        if tx.send(split_one(splitter, file)).is_err() {
                            break;
                        }
                    }
                });
            match handle {
                Ok(_) => spawned += 1,
                Err(e) => tracing::warn!(worker = i, err = %e, "failed to spawn split worker"),
            }
        }
        if spawned == 0 {
            for file in job_rx.iter() {
                let _ = done_tx.send(split_one(&splitter, file));
            }
        }
    });
    drop(done_tx);

    let mut splits: Vec<Split> = done_rx.iter().collect();
    splits.sort_by(|a, b| a.source.cmp(&b.source));

    let mut manifest = Manifest::new(opts.mode, opts.chunk_size_budget, opts.error_correction);
    let mut envelopes = Vec::new();
    let mut failures = Vec::new();
    for split in splits {
        match split.result {
            Ok(envs) => {
                if opts.mode == EncodeMode::Direct && manifest.run.origin.is_none() {
                    manifest.run.origin = Some(OriginInfo {
                        filename: split.source.clone(),
                        size: split.size,
                        fingerprint: split.fingerprint.clone(),
                    });
                }
                manifest.record_file(&split.source, split.size, split.fingerprint, &envs);
                envelopes.extend(envs);
            }
            Err(error) => {
                tracing::warn!(source = %split.source, err = %error, "file skipped");
                failures.push(EncodeFailure { source: split.source, error });
            }
        }
    }
    envelopes.sort_by_key(|e| e.sequence_index);

    tracing::info!(
        files = manifest.files.len(),
        envelopes = envelopes.len(),
        failures = failures.len(),
        workers,
        "encode complete"
    );

    EncodeOutput { envelopes, manifest, failures }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FileOutcome {
    pub source: String,
    pub chunks_available: usize,
    pub expected_size: Option<u64>,
    pub result: Result<Reconstruction, ReconstructError>,
}

/// Reconstruct every file the collector has seen, in source order.
pub fn reconstruct_all(
    collector: &ChunkCollector,
    manifest: Option<&Manifest>,
    policy: ReconstructPolicy,
) -> Vec<FileOutcome> {
    collector
        .groups()
        .into_iter()
        .map(|(source, group)| {
            let expected = manifest.and_then(|m| m.expected_fingerprint(&source));
            let result = reconstruct(&source, &group, policy, expected);
            if let Err(e) = &result {
                tracing::warn!(source = %source, err = %e, "file not reconstructed");
            }
            FileOutcome {
                chunks_available: group.len(),
                expected_size: manifest.and_then(|m| m.expected_size(&source)),
                result,
                source,
            }
        })
        .collect()
}

/// Fold outcomes into a report. `save` writes one reconstruction and returns
/// the path it was written to.
pub fn build_report<F, E>(outcomes: Vec<FileOutcome>, mut save: F) -> ReconstructionReport
where
    F: FnMut(&str, &Reconstruction) -> Result<String, E>,
    E: std::fmt::Display,
{
    let mut report = ReconstructionReport::new();
    for outcome in outcomes {
        match &outcome.result {
            Ok(rec) => match save(&outcome.source, rec) {
                Ok(path) => {
                    report.record_reconstructed(&outcome.source, rec, &path, outcome.expected_size)
                }
                Err(e) => {
                    tracing::warn!(source = %outcome.source, err = %e, "save failed");
                    report.record_save_failed(&outcome.source, rec, e.to_string());
                }
            },
            Err(err) => report.record_failure(&outcome.source, err, outcome.chunks_available),
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FileStatus;
    use std::collections::{BTreeMap, HashSet};

    fn opts(budget: usize, workers: usize) -> EncodeOptions {
        EncodeOptions {
            chunk_size_budget: budget,
            error_correction: ErrorCorrection::M,
            mode: EncodeMode::Archive,
            workers,
            first_sequence: 1,
        }
    }

    fn files() -> Vec<SourceFile> {
        vec![
            SourceFile { source: "a.txt".into(), bytes: b"alpha ".repeat(300) },
            SourceFile { source: "nested/b.bin".into(), bytes: (0..=255u8).cycle().take(4000).collect() },
            SourceFile { source: "empty".into(), bytes: Vec::new() },
        ]
    }

    #[test]
    fn test_two_files_share_global_sequence() {
        let out = encode_files(files(), &opts(200, 4));
        assert!(out.failures.is_empty());

        let seqs: Vec<u64> = out.envelopes.iter().map(|e| e.sequence_index).collect();
        let unique: HashSet<u64> = seqs.iter().copied().collect();
        assert_eq!(unique.len(), seqs.len());
        assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
        assert_eq!(out.manifest.total_chunks, seqs.len() as u64);

        // each file owns a contiguous block
        for entry in out.manifest.files.values() {
            let s = &entry.sequence_indices;
            assert!(s.windows(2).all(|w| w[1] == w[0] + 1));
            assert_eq!(s.len() as u32, entry.chunk_count);
        }
        assert!(out.envelopes.iter().all(|e| e.serialized_len() <= 200));
    }

    #[test]
    fn test_budget_failure_does_not_abort_batch() {
        let mut batch = files();
        batch.push(SourceFile { source: "x".repeat(300), bytes: b"too long a name".to_vec() });
        let out = encode_files(batch, &opts(200, 2));
        assert_eq!(out.failures.len(), 1);
        assert!(matches!(out.failures[0].error, EnvelopeError::BudgetExceeded { .. }));
        assert_eq!(out.manifest.files.len(), 3);
    }

    #[test]
    fn test_direct_mode_records_origin() {
        let mut o = opts(300, 1);
        o.mode = EncodeMode::Direct;
        let out = encode_files(vec![SourceFile { source: "doc.pdf".into(), bytes: b"%PDF".to_vec() }], &o);
        let origin = out.manifest.run.origin.as_ref().unwrap();
        assert_eq!(origin.filename, "doc.pdf");
        assert_eq!(origin.size, 4);
    }

    #[test]
    fn test_end_to_end_with_missing_chunk() {
        let originals: BTreeMap<String, Vec<u8>> =
            files().into_iter().map(|f| (f.source, f.bytes)).collect();
        let out = encode_files(files(), &opts(200, 3));

        let collector = ChunkCollector::new();
        // drop chunk 2 of a.txt, feed the rest in reverse
        for env in out.envelopes.iter().rev() {
            if env.source == "a.txt" && env.chunk_index == 2 {
                continue;
            }
            let wire = env.serialize();
            collector.ingest(Envelope::deserialize(&wire).unwrap()).unwrap();
        }

        let outcomes = reconstruct_all(&collector, Some(&out.manifest), ReconstructPolicy::Strict);
        assert_eq!(outcomes.len(), 3);

        let mut saved = BTreeMap::new();
        let report = build_report(outcomes, |source, rec| {
            if source == "empty" {
                return Err("read-only target");
            }
            saved.insert(source.to_string(), rec.bytes.clone());
            Ok(format!("out/{source}"))
        });

        assert_eq!(saved["nested/b.bin"], originals["nested/b.bin"]);
        assert_eq!(report.files["nested/b.bin"].status, FileStatus::Complete);
        assert_eq!(report.files["nested/b.bin"].fingerprint_match, Some(true));
        assert_eq!(report.files["nested/b.bin"].expected_size_match, Some(true));
        assert_eq!(report.files["a.txt"].status, FileStatus::Incomplete);
        assert_eq!(report.files["a.txt"].missing_chunks, vec![2]);
        assert_eq!(report.files["empty"].status, FileStatus::SaveFailed);
        assert_eq!((report.total_files, report.successful, report.failed), (3, 1, 2));
        assert!(report.any_complete());
    }
}
