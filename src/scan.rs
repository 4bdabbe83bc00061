//! Artifact directory scanning.
//!
//! Artifacts are read and parsed on a worker pool, then ingested in numeric
//! filename order so "first recorded chunk count" is deterministic.

use anyhow::{Context, Result};
use qr_envelope::{ChunkCollector, Envelope, IngestOutcome, SymbolDecoder};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: usize,
    /// Could not be read, or carried no text.
    pub unreadable: usize,
    /// Text was not a valid envelope.
    pub malformed: usize,
    /// Envelope rejected by the collector (count conflict or bad index).
    pub conflicting: usize,
    pub accepted: usize,
    pub duplicates: usize,
}

/// Artifacts with extension `ext` in `dir`, numeric stems first in numeric
/// order, then anything else by name.
pub fn list_artifacts(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read artifact directory: {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list artifact directory: {}", dir.display()))?
            .path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext) {
            paths.push(path);
        }
    }
    paths.sort_by_cached_key(|p| {
        let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        (stem.parse::<u64>().map_err(|_| ()), stem)
    });
    Ok(paths)
}

enum Parsed {
    Unreadable,
    Malformed,
    Envelope(Envelope),
}

fn parse_artifact(path: &Path, decoder: &dyn SymbolDecoder) -> Parsed {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "artifact unreadable");
            return Parsed::Unreadable;
        }
    };
    let Some(text) = decoder.decode_symbol(&bytes) else {
        tracing::debug!(path = %path.display(), "no symbol found");
        return Parsed::Unreadable;
    };
    match Envelope::deserialize(&text) {
        Ok(env) => Parsed::Envelope(env),
        Err(e) => {
            tracing::debug!(path = %path.display(), err = %e, "not an envelope");
            Parsed::Malformed
        }
    }
}

/// Scan every artifact in `dir` into `collector`.
pub fn scan_dir(
    dir: &Path,
    ext: &str,
    decoder: &dyn SymbolDecoder,
    workers: usize,
    collector: &ChunkCollector,
) -> Result<ScanStats> {
    let paths = list_artifacts(dir, ext)?;
    let workers = workers.max(1).min(paths.len().max(1));

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, &Path)>();
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<(usize, Parsed)>();
    for (i, p) in paths.iter().enumerate() {
        let _ = job_tx.send((i, p.as_path()));
    }
    drop(job_tx);

    std::thread::scope(|s| {
        let mut spawned = 0usize;
        for i in 0..workers {
            let rx = job_rx.clone();
            let tx = done_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("scan-{i}"))
                .spawn_scoped(s, move || {
                    for (idx, path) in rx.iter() {
                        if tx.send((idx, parse_artifact(path, decoder))).is_err() {
                            break;
                        }
                    }
                });
            match handle {
                Ok(_) => spawned += 1,
                Err(e) => tracing::warn!(worker = i, err = %e, "failed to spawn scan worker"),
            }
        }
        if spawned == 0 {
            for (idx, path) in job_rx.iter() {
                let _ = done_tx.send((idx, parse_artifact(path, decoder)));
            }
        }
    });
    drop(done_tx);

    let mut parsed: Vec<(usize, Parsed)> = done_rx.iter().collect();
    parsed.sort_unstable_by_key(|(i, _)| *i);

    let mut stats = ScanStats { scanned: paths.len(), ..ScanStats::default() };
    for (idx, item) in parsed {
        match item {
            Parsed::Unreadable => stats.unreadable += 1,
            Parsed::Malformed => stats.malformed += 1,
            Parsed::Envelope(env) => match collector.ingest(env) {
                Ok(IngestOutcome::New) => stats.accepted += 1,
                Ok(IngestOutcome::Duplicate) => {
                    stats.accepted += 1;
                    stats.duplicates += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %paths[idx].display(), err = %e, "envelope rejected");
                    stats.conflicting += 1;
                }
            },
        }
    }

    tracing::info!(
        dir = %dir.display(),
        scanned = stats.scanned,
        accepted = stats.accepted,
        duplicates = stats.duplicates,
        unreadable = stats.unreadable,
        malformed = stats.malformed,
        conflicting = stats.conflicting,
        "scan complete"
    );
    Ok(stats)
}
