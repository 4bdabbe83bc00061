//! `zipqr decode`: rebuild files from a directory of scanned artifacts.

use anyhow::{bail, Context, Result};
use qr_envelope::{
    build_report, reconstruct_all, ChunkCollector, Manifest, ReconstructPolicy, Reconstruction,
    ReconstructionReport, SymbolEncoder, TextSymbolCodec,
};
use std::path::{Component, Path, PathBuf};

use crate::color;
use crate::config::AppConfig;
use crate::encode::MANIFEST_FILE;
use crate::scan::{scan_dir, ScanStats};

pub const REPORT_FILE: &str = "reconstruction_report.json";

pub struct DecodeArgs {
    pub input_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub allow_partial: bool,
    pub force: bool,
}

/// Returns whether at least one file was rebuilt completely.
pub fn run(cfg: &AppConfig, args: DecodeArgs) -> Result<bool> {
    let mut codec = cfg.codec();
    codec.allow_partial_reconstruction |= args.allow_partial;
    codec.force_reconstruction |= args.force;
    let out_dir = args.output_dir.unwrap_or_else(|| PathBuf::from(&cfg.output_dir));

    let manifest = load_manifest(&args.input_dir, args.manifest.as_deref())?;
    let (report, stats) = decode_dir(
        &args.input_dir,
        &out_dir,
        manifest.as_ref(),
        codec.policy(),
        cfg.workers,
    )?;

    println!(
        "Scanned {} artifact(s): {} accepted, {} unreadable, {} malformed, {} conflicting",
        stats.scanned, stats.accepted, stats.unreadable, stats.malformed, stats.conflicting
    );
    for (source, file) in &report.files {
        println!("  {}  {}", color::rpad(&color::status(file.status), 22), source);
    }
    println!(
        "Rebuilt {} of {} file(s) ({} partial, {} failed); report at {}",
        report.successful,
        report.total_files,
        report.partial,
        report.failed,
        out_dir.join(REPORT_FILE).display()
    );
    Ok(report.any_complete())
}

/// Explicit manifest paths must load; the default one is optional.
pub fn load_manifest(input_dir: &Path, explicit: Option<&Path>) -> Result<Option<Manifest>> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let p = input_dir.join(MANIFEST_FILE);
            if !p.is_file() {
                tracing::info!(dir = %input_dir.display(), "no manifest, fingerprints will not be checked");
                return Ok(None);
            }
            p
        }
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read manifest: {}", path.display()))?;
    let manifest = Manifest::from_json(&text)
        .with_context(|| format!("failed to parse manifest: {}", path.display()))?;
    tracing::info!(path = %path.display(), files = manifest.files.len(), "manifest loaded");
    Ok(Some(manifest))
}

pub fn decode_dir(
    input_dir: &Path,
    out_dir: &Path,
    manifest: Option<&Manifest>,
    policy: ReconstructPolicy,
    workers: usize,
) -> Result<(ReconstructionReport, ScanStats)> {
    let symbols = TextSymbolCodec::default();
    let collector = ChunkCollector::new();
    let stats = scan_dir(input_dir, symbols.extension(), &symbols, workers, &collector)?;

    let pre = collector.statistics();
    tracing::info!(
        files = pre.total_files,
        complete = pre.complete_files,
        duplicates = pre.duplicates,
        conflicts = pre.conflicts,
        "pre-flight"
    );
    for (source, fs) in pre.incomplete_files() {
        tracing::warn!(source = %source, found = fs.found, total = fs.total, missing = ?fs.missing, "incomplete");
    }
    for (source, _) in pre.inconsistent_files() {
        tracing::warn!(source = %source, "conflicting chunk counts");
    }
    if let Some(m) = manifest {
        for source in m.files.keys().filter(|s| !pre.files.contains_key(*s)) {
            tracing::warn!(source = %source, "listed in manifest but no chunk was scanned");
        }
    }

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory: {}", out_dir.display()))?;

    let outcomes = reconstruct_all(&collector, manifest, policy);
    let report = build_report(outcomes, |source, rec| {
        save_output(out_dir, source, rec).map(|p| p.display().to_string())
    });

    let report_path = out_dir.join(REPORT_FILE);
    std::fs::write(&report_path, report.to_json_pretty()?)
        .with_context(|| format!("failed to write report: {}", report_path.display()))?;

    Ok((report, stats))
}

/// Join a `/`-separated identifier onto `root`, refusing anything that
/// could land outside it.
pub fn safe_join(root: &Path, source: &str) -> Result<PathBuf> {
    let rel = Path::new(source);
    if source.is_empty() || source.contains('\\') {
        bail!("refusing output path '{}'", source);
    }
    for c in rel.components() {
        if !matches!(c, Component::Normal(_)) {
            bail!("refusing output path '{}': escapes the output directory", source);
        }
    }
    Ok(root.join(rel))
}

fn save_output(root: &Path, source: &str, rec: &Reconstruction) -> Result<PathBuf> {
    let path = safe_join(root, source)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(&path, &rec.bytes)
        .with_context(|| format!("failed to write output: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{collect_tree, encode_to_dir};
    use qr_envelope::{EncodeMode, EncodeOptions, ErrorCorrection, FileStatus};

    fn opts() -> EncodeOptions {
        EncodeOptions {
            chunk_size_budget: 220,
            error_correction: ErrorCorrection::M,
            mode: EncodeMode::Archive,
            workers: 3,
            first_sequence: 1,
        }
    }

    fn source_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("readme.md"), b"# title\n".repeat(40)).unwrap();
        let blob: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("docs/blob.bin"), blob).unwrap();
        dir
    }

    #[test]
    fn test_safe_join_rejects_escapes() {
        let root = Path::new("/tmp/out");
        assert!(safe_join(root, "a/b.txt").is_ok());
        assert!(safe_join(root, "../etc/passwd").is_err());
        assert!(safe_join(root, "a/../../x").is_err());
        assert!(safe_join(root, "/abs").is_err());
        assert!(safe_join(root, "").is_err());
        assert!(safe_join(root, "a\\..\\b").is_err());
    }

    #[test]
    fn test_round_trip_through_artifacts() {
        let src = source_tree();
        let artifacts = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let files = collect_tree(src.path()).unwrap();
        encode_to_dir(files, &opts(), artifacts.path(), &TextSymbolCodec::default()).unwrap();

        let manifest = load_manifest(artifacts.path(), None).unwrap();
        assert!(manifest.is_some());
        let (report, stats) =
            decode_dir(artifacts.path(), out.path(), manifest.as_ref(), ReconstructPolicy::Strict, 4)
                .unwrap();

        assert_eq!(stats.malformed + stats.unreadable + stats.conflicting, 0);
        assert_eq!((report.successful, report.failed), (2, 0));
        for name in ["readme.md", "docs/blob.bin"] {
            assert_eq!(
                std::fs::read(out.path().join(name)).unwrap(),
                std::fs::read(src.path().join(name)).unwrap()
            );
            assert_eq!(report.files[name].fingerprint_match, Some(true));
        }
        assert!(out.path().join(REPORT_FILE).is_file());
    }

    #[test]
    fn test_lost_artifact_is_reported_not_saved() {
        let src = source_tree();
        let artifacts = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let files = collect_tree(src.path()).unwrap();
        encode_to_dir(files, &opts(), artifacts.path(), &TextSymbolCodec::default()).unwrap();
        let manifest = load_manifest(artifacts.path(), None).unwrap();
        let first = manifest.as_ref().unwrap().files["docs/blob.bin"].sequence_indices[0];
        std::fs::remove_file(artifacts.path().join(format!("{first}.sym"))).unwrap();

        let (report, _) =
            decode_dir(artifacts.path(), out.path(), manifest.as_ref(), ReconstructPolicy::Strict, 2)
                .unwrap();

        assert_eq!(report.files["docs/blob.bin"].status, FileStatus::Incomplete);
        assert_eq!(report.files["docs/blob.bin"].missing_chunks, vec![1]);
        assert_eq!(report.files["readme.md"].status, FileStatus::Complete);
        assert!(!out.path().join("docs/blob.bin").exists());
        assert!(report.any_complete());
    }

    #[test]
    fn test_explicit_manifest_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_manifest(dir.path(), Some(&dir.path().join("missing.json"))).is_err());
        assert!(load_manifest(dir.path(), None).unwrap().is_none());
    }
}
