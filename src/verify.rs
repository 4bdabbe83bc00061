//! `zipqr verify`: check a rebuilt file against its manifest entry.

use anyhow::{Context, Result};
use qr_envelope::{fingerprint, Manifest};
use std::path::Path;

use crate::color;
use crate::decode::load_manifest;

#[derive(Debug, PartialEq, Eq)]
pub struct Verdict {
    pub fingerprint_match: bool,
    pub size_match: Option<bool>,
}

/// Returns whether the file matches.
pub fn run(file: &Path, manifest_path: &Path, source: Option<String>) -> Result<bool> {
    let manifest = load_manifest(Path::new("."), Some(manifest_path))?
        .with_context(|| format!("no manifest at {}", manifest_path.display()))?;
    let source = match source {
        Some(s) => s,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("file has no usable name: {}", file.display()))?
            .to_string(),
    };

    let verdict = verify_file(file, &manifest, &source)?;
    let label = if verdict.fingerprint_match { color::green("MATCH") } else { color::red("MISMATCH") };
    println!("{}  {}  ({})", label, file.display(), source);
    if verdict.size_match == Some(false) {
        println!("  {}", color::yellow("size differs from the manifest"));
    }
    Ok(verdict.fingerprint_match)
}

pub fn verify_file(file: &Path, manifest: &Manifest, source: &str) -> Result<Verdict> {
    let expected = manifest
        .expected_fingerprint(source)
        .with_context(|| format!("'{}' is not listed in the manifest", source))?;
    let bytes = std::fs::read(file)
        .with_context(|| format!("failed to read file: {}", file.display()))?;
    let actual = fingerprint(&bytes);
    tracing::debug!(source, expected = %expected, actual = %actual, "verify");
    Ok(Verdict {
        fingerprint_match: actual == *expected,
        size_match: manifest.expected_size(source).map(|s| s == bytes.len() as u64),
    })
}
