//! `zipqr encode`: split a file or a directory tree into symbol artifacts.

use anyhow::{bail, Context, Result};
use qr_envelope::{encode_files, EncodeMode, EncodeOptions, SourceFile, SymbolEncoder, TextSymbolCodec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Default)]
pub struct EncodeSummary {
    pub files: usize,
    pub artifacts: usize,
    /// Files left out of the run, with the reason.
    pub skipped: Vec<(String, String)>,
}

pub fn run(
    cfg: &AppConfig,
    input: &Path,
    output_dir: Option<PathBuf>,
    chunk_size: Option<usize>,
    direct: bool,
) -> Result<()> {
    let mut codec = cfg.codec();
    if let Some(size) = chunk_size {
        codec.chunk_size_budget = size;
    }
    let out_dir = output_dir.unwrap_or_else(|| PathBuf::from(&cfg.artifact_dir));

    let (mode, files) = if input.is_dir() {
        if direct {
            bail!("--direct needs a single file, '{}' is a directory", input.display());
        }
        (EncodeMode::Archive, collect_tree(input)?)
    } else {
        (EncodeMode::Direct, vec![read_single(input)?])
    };
    if files.is_empty() {
        bail!("nothing to encode under '{}'", input.display());
    }

    let symbols = TextSymbolCodec::new(codec.error_correction);
    if codec.chunk_size_budget > codec.error_correction.byte_capacity() {
        tracing::warn!(
            budget = codec.chunk_size_budget,
            capacity = codec.error_correction.byte_capacity(),
            level = %codec.error_correction,
            "chunk size exceeds symbol capacity, files with larger envelopes will be skipped"
        );
    }

    let opts = EncodeOptions::from_codec(&codec, mode, cfg.workers);
    let summary = encode_to_dir(files, &opts, &out_dir, &symbols)?;

    println!(
        "Encoded {} file(s) into {} artifact(s) in {}",
        summary.files,
        summary.artifacts,
        out_dir.display()
    );
    for (source, reason) in &summary.skipped {
        eprintln!("  skipped '{}': {}", source, reason);
    }
    if summary.files == 0 {
        bail!("no file could be encoded at chunk size {}", codec.chunk_size_budget);
    }
    Ok(())
}

/// Encode `files` and write one artifact per envelope plus the manifest.
///
/// Every symbol is rendered before anything is written. A file with any
/// chunk the symbol backend refuses is dropped whole, so the directory never
/// holds artifacts the manifest does not describe.
pub fn encode_to_dir(
    files: Vec<SourceFile>,
    opts: &EncodeOptions,
    out_dir: &Path,
    symbols: &dyn SymbolEncoder,
) -> Result<EncodeSummary> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory: {}", out_dir.display()))?;

    let output = encode_files(files, opts);
    let mut manifest = output.manifest;
    let mut skipped: Vec<(String, String)> =
        output.failures.into_iter().map(|f| (f.source, f.error.to_string())).collect();

    let mut rendered = Vec::with_capacity(output.envelopes.len());
    let mut refused: BTreeMap<String, String> = BTreeMap::new();
    for env in &output.envelopes {
        if refused.contains_key(&env.source) {
            continue;
        }
        match symbols.encode_symbol(&env.serialize()) {
            Ok(bytes) => rendered.push((env, bytes)),
            Err(e) => {
                tracing::warn!(
                    file = %env.source,
                    chunk = env.chunk_index,
                    error = %e,
                    "symbol refused, dropping file"
                );
                refused.insert(env.source.clone(), e.to_string());
            }
        }
    }
    for (source, reason) in refused {
        manifest.remove_file(&source);
        skipped.push((source, reason));
    }

    let mut artifacts = 0;
    for (env, bytes) in rendered {
        if manifest.entry(&env.source).is_none() {
            continue;
        }
        let path = out_dir.join(format!("{}.{}", env.sequence_index, symbols.extension()));
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write artifact: {}", path.display()))?;
        artifacts += 1;
    }

    let manifest_path = out_dir.join(MANIFEST_FILE);
    let json = manifest.to_json_pretty()?;
    std::fs::write(&manifest_path, json)
        .with_context(|| format!("failed to write manifest: {}", manifest_path.display()))?;

    tracing::info!(
        dir = %out_dir.display(),
        artifacts,
        manifest = %manifest_path.display(),
        "artifacts written"
    );

    Ok(EncodeSummary { files: manifest.files.len(), artifacts, skipped })
}

fn read_single(path: &Path) -> Result<SourceFile> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("input has no usable file name: {}", path.display()))?
        .to_string();
    Ok(SourceFile { source, bytes })
}

/// Every non-hidden regular file under `root`, identified by its
/// `/`-separated path relative to `root`, sorted.
pub fn collect_tree(root: &Path) -> Result<Vec<SourceFile>> {
    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    out.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<SourceFile>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list directory: {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let kind = entry
            .file_type()
            .with_context(|| format!("failed to stat: {}", path.display()))?;
        if kind.is_dir() {
            walk(root, &path, out)?;
        } else if kind.is_file() {
            let rel = path.strip_prefix(root).with_context(|| {
                format!("{} is outside {}", path.display(), root.display())
            })?;
            let source = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read input file: {}", path.display()))?;
            out.push(SourceFile { source, bytes });
        }
    }
    Ok(())
}
