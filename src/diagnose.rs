//! `zipqr diagnose`: per-file chunk coverage of an artifact directory.
//!
//! Scans and collects exactly like `decode` but rebuilds nothing, so it is
//! safe to run repeatedly while symbols are still being captured.

use anyhow::Result;
use qr_envelope::{ChunkCollector, CollectorStats, SymbolEncoder, TextSymbolCodec};
use std::fmt::Write as _;
use std::path::Path;

use crate::color;
use crate::scan::{scan_dir, ScanStats};

const WIDTH: usize = 80;
const MAX_LISTED_MISSING: usize = 12;

pub fn run(input_dir: &Path, workers: usize) -> Result<()> {
    let symbols = TextSymbolCodec::default();
    let collector = ChunkCollector::new();
    let scan = scan_dir(input_dir, symbols.extension(), &symbols, workers, &collector)?;
    print!("{}", render(input_dir, &scan, &collector.statistics()));
    Ok(())
}

fn missing_list(missing: &[u32]) -> String {
    if missing.is_empty() {
        return "—".into();
    }
    let mut s = missing
        .iter()
        .take(MAX_LISTED_MISSING)
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    if missing.len() > MAX_LISTED_MISSING {
        let _ = write!(s, " (+{} more)", missing.len() - MAX_LISTED_MISSING);
    }
    s
}

pub fn render(dir: &Path, scan: &ScanStats, stats: &CollectorStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", color::bold(&"=".repeat(WIDTH)));
    let _ = writeln!(
        out,
        "{}",
        color::bold_cyan(&format!("{:^WIDTH$}", format!(" ZIPQR DIAGNOSE  {} ", dir.display())))
    );
    let _ = writeln!(out, "{}", color::bold(&"=".repeat(WIDTH)));
    let _ = writeln!(
        out,
        "{}",
        color::dim(&format!(
            "  Artifacts: {} scanned, {} accepted ({} duplicate), {} unreadable, {} malformed, {} conflicting",
            scan.scanned, scan.accepted, scan.duplicates, scan.unreadable, scan.malformed, scan.conflicting
        ))
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{}",
        color::bold(&format!("{:<36}  {:<12}  {:>11}  {}", "FILE", "STATUS", "FOUND/TOTAL", "MISSING"))
    );
    let _ = writeln!(out, "{}", color::dim(&"-".repeat(WIDTH)));

    for (source, fs) in &stats.files {
        let _ = writeln!(
            out,
            "{:<36}  {}  {:>11}  {}",
            source,
            color::rpad(&color::coverage(fs.complete, fs.consistent), 12),
            format!("{}/{}", fs.found, fs.total),
            missing_list(&fs.missing)
        );
    }

    let _ = writeln!(out, "{}", color::dim(&"-".repeat(WIDTH)));
    let incomplete = stats.incomplete_files().count();
    let inconsistent = stats.inconsistent_files().count();
    let summary = format!(
        "  {} file(s): {} complete, {} incomplete, {} inconsistent",
        stats.total_files, stats.complete_files, incomplete, inconsistent
    );
    let summary = if stats.total_files > 0 && stats.complete_files == stats.total_files {
        color::green(&summary)
    } else if stats.complete_files == 0 {
        color::red(&summary)
    } else {
        color::yellow(&summary)
    };
    let _ = writeln!(out, "{}", summary);
    out
}
