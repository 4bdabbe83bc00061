//! CLI definitions for zipqr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "zipqr",
    version,
    about = "Carry files through optical symbols\n\nSplits files into self-describing envelopes, one per symbol, and rebuilds them from whatever subset of symbols is scanned back, in any order.",
    long_about = None
)]
pub struct Cli {
    /// Path to zipqr.toml config file
    #[clap(long, short, default_value = "zipqr.toml")]
    pub config: PathBuf,

    /// Log filter directive (e.g. "debug", "qr_envelope=trace")
    #[clap(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Only log warnings and errors
    #[clap(long, short, global = true)]
    pub quiet: bool,

    /// Also append log lines to this file, without colors
    #[clap(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split a file or a directory tree into symbol artifacts plus manifest.json
    Encode {
        /// File (direct mode) or directory to encode
        #[clap(long, short)]
        input: PathBuf,

        /// Where to write artifacts (default: artifact_dir from config)
        #[clap(long, short)]
        output_dir: Option<PathBuf>,

        /// Maximum serialised envelope size in bytes
        #[clap(long)]
        chunk_size: Option<usize>,

        /// Require direct mode (input must be a single file)
        #[clap(long)]
        direct: bool,
    },

    /// Rebuild files from a directory of scanned artifacts
    Decode {
        /// Directory holding the artifacts
        #[clap(long, short)]
        input_dir: PathBuf,

        /// Where to write rebuilt files (default: output_dir from config)
        #[clap(long, short)]
        output_dir: Option<PathBuf>,

        /// Manifest to cross-check against (default: <input-dir>/manifest.json if present)
        #[clap(long, short)]
        manifest: Option<PathBuf>,

        /// Write files with missing chunks omitted
        #[clap(long)]
        allow_partial: bool,

        /// Also rebuild files whose envelopes disagree on the chunk count
        #[clap(long)]
        force: bool,
    },

    /// Report per-file chunk coverage without rebuilding anything
    Diagnose {
        #[clap(long, short)]
        input_dir: PathBuf,
    },

    /// Check a rebuilt file against its manifest fingerprint
    Verify {
        #[clap(long, short)]
        file: PathBuf,

        #[clap(long, short)]
        manifest: PathBuf,

        /// Manifest identifier of the file (default: the file's name)
        #[clap(long, short)]
        source: Option<String>,
    },

    /// Print an example zipqr.toml to stdout
    Init,
}
