//! `zipqr.toml` configuration.

use anyhow::{Context, Result};
use qr_envelope::{CodecConfig, ErrorCorrection, DEFAULT_CHUNK_SIZE_BUDGET};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
    /// Maximum serialised envelope size in bytes. Keep it under the symbol
    /// capacity of the chosen error-correction level.
    #[serde(default = "AppConfig::default_chunk_size_budget")]
    pub chunk_size_budget: usize,
    /// One of "L", "M", "Q", "H".
    #[serde(default)]
    pub error_correction: ErrorCorrection,
    /// Write files with missing chunks omitted instead of refusing them.
    #[serde(default)]
    pub allow_partial_reconstruction: bool,
    /// Also rebuild files whose envelopes disagree on the chunk count.
    #[serde(default)]
    pub force_reconstruction: bool,
    /// Threads for splitting and artifact scanning.
    #[serde(default = "AppConfig::default_workers")]
    pub workers: usize,
    #[serde(default = "AppConfig::default_artifact_dir")]
    pub artifact_dir: String,
    #[serde(default = "AppConfig::default_output_dir")]
    pub output_dir: String,
}

impl AppConfig {
    fn default_chunk_size_budget() -> usize { DEFAULT_CHUNK_SIZE_BUDGET }
    fn default_workers() -> usize { 4 }
    fn default_artifact_dir() -> String { "images".into() }
    fn default_output_dir() -> String { "output".into() }

    /// Load `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn default_example() -> Self {
        Self::default()
    }

    pub fn codec(&self) -> CodecConfig {
        CodecConfig {
            chunk_size_budget: self.chunk_size_budget,
            error_correction: self.error_correction,
            allow_partial_reconstruction: self.allow_partial_reconstruction,
            force_reconstruction: self.force_reconstruction,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chunk_size_budget: Self::default_chunk_size_budget(),
            error_correction: ErrorCorrection::default(),
            allow_partial_reconstruction: false,
            force_reconstruction: false,
            workers: Self::default_workers(),
            artifact_dir: Self::default_artifact_dir(),
            output_dir: Self::default_output_dir(),
        }
    }
}
