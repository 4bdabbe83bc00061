//! Tracing setup: stderr always, plus an optional plain-text log file.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(level.parse()?);
    let file_layer = match log_file {
        Some(path) => Some(fmt::layer().with_ansi(false).with_writer(open_log_file(path)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// Open `path` for appending, creating it and its parent directories.
pub fn open_log_file(path: &Path) -> Result<Mutex<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file: {}", path.display()))?;
    Ok(Mutex::new(file))
}
