//! zipqr: carry files through optical symbols.
//!
//! Encodes files into self-describing envelope artifacts and rebuilds them
//! from any scanned subset. Run `zipqr --help` for usage.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

mod cli;
mod color;
mod config;
mod decode;
mod diagnose;
mod encode;
mod logging;
mod scan;
mod verify;

use cli::{Cli, Commands};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.quiet { "warn" } else { cli.log_level.as_str() };
    logging::init(level, cli.log_file.as_deref())?;

    // Load config (except for `init` which doesn't need it)
    let config = match &cli.command {
        Commands::Init => config::AppConfig::default(),
        _ => config::AppConfig::load(&cli.config)?,
    };

    let ok = match cli.command {
        Commands::Init => {
            let example = config::AppConfig::default_example();
            print!("{}", toml::to_string_pretty(&example)?);
            true
        }
        Commands::Encode { input, output_dir, chunk_size, direct } => {
            encode::run(&config, &input, output_dir, chunk_size, direct)?;
            true
        }
        Commands::Decode { input_dir, output_dir, manifest, allow_partial, force } => {
            decode::run(
                &config,
                decode::DecodeArgs { input_dir, output_dir, manifest, allow_partial, force },
            )?
        }
        Commands::Diagnose { input_dir } => {
            diagnose::run(&input_dir, config.workers)?;
            true
        }
        Commands::Verify { file, manifest, source } => verify::run(&file, &manifest, source)?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
