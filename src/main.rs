// SPDX-License-Identifier: MIT OR Apache-2.0

//! mddedup - Semantic deduplication for markdown knowledge documents
//!
//! Checks a candidate entry against a document section in two stages: a
//! verbatim substring match, then embedding similarity against the
//! section's lines with a persistent per-section vector cache.

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands, OutputFormat};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    // Initialize tracing with MDDEDUP_LOG env var (e.g., MDDEDUP_LOG=debug mddedup check "text")
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MDDEDUP_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = mddedup::config::Config::load();
    let format = cli.format.unwrap_or(if config.wants_json() {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    });
    let compact = cli.compact;

    match cli.command {
        Commands::Check {
            text,
            file,
            section,
            max_chars,
        } => {
            let args = commands::check::CheckArgs {
                text: &text,
                file: file.as_deref(),
                section: section.as_deref(),
                max_chars,
            };
            return commands::check::run(args, &config, format, compact);
        }
        Commands::ClearCache { file, section } => {
            commands::clear_cache::run(
                file.as_deref(),
                section.as_deref(),
                &config,
                format,
                compact,
            )?;
        }
        Commands::CacheStats => {
            commands::cache_stats::run(&config, format, compact)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "mddedup", &mut std::io::stdout());
        }
    }

    Ok(ExitCode::SUCCESS)
}
