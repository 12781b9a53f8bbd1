// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// mddedup - Semantic deduplication for markdown knowledge documents
///
/// Checks whether a new entry already exists, verbatim or paraphrased, in a
/// section of a markdown document before it gets appended.
#[derive(Parser, Debug)]
#[command(name = "mddedup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check whether text already exists in a document section
    #[command(alias = "c")]
    Check {
        /// Candidate text to look for
        text: String,

        /// Markdown document (defaults to `dedup.default_file` in config)
        file: Option<String>,

        /// Section heading (defaults to `dedup.default_section` in config)
        section: Option<String>,

        /// Maximum characters of matched text to show per result
        #[arg(long, default_value = "80")]
        max_chars: usize,
    },

    /// Remove cached section embeddings
    #[command(name = "clear-cache")]
    ClearCache {
        /// Only clear entries for this document
        #[arg(long)]
        file: Option<String>,

        /// Only clear this section (requires --file)
        #[arg(long, requires = "file")]
        section: Option<String>,
    },

    /// Show cached section embeddings
    #[command(name = "cache-stats")]
    CacheStats,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
