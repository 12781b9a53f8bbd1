// SPDX-License-Identifier: MIT OR Apache-2.0

//! Show cached section embeddings

use anyhow::Result;
use serde::Serialize;

use crate::cli::OutputFormat;
use mddedup::config::Config;
use mddedup::embedding::{open_store, CacheEntrySummary, CacheStore};
use mddedup::output::{colorize_context, colorize_path, print_json, use_colors};
use mddedup::utils::find_workspace_root;

#[derive(Debug, Serialize)]
struct StatsReport {
    entries: usize,
    lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<u64>,
    sections: Vec<CacheEntrySummary>,
}

/// Run the cache-stats command
pub fn run(config: &Config, format: OutputFormat, compact: bool) -> Result<()> {
    let root = find_workspace_root(std::env::current_dir()?);
    let store = open_store(config.cache(), &root)?;

    let mut sections = store.entries()?;
    sections.sort_by(|a, b| {
        (a.key.document.as_str(), a.key.section.as_str())
            .cmp(&(b.key.document.as_str(), b.key.section.as_str()))
    });

    let lines = sections.iter().map(|s| s.line_count).sum();
    let bytes = sections
        .iter()
        .map(|s| s.bytes)
        .sum::<Option<u64>>()
        .filter(|_| !sections.is_empty());

    match format {
        OutputFormat::Json => print_json(
            &StatsReport {
                entries: sections.len(),
                lines,
                bytes,
                sections,
            },
            compact,
        )?,
        OutputFormat::Text => {
            let use_color = use_colors();
            if sections.is_empty() {
                println!("Cache is empty");
                return Ok(());
            }
            for s in &sections {
                println!(
                    "{}  \"{}\"  {} lines  {}",
                    colorize_path(&s.key.document, use_color),
                    s.key.section,
                    s.line_count,
                    colorize_context(&s.provider, use_color)
                );
            }
            let size = bytes.map(|b| format!(", {} bytes", b)).unwrap_or_default();
            println!("{} sections, {} lines{}", sections.len(), lines, size);
        }
    }

    Ok(())
}
