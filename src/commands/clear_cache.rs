// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remove cached section embeddings

use anyhow::Result;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::commands::from_cwd;
use mddedup::config::Config;
use mddedup::embedding::{open_store, CacheKey, ClearScope, VectorCache};
use mddedup::output::{colorize_context, print_json, use_colors};
use mddedup::utils::{document_identity, find_workspace_root, resolve_in_workspace};

#[derive(Debug, Serialize)]
struct ClearReport {
    removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<String>,
}

/// Run the clear-cache command
pub fn run(
    file: Option<&str>,
    section: Option<&str>,
    config: &Config,
    format: OutputFormat,
    compact: bool,
) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let root = find_workspace_root(&cwd);

    let document = match file {
        Some(file) => {
            let resolved = resolve_in_workspace(&root, &from_cwd(&cwd, file))?;
            Some(document_identity(&root, &resolved))
        }
        None => None,
    };

    let scope = match (&document, section) {
        (Some(document), Some(section)) => ClearScope::Section(CacheKey::new(document, section)),
        (Some(document), None) => ClearScope::Document(document.clone()),
        (None, _) => ClearScope::All,
    };

    let mut cache = VectorCache::new(open_store(config.cache(), &root)?);
    let removed = cache.clear(&scope)?;
    tracing::debug!(removed, ?scope, "cache cleared");

    match format {
        OutputFormat::Json => print_json(
            &ClearReport {
                removed,
                document,
                section: section.map(str::to_string),
            },
            compact,
        )?,
        OutputFormat::Text => {
            let noun = if removed == 1 { "entry" } else { "entries" };
            println!(
                "Cleared {} cached {}{}",
                removed,
                noun,
                colorize_context(&describe(&scope), use_colors())
            );
        }
    }

    Ok(())
}

fn describe(scope: &ClearScope) -> String {
    match scope {
        ClearScope::All => String::new(),
        ClearScope::Document(document) => format!(" for {}", document),
        ClearScope::Section(key) => format!(" for {} \"{}\"", key.document, key.section),
    }
}
