// SPDX-License-Identifier: MIT OR Apache-2.0

//! Check whether candidate text already exists in a document section

use anyhow::{Context, Result};
use serde::Serialize;
use std::process::ExitCode;

use crate::cli::OutputFormat;
use crate::commands::from_cwd;
use mddedup::config::Config;
use mddedup::embedding::{create_provider, open_store};
use mddedup::output::{
    colorize_context, colorize_line_num, colorize_path, colorize_tier, print_json, round3,
    truncate_display, use_colors,
};
use mddedup::utils::find_workspace_root;
use mddedup::{DedupEngine, DedupSettings, Evaluation};

/// Exit code when the requested section does not exist
const SECTION_NOT_FOUND_EXIT: u8 = 2;

/// Check result for JSON output
#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    text: &'a str,
    file: &'a str,
    section: &'a str,
    stage: u8,
    recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_similarity: Option<f64>,
    matches: Vec<MatchReport>,
}

#[derive(Debug, Serialize)]
struct MatchReport {
    line: usize,
    similarity: f64,
    tier: String,
    text: String,
}

pub struct CheckArgs<'a> {
    pub text: &'a str,
    pub file: Option<&'a str>,
    pub section: Option<&'a str>,
    pub max_chars: usize,
}

/// Run the check command
pub fn run(
    args: CheckArgs<'_>,
    config: &Config,
    format: OutputFormat,
    compact: bool,
) -> Result<ExitCode> {
    let dedup = config.dedup();
    let file = args
        .file
        .or(dedup.default_file.as_deref())
        .context("no document given and dedup.default_file is not configured")?;
    let section = args
        .section
        .or(dedup.default_section.as_deref())
        .context("no section given and dedup.default_section is not configured")?;

    let cwd = std::env::current_dir()?;
    let root = find_workspace_root(&cwd);
    tracing::debug!(root = %root.display(), file, section, "checking");

    let settings = DedupSettings {
        thresholds: dedup.thresholds()?,
        max_matches: dedup.max_matches(),
    };
    let provider = create_provider(config.embeddings())?;
    let store = open_store(config.cache(), &root)?;
    let mut engine = DedupEngine::with_settings(provider, store, settings);

    let evaluation = engine.evaluate_file(args.text, &root, &from_cwd(&cwd, file), section)?;

    match format {
        OutputFormat::Json => {
            let report = build_report(&args, file, section, &evaluation);
            print_json(&report, compact)?;
        }
        OutputFormat::Text => print_text(&args, file, section, &evaluation),
    }

    if matches!(evaluation, Evaluation::SectionNotFound { .. }) {
        return Ok(ExitCode::from(SECTION_NOT_FOUND_EXIT));
    }
    Ok(ExitCode::SUCCESS)
}

fn build_report<'a>(
    args: &CheckArgs<'a>,
    file: &'a str,
    section: &'a str,
    evaluation: &Evaluation,
) -> CheckReport<'a> {
    let mut report = CheckReport {
        text: args.text,
        file,
        section,
        stage: evaluation.stage(),
        recommendation: evaluation.recommendation(),
        line: None,
        max_similarity: None,
        matches: Vec::new(),
    };

    match evaluation {
        Evaluation::ExactMatch { line } => report.line = Some(*line),
        Evaluation::SectionNotFound { .. } => {}
        Evaluation::NoSimilarContent { max_similarity } => {
            report.max_similarity = Some(round3(*max_similarity));
        }
        Evaluation::Matches {
            max_similarity,
            matches,
            ..
        } => {
            report.max_similarity = Some(round3(*max_similarity));
            report.matches = matches
                .iter()
                .map(|m| MatchReport {
                    line: m.line.source_line,
                    similarity: round3(m.line.similarity),
                    tier: m.tier.to_string(),
                    text: truncate_display(&m.line.text, args.max_chars),
                })
                .collect();
        }
    }

    report
}

fn print_text(args: &CheckArgs<'_>, file: &str, section: &str, evaluation: &Evaluation) {
    let use_color = use_colors();
    let label = colorize_tier(
        &evaluation.recommendation(),
        evaluation.verdict(),
        use_color,
    );

    match evaluation {
        Evaluation::ExactMatch { line } => {
            println!(
                "{}  {}:{}",
                label,
                colorize_path(file, use_color),
                colorize_line_num(*line, use_color)
            );
        }
        Evaluation::SectionNotFound { section } => {
            println!(
                "{}  section \"{}\" not found in {}",
                label,
                section,
                colorize_path(file, use_color)
            );
        }
        Evaluation::NoSimilarContent { max_similarity } => {
            println!(
                "{}  {}",
                label,
                colorize_context(
                    &format!("max similarity {:.3} in \"{}\"", max_similarity, section),
                    use_color
                )
            );
        }
        Evaluation::Matches {
            max_similarity,
            matches,
            ..
        } => {
            println!(
                "{}  {}",
                label,
                colorize_context(
                    &format!("max similarity {:.3} in \"{}\"", max_similarity, section),
                    use_color
                )
            );
            for m in matches {
                println!(
                    "  {}:{}  {:.3}  {}  {}",
                    colorize_path(file, use_color),
                    colorize_line_num(m.line.source_line, use_color),
                    m.line.similarity,
                    colorize_tier(&m.tier.to_string(), Some(m.tier), use_color),
                    truncate_display(&m.line.text, args.max_chars)
                );
            }
        }
    }
}
