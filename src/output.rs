//! Output and color utilities for consistent terminal formatting
//!
//! Provides shared color functions respecting NO_COLOR environment variable.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use crate::engine::Tier;

/// Check if colors should be used (respects NO_COLOR env var)
pub fn use_colors() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Print a value as JSON (pretty unless `compact`)
pub fn print_json<T: Serialize + ?Sized>(value: &T, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", json);
    Ok(())
}

/// Round a similarity to 3 decimals for display
pub fn round3(value: f32) -> f64 {
    (value as f64 * 1000.0).round() / 1000.0
}

/// Truncate text to `max_chars` characters, appending `...` when cut
pub fn truncate_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// Colorize file path (cyan)
pub fn colorize_path(text: &str, use_color: bool) -> String {
    if use_color {
        text.cyan().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize line number (yellow)
pub fn colorize_line_num(num: usize, use_color: bool) -> String {
    if use_color {
        num.to_string().yellow().to_string()
    } else {
        num.to_string()
    }
}

/// Colorize a tier label (red for duplicate, yellow for related, green otherwise)
pub fn colorize_tier(label: &str, tier: Option<Tier>, use_color: bool) -> String {
    if !use_color {
        return label.to_string();
    }
    match tier {
        Some(Tier::Duplicate) => label.red().bold().to_string(),
        Some(Tier::Related) => label.yellow().bold().to_string(),
        Some(Tier::Different) => label.green().bold().to_string(),
        None => label.magenta().bold().to_string(),
    }
}

/// Colorize secondary text (dimmed)
pub fn colorize_context(text: &str, use_color: bool) -> String {
    if use_color {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.123456), 0.123);
        assert_eq!(round3(0.85561), 0.856);
    }

    #[test]
    fn test_truncate_display() {
        assert_eq!(truncate_display("short", 80), "short");
        assert_eq!(truncate_display("abcdef", 3), "abc...");
        assert_eq!(truncate_display("héllo", 2), "hé...");
    }

    #[test]
    fn test_colors_disabled() {
        assert_eq!(colorize_tier("RELATED", Some(Tier::Related), false), "RELATED");
        assert_eq!(colorize_path("a.md", false), "a.md");
    }
}
