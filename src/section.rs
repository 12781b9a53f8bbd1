// SPDX-License-Identifier: MIT OR Apache-2.0

//! Markdown section extraction.
//!
//! Finds the first heading whose title contains the requested section name and
//! collects the comparable lines underneath it, up to the next heading at the
//! same or a shallower depth.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid heading regex"));

/// One comparable line of a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionLine {
    /// Trimmed line text (never empty, never a fence or rule delimiter)
    pub text: String,
    /// 1-indexed line number in the source document
    pub source_line: usize,
}

/// A parsed markdown heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading<'a> {
    /// Number of leading `#` markers
    pub depth: usize,
    pub title: &'a str,
}

/// Parses a heading line, returning `None` for ordinary content.
pub fn parse_heading(line: &str) -> Option<Heading<'_>> {
    let caps = HEADING_RE.captures(line)?;
    let depth = caps.get(1)?.as_str().len();
    let title = caps.get(2)?.as_str().trim();
    Some(Heading { depth, title })
}

/// Code fence and horizontal rule delimiters carry no meaning of their own.
fn is_structural(trimmed: &str) -> bool {
    trimmed.starts_with("```") || trimmed.starts_with("---")
}

/// Extracts the comparable lines of `section_name` from `document`.
///
/// An empty result means no heading matched; callers must report that as a
/// missing section rather than as a section without content.
pub fn extract(document: &str, section_name: &str) -> Vec<SectionLine> {
    let mut lines = Vec::new();
    let mut open_depth: Option<usize> = None;

    for (idx, line) in document.lines().enumerate() {
        if let Some(heading) = parse_heading(line) {
            match open_depth {
                None if heading.title.contains(section_name) => {
                    open_depth = Some(heading.depth);
                    continue;
                }
                Some(depth) if heading.depth <= depth => break,
                _ => {}
            }
        }

        if open_depth.is_none() {
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || is_structural(trimmed) {
            continue;
        }

        lines.push(SectionLine {
            text: trimmed.to_string(),
            source_line: idx + 1,
        });
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Guide

Intro text.

## Rules

- Never rewrite entire sections at once.
- Keep entries short.

```bash
echo hi
```

---

### Rules detail

- Nested content stays in scope.

## Other

- Not part of rules.
";

    fn texts(lines: &[SectionLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_parse_heading() {
        let heading = parse_heading("### Grow-and-Refine Protocol  ").unwrap();
        assert_eq!(heading.depth, 3);
        assert_eq!(heading.title, "Grow-and-Refine Protocol");

        assert!(parse_heading("#hashtag").is_none());
        assert!(parse_heading("plain text").is_none());
        assert!(parse_heading("####### too deep").is_none());
    }

    #[test]
    fn test_extracts_section_until_sibling_heading() {
        let lines = extract(DOC, "Rules");
        assert_eq!(
            texts(&lines),
            vec![
                "- Never rewrite entire sections at once.",
                "- Keep entries short.",
                "echo hi",
                "### Rules detail",
                "- Nested content stays in scope.",
            ]
        );
    }

    #[test]
    fn test_line_numbers_are_one_based() {
        let lines = extract(DOC, "Rules");
        assert_eq!(lines[0].source_line, 7);
        assert_eq!(lines[1].source_line, 8);
    }

    #[test]
    fn test_partial_title_match() {
        let lines = extract("## Grow-and-Refine Protocol\nentry\n", "Refine");
        assert_eq!(texts(&lines), vec!["entry"]);
    }

    #[test]
    fn test_missing_section_is_empty() {
        assert!(extract(DOC, "Nope").is_empty());
        assert!(extract("", "Rules").is_empty());
    }

    #[test]
    fn test_shallower_heading_closes_section() {
        let doc = "## A\none\n# Top\ntwo\n";
        assert_eq!(texts(&extract(doc, "A")), vec!["one"]);
    }

    #[test]
    fn test_runs_to_end_of_document() {
        let doc = "# Top\n## Last\nalpha\n\n  beta  \n";
        let lines = extract(doc, "Last");
        assert_eq!(texts(&lines), vec!["alpha", "beta"]);
        assert_eq!(lines[1].source_line, 5);
    }

    #[test]
    fn test_crlf_documents() {
        let doc = "## Rules\r\nfirst\r\n\r\nsecond\r\n";
        assert_eq!(texts(&extract(doc, "Rules")), vec!["first", "second"]);
    }
}
