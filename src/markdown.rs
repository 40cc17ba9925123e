//! Markdown export of parsed pages.
//!
//! Blocks render in reading order and are separated by a blank line:
//! headings get `#`×level, images become a link to their medium followed by
//! the caption, everything else is emitted verbatim. Table blocks are
//! repaired (missing header separator, stray body separators) since models
//! produce both. The joined text is then normalised with a few
//! deterministic passes.

use crate::model::{ContentElement, DocumentPage, ParsedDocument};
use once_cell::sync::Lazy;
use regex::Regex;

/// Markdown for one block.
pub fn element_to_markdown(element: &ContentElement) -> String {
    match element {
        ContentElement::Heading {
            content,
            heading_level,
        } => {
            let level = (*heading_level).clamp(1, 6) as usize;
            format!("{} {}", "#".repeat(level), content.trim())
        }
        ContentElement::Image { content, medium_id } => match medium_id {
            Some(id) => format!("![Image](/{id})\n\nCaption: {}", content.trim()),
            None => format!("Caption: {}", content.trim()),
        },
        ContentElement::Table { content } => {
            remove_mid_table_separators(&fix_broken_tables(content.trim()))
        }
        other => other.content().trim().to_string(),
    }
}

/// Markdown for one page, not yet normalised.
fn page_body(page: &DocumentPage) -> String {
    page.content
        .iter()
        .map(element_to_markdown)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Markdown for a single page.
pub fn page_to_markdown(page: &DocumentPage) -> String {
    clean_markdown(&page_body(page))
}

/// Markdown for a whole document, pages in order.
pub fn to_markdown(doc: &ParsedDocument) -> String {
    let body = doc
        .content
        .iter()
        .map(page_body)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    clean_markdown(&body)
}

/// Normalisation passes, in order: line endings, trailing whitespace,
/// invisible characters, blank-line runs, final newline.
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = remove_invisible_chars(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").into_owned()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Table repair ─────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

/// Insert a separator after the header row when the model left it out.
fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 1);
    let mut prev_is_row = false;
    for (i, line) in lines.iter().enumerate() {
        out.push(line.to_string());
        let is_header = is_table_row(line) && !is_separator_row(line) && !prev_is_row;
        prev_is_row = is_table_row(line);
        if !is_header {
            continue;
        }
        let next = lines.get(i + 1).copied().unwrap_or("");
        if is_table_row(next) && !is_separator_row(next) {
            let cols = line.trim().matches('|').count().saturating_sub(1).max(1);
            let sep: String = std::iter::once("|")
                .chain(std::iter::repeat_n(" --- |", cols))
                .collect();
            out.push(sep);
        }
    }
    out.join("\n")
}

/// Keep only the separator in second position of each table.
fn remove_mid_table_separators(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut row = 0usize;
    for line in input.lines() {
        if is_table_row(line) {
            row += 1;
            if is_separator_row(line) && row != 2 {
                continue;
            }
        } else {
            row = 0;
        }
        out.push(line);
    }
    out.join("\n")
}
