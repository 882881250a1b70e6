//! Email body normalization.
//!
//! Two formatting paths feed the notification pipeline:
//! - `normalize_body`: aggressive cleanup for summarization (one clean line
//!   per original line, no blanks).
//! - `format_full_body`: paragraph-preserving cleanup for the "see full
//!   email" view.
//!
//! Both are pure functions and idempotent on their own output.

/// Fixed entity table decoded after tag stripping. Tag stripping is a simple
/// scanner, so entities survive it and are handled here.
const HTML_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
];

/// Remove everything between `<` and `>`. Not an HTML parser; malformed
/// markup degrades to dropped text rather than an error.
pub fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

pub fn decode_html_entities(input: &str) -> String {
    let mut out = input.to_string();
    for (entity, replacement) in HTML_ENTITIES {
        if out.contains(entity) {
            out = out.replace(entity, replacement);
        }
    }
    out
}

fn normalize_newlines(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn collapse_horizontal_whitespace(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_gap = false;
    for ch in line.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_gap {
                out.push(' ');
            }
            in_gap = true;
        } else {
            out.push(ch);
            in_gap = false;
        }
    }
    out.trim().to_string()
}

/// Aggressive normalization used before summarization: decoded entities,
/// single newline convention, collapsed horizontal whitespace, trimmed
/// lines, empty lines dropped.
pub fn normalize_body(content: &str) -> String {
    let decoded = decode_html_entities(content);
    normalize_newlines(&decoded)
        .lines()
        .map(collapse_horizontal_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Less aggressive formatting for the full-email view: keeps paragraph
/// structure, collapsing any run of blank lines to exactly one blank line.
pub fn format_full_body(content: &str) -> String {
    let decoded = decode_html_entities(content);
    let normalized = normalize_newlines(&decoded);

    let mut out: Vec<String> = Vec::new();
    let mut blank_pending = false;
    for line in normalized.lines() {
        let line = collapse_horizontal_whitespace(line);
        if line.is_empty() {
            blank_pending = !out.is_empty();
        } else {
            if blank_pending {
                out.push(String::new());
                blank_pending = false;
            }
            out.push(line);
        }
    }
    out.join("\n")
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Truncate to at most `max_len` bytes on a char boundary, appending
/// `suffix` when anything was cut.
pub fn truncate_with_marker(input: &str, max_len: usize, suffix: &str) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut end = max_len.saturating_sub(suffix.len());
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &input[..end], suffix)
}
