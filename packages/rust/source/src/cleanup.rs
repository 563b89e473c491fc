//! Cleanup passes for extracted page text.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on one page of extracted text.
pub(crate) fn clean_page(raw: &str) -> String {
    let mut result = raw.replace("\r\n", "\n").replace('\r', "\n");

    result = strip_trailing_whitespace(&result);
    result = remove_page_numbers(&result);
    result = clean_blank_lines(&result);

    result.trim().to_string()
}

/// Count characters that carry text.
pub(crate) fn visible_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

// ---------------------------------------------------------------------------
// Pass 1: Trailing whitespace
// ---------------------------------------------------------------------------

fn strip_trailing_whitespace(text: &str) -> String {
    text.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Bare page-number lines
// ---------------------------------------------------------------------------

/// Drop lines holding nothing but a page number (`7`, `- 7 -`, `Page 7 of 12`).
fn remove_page_numbers(text: &str) -> String {
    static PAGE_NUM_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?mi)^[ \t]*(?:-[ \t]*)?(?:page[ \t]+)?\d{1,3}(?:[ \t]*(?:of|/)[ \t]*\d{1,3})?(?:[ \t]*-)?[ \t]*$\n?")
            .expect("valid regex")
    });

    PAGE_NUM_RE.replace_all(text, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into exactly 2.
fn clean_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n\n").to_string()
}
