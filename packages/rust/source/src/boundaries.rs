//! Question heading detection.

use std::sync::LazyLock;

use regex::Regex;

use crate::{BoundaryKind, TextBoundary};

/// Find question headings and return one boundary per question, running
/// from its heading to the next heading (or the end of the text).
///
/// Explicit headings (`Question 3`, `Q3.`) win; bare numbered lines (`3.`)
/// are only used when a document has no explicit heading, and only while the
/// numbers keep increasing.
pub fn detect_questions(text: &str) -> Vec<TextBoundary> {
    static EXPLICIT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?mi)^[ \t]*(?:question[ \t]+(\d{1,2})\b|q\.?[ \t]*(\d{1,2})[.):])")
            .expect("valid regex")
    });
    static BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^[ \t]*(\d{1,2})[.)][ \t]+\S").expect("valid regex")
    });

    let mut starts: Vec<(usize, u32)> = EXPLICIT_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let number = caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()?;
            Some((start, number))
        })
        .collect();

    if starts.is_empty() {
        let mut last = 0;
        for caps in BARE_RE.captures_iter(text) {
            let (Some(whole), Some(num)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Ok(number) = num.as_str().parse::<u32>() else {
                continue;
            };
            if number > last {
                starts.push((whole.start(), number));
                last = number;
            }
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &(start, number))| {
            let end = starts.get(i + 1).map_or(text.len(), |&(next, _)| next);
            TextBoundary {
                label: question_label(number),
                range: start..end,
                kind: BoundaryKind::Question,
            }
        })
        .filter(|b| !b.range.is_empty())
        .collect()
}

/// `q` followed by the zero-padded question number, matching the labels
/// derived from solution filenames.
pub(crate) fn question_label(number: u32) -> String {
    format!("q{number:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_headings() {
        let text = "Intro\nQuestion 1\nfoo\n  Q2. bar\nq10: baz";
        let found = detect_questions(text);
        let labels: Vec<_> = found.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["q01", "q02", "q10"]);
        assert_eq!(found[0].range.start, text.find("Question").unwrap());
        assert_eq!(found[0].range.end, found[1].range.start);
        assert_eq!(found[2].range.end, text.len());
    }

    #[test]
    fn bare_numbers_only_without_explicit_headings() {
        let text = "1. First question\n  a) part\n2. Second\n1. list item\n3. Third";
        let labels: Vec<_> = detect_questions(text)
            .into_iter()
            .map(|b| b.label)
            .collect();
        assert_eq!(labels, vec!["q01", "q02", "q03"]);

        let mixed = "Question 4\n1. step one\n2. step two";
        let labels: Vec<_> = detect_questions(mixed).into_iter().map(|b| b.label).collect();
        assert_eq!(labels, vec!["q04"]);
    }

    #[test]
    fn no_headings() {
        assert!(detect_questions("Plain prose with 3 numbers.").is_empty());
        assert!(detect_questions("").is_empty());
    }
}
