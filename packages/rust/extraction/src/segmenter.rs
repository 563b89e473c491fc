//! Token-budgeted document segmentation.
//!
//! A document within budget is one segment. Anything larger is cut into
//! overlapping windows, each ending on the best nearby boundary: a paragraph
//! break, then a sentence end, then a line break, then any whitespace.

use std::ops::Range;

use paperconcepts_shared::SegmenterConfig;

/// A bounded span of document text submitted to the model in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position in the document's segment sequence, from 0.
    pub index: u32,
    pub text: String,
    /// Byte range of `text` in the source document.
    pub range: Range<usize>,
    /// The document was split; this segment covers only part of it.
    pub is_partial: bool,
}

/// Splits documents into segments that fit the token budget.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    /// Cheap deterministic token estimate: characters over characters-per-token,
    /// rounded up.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        let chars = text.chars().count();
        (chars as f64 / self.chars_per_token()).ceil() as usize
    }

    fn chars_per_token(&self) -> f64 {
        if self.config.chars_per_token > 0.0 {
            self.config.chars_per_token
        } else {
            4.0
        }
    }

    /// Lazily segment `text`. Empty or whitespace-only text yields nothing.
    pub fn segments<'a>(&self, text: &'a str) -> Segments<'a> {
        let estimate = self.estimate_tokens(text);
        let single = estimate <= self.config.max_tokens.max(1)
            || estimate <= self.config.overlap_tokens;

        let cpt = self.chars_per_token();
        let window = ((self.config.max_tokens.max(1) as f64 * cpt).floor() as usize).max(1);
        let overlap = ((self.config.overlap_tokens as f64 * cpt).floor() as usize).min(window / 2);

        Segments {
            text,
            next_start: (!text.trim().is_empty()).then_some(0),
            index: 0,
            single,
            window,
            overlap,
        }
    }
}

/// Iterator over the segments of one document.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    text: &'a str,
    next_start: Option<usize>,
    index: u32,
    single: bool,
    /// Window size in characters.
    window: usize,
    /// Overlap in characters, at most half a window.
    overlap: usize,
}

impl Iterator for Segments<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let start = self.next_start?;
        let text = self.text;

        let end = if self.single {
            text.len()
        } else {
            let hard_end = advance_chars(text, start, self.window);
            if hard_end >= text.len() {
                text.len()
            } else {
                let min_len = (self.window / 2).max(self.overlap + 1);
                let min_end = advance_chars(text, start, min_len);
                snap_end(text, min_end, hard_end)
            }
        };

        self.next_start = if end >= text.len() {
            None
        } else {
            Some(overlap_start(text, start, end, self.overlap))
        };

        let segment = Segment {
            index: self.index,
            text: text[start..end].to_string(),
            range: start..end,
            is_partial: !self.single,
        };
        self.index += 1;
        Some(segment)
    }
}

/// Byte offset `n` characters after `from`, or the end of `text`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map_or(text.len(), |(i, _)| from + i)
}

/// Pick a window end in `(min_end, hard_end]`, preferring the strongest
/// boundary. Falls back to `hard_end` when the window has no whitespace.
fn snap_end(text: &str, min_end: usize, hard_end: usize) -> usize {
    let zone = &text[min_end..hard_end];

    if let Some(pos) = zone.rfind("\n\n") {
        return min_end + pos + 2;
    }

    let sentence_end = zone
        .char_indices()
        .zip(zone.char_indices().skip(1))
        .filter(|((_, c), (_, next))| matches!(c, '.' | '?' | '!') && next.is_whitespace())
        .map(|(_, (i, next))| i + next.len_utf8())
        .last();
    if let Some(pos) = sentence_end {
        return min_end + pos;
    }

    if let Some(pos) = zone.rfind('\n') {
        return min_end + pos + 1;
    }

    if let Some((pos, c)) = zone.char_indices().filter(|(_, c)| c.is_whitespace()).last() {
        return min_end + pos + c.len_utf8();
    }

    hard_end
}

/// Start of the next window: `overlap` characters before `end`, moved
/// forward to the start of a word. Always past `start` so iteration ends.
fn overlap_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }

    let back = text[start..end]
        .char_indices()
        .rev()
        .nth(overlap - 1)
        .map_or(start, |(i, _)| start + i);

    // Skip the rest of a word cut in half, then the whitespace after it.
    let mut candidate = back;
    let at_word_start = back == 0
        || text[..back]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
    if !at_word_start {
        if let Some(ws) = text[back..end].find(char::is_whitespace) {
            candidate = back + ws;
        }
    }
    while candidate < end {
        match text[candidate..].chars().next() {
            Some(c) if c.is_whitespace() => candidate += c.len_utf8(),
            _ => break,
        }
    }

    if candidate <= start || candidate >= end {
        if back > start { back } else { end }
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(max_tokens: usize, overlap_tokens: usize) -> Segmenter {
        Segmenter::new(SegmenterConfig {
            max_tokens,
            overlap_tokens,
            chars_per_token: 4.0,
        })
    }

    /// Rebuild the document from segment ranges, dropping the overlap.
    fn reconstruct(text: &str, segments: &[Segment]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for seg in segments {
            assert!(seg.range.start <= covered, "gap before segment {}", seg.index);
            assert_eq!(seg.text, &text[seg.range.clone()]);
            out.push_str(&text[covered..seg.range.end]);
            covered = seg.range.end;
        }
        out
    }

    fn sample_document(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| {
                format!(
                    "Question {i}. Explain how a Turing machine with {i} states decides a language. \
                     Discuss TCP congestion control and the sliding window protocol in detail."
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn estimate_rounds_up() {
        let s = segmenter(10, 2);
        assert_eq!(s.estimate_tokens(""), 0);
        assert_eq!(s.estimate_tokens("abcd"), 1);
        assert_eq!(s.estimate_tokens("abcde"), 2);
        assert_eq!(s.estimate_tokens("éééé"), 1);
    }

    #[test]
    fn within_budget_is_one_whole_segment() {
        let text = "  A short paper about Turing machines.\n";
        let segments: Vec<_> = segmenter(100, 10).segments(text).collect();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, text);
        assert_eq!(segments[0].index, 0);
        assert!(!segments[0].is_partial);
    }

    #[test]
    fn empty_and_blank_documents_yield_nothing() {
        assert_eq!(segmenter(10, 2).segments("").count(), 0);
        assert_eq!(segmenter(10, 2).segments(" \n\t ").count(), 0);
    }

    #[test]
    fn long_document_splits_with_overlap() {
        let text = sample_document(12);
        let s = segmenter(100, 10);
        let segments: Vec<_> = s.segments(&text).collect();

        assert!(segments.len() > 1);
        for (i, seg) in segments.iter().enumerate() {
            assert_eq!(seg.index as usize, i);
            assert!(seg.is_partial);
            assert!(s.estimate_tokens(&seg.text) <= 100, "segment {i} over budget");
        }
        for pair in segments.windows(2) {
            assert!(pair[1].range.start < pair[0].range.end, "windows overlap");
            assert!(pair[1].range.start > pair[0].range.start, "progress");
        }
        assert_eq!(reconstruct(&text, &segments), text);
    }

    #[test]
    fn windows_end_on_paragraph_breaks_when_possible() {
        let text = sample_document(8);
        let segments: Vec<_> = segmenter(100, 10).segments(&text).collect();
        for seg in &segments[..segments.len() - 1] {
            assert!(seg.text.ends_with("\n\n"), "segment {} not snapped", seg.index);
        }
    }

    #[test]
    fn falls_back_to_hard_cuts_without_whitespace() {
        let text = "x".repeat(1000);
        let s = segmenter(50, 5);
        let segments: Vec<_> = s.segments(&text).collect();
        assert!(segments.len() >= 5);
        assert!(segments.iter().all(|seg| seg.text.chars().count() <= 200));
        assert_eq!(reconstruct(&text, &segments), text);
    }

    #[test]
    fn multibyte_text_stays_on_char_boundaries() {
        let text = "Überblick über Zustandsautomaten und Grammatiken. ".repeat(40);
        let segments: Vec<_> = segmenter(60, 8).segments(&text).collect();
        assert!(segments.len() > 1);
        assert_eq!(reconstruct(&text, &segments), text);
    }

    #[test]
    fn zero_overlap_windows_are_disjoint() {
        let text = sample_document(10);
        let segments: Vec<_> = segmenter(80, 0).segments(&text).collect();
        for pair in segments.windows(2) {
            assert_eq!(pair[1].range.start, pair[0].range.end);
        }
        assert_eq!(reconstruct(&text, &segments), text);
    }

    #[test]
    fn iteration_is_lazy() {
        let text = sample_document(50);
        let mut iter = segmenter(100, 10).segments(&text);
        let first = iter.next().expect("first segment");
        assert_eq!(first.index, 0);
        assert!(first.range.end < text.len());
    }
}
