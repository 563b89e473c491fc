//! Name similarity strategies for fuzzy concept matching.

use std::collections::BTreeSet;
use std::sync::Arc;

use paperconcepts_shared::SimilarityKind;

/// Scores how alike two canonical names are, from 0.0 (unrelated) to 1.0
/// (identical).
pub trait NameSimilarity: Send + Sync + std::fmt::Debug {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// The strategy configured by `kind`.
pub fn similarity_for(kind: SimilarityKind) -> Arc<dyn NameSimilarity> {
    match kind {
        SimilarityKind::Levenshtein => Arc::new(Levenshtein),
        SimilarityKind::TokenSet => Arc::new(TokenSet),
    }
}

/// One minus edit distance over the longer name's length, counted in chars.
#[derive(Debug, Clone, Copy, Default)]
pub struct Levenshtein;

impl NameSimilarity for Levenshtein {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let longest = a.len().max(b.len());
        if longest == 0 {
            return 1.0;
        }
        1.0 - edit_distance(&a, &b) as f64 / longest as f64
    }
}

fn edit_distance(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitute.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Jaccard overlap of the names' word sets, ignoring word order and
/// punctuation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSet;

impl NameSimilarity for TokenSet {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = tokens(a);
        let b = tokens(b);
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let shared = a.intersection(&b).count();
        let total = a.union(&b).count();
        shared as f64 / total as f64
    }
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
