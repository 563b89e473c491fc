//! Model response parsing.
//!
//! Responses are expected to hold a JSON object with a `concepts` array,
//! optionally inside a fenced code block. Individual entries are normalized
//! leniently; a response whose top-level shape is wrong is rejected.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use paperconcepts_shared::{
    Candidate, PaperConceptsError, Result, canonical_category, canonical_name,
    collapse_whitespace,
};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Confidence used when an entry gives none or an unparseable one.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Deserialize)]
struct RawResponse {
    concepts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedNames {
    One(String),
    Many(Vec<Value>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawConfidence {
    Number(f64),
    Text(String),
}

/// Turns raw model output into normalized candidates.
#[derive(Debug, Clone, Copy)]
pub struct ResponseValidator {
    default_confidence: f64,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self {
            default_confidence: DEFAULT_CONFIDENCE,
        }
    }
}

impl ResponseValidator {
    /// Parse and normalize a response.
    ///
    /// Entries without a usable name are dropped with a warning. Duplicate
    /// names within the response are merged: the higher-confidence entry
    /// wins and related names are unioned.
    pub fn validate(&self, raw: &str) -> Result<Vec<Candidate>> {
        let json = json_payload(raw);
        let response: RawResponse = serde_json::from_str(json).map_err(|e| {
            PaperConceptsError::MalformedResponse(format!(
                "expected an object with a `concepts` array: {e}"
            ))
        })?;

        let mut candidates: Vec<Candidate> = Vec::with_capacity(response.concepts.len());
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut dropped = 0usize;

        for (position, entry) in response.concepts.into_iter().enumerate() {
            let Some(candidate) = self.normalize(entry) else {
                dropped += 1;
                tracing::warn!(position, "dropping concept entry without a usable name");
                continue;
            };

            match by_name.get(&candidate.canonical_name()) {
                Some(&idx) => merge_into(&mut candidates[idx], candidate),
                None => {
                    by_name.insert(candidate.canonical_name(), candidates.len());
                    candidates.push(candidate);
                }
            }
        }

        for candidate in &mut candidates {
            let own = candidate.canonical_name();
            candidate.related.retain(|r| canonical_name(r) != own);
        }

        tracing::debug!(
            concepts = candidates.len(),
            dropped,
            "validated model response"
        );
        Ok(candidates)
    }

    /// Only a missing or blank `name` drops an entry. Any other field with
    /// an unexpected type falls back to its default.
    fn normalize(&self, entry: Value) -> Option<Candidate> {
        let Value::Object(mut fields) = entry else {
            return None;
        };
        let name = match fields.remove("name") {
            Some(Value::String(name)) => collapse_whitespace(&name),
            _ => return None,
        };
        if name.is_empty() {
            return None;
        }
        let own = canonical_name(&name);

        let description: Option<String> = take_field(&mut fields, &["description"], &name);
        let category: Option<String> = take_field(&mut fields, &["category"], &name);
        let parent: Option<String> = take_field(&mut fields, &["parent_concept", "parent"], &name);
        let related: Option<RelatedNames> =
            take_field(&mut fields, &["related_concepts", "related"], &name);
        let confidence: Option<RawConfidence> = take_field(&mut fields, &["confidence"], &name);
        let context: Option<String> = take_field(&mut fields, &["context"], &name);

        let parent = parent
            .map(|p| collapse_whitespace(&p))
            .filter(|p| !p.is_empty() && canonical_name(p) != own);

        Some(Candidate {
            description: description.map(|d| d.trim().to_string()).unwrap_or_default(),
            category: canonical_category(category.as_deref().unwrap_or_default()),
            parent,
            related: related_names(related),
            confidence: self.confidence(confidence),
            context: context.map(|c| collapse_whitespace(&c)).unwrap_or_default(),
            question: None,
            name,
        })
    }

    fn confidence(&self, raw: Option<RawConfidence>) -> f64 {
        let value = match raw {
            Some(RawConfidence::Number(n)) => n,
            Some(RawConfidence::Text(s)) => s.trim().parse().unwrap_or(self.default_confidence),
            None => self.default_confidence,
        };
        if value.is_nan() {
            self.default_confidence
        } else {
            value.clamp(0.0, 1.0)
        }
    }
}

/// Locate the JSON inside a response: a fenced block first, then the outermost
/// braces, then the whole text.
fn json_payload(raw: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.+?)\s*```").expect("valid regex")
    });
    static OBJECT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

    if let Some(m) = FENCE_RE.captures(raw).and_then(|c| c.get(1)) {
        return m.as_str();
    }
    if let Some(m) = OBJECT_RE.find(raw) {
        return m.as_str();
    }
    raw.trim()
}

/// Remove and decode the first present key. Nulls and mistyped values
/// yield `None`; mistyped ones are logged.
fn take_field<T: DeserializeOwned>(
    fields: &mut Map<String, Value>,
    keys: &[&str],
    concept: &str,
) -> Option<T> {
    let (key, value) = keys
        .iter()
        .find_map(|&key| fields.remove(key).map(|value| (key, value)))?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(concept, field = key, error = %e, "ignoring concept field with unexpected type");
            None
        }
    }
}

/// A single string or a list; non-string list items and blanks are skipped.
fn related_names(raw: Option<RelatedNames>) -> BTreeSet<String> {
    let names: Vec<String> = match raw {
        None => Vec::new(),
        Some(RelatedNames::One(s)) => s.split(',').map(str::to_string).collect(),
        Some(RelatedNames::Many(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
    };

    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| collapse_whitespace(n))
        .filter(|n| !n.is_empty() && seen.insert(canonical_name(n)))
        .collect()
}

fn merge_into(kept: &mut Candidate, other: Candidate) {
    let losing = if other.confidence > kept.confidence {
        std::mem::replace(kept, other).related
    } else {
        other.related
    };
    let known: HashSet<String> = kept.related.iter().map(|r| canonical_name(r)).collect();
    kept.related
        .extend(losing.into_iter().filter(|r| !known.contains(&canonical_name(r))));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(raw: &str) -> Result<Vec<Candidate>> {
        ResponseValidator::default().validate(raw)
    }

    #[test]
    fn parses_fenced_json() {
        let raw = r#"Here are the concepts:
```json
{"concepts": [
  {"name": "Turing Machine", "description": "Abstract machine", "category": "Theory of Computation",
   "parent_concept": "Automata", "related_concepts": ["Halting Problem", "Tape"],
   "confidence": 0.92, "context": "Describe a  Turing\nmachine"}
]}
```
Hope this helps."#;
        let concepts = validate(raw).expect("valid");
        assert_eq!(concepts.len(), 1);
        let c = &concepts[0];
        assert_eq!(c.name, "Turing Machine");
        assert_eq!(c.category, "Theory of Computation");
        assert_eq!(c.parent.as_deref(), Some("Automata"));
        assert_eq!(c.related.len(), 2);
        assert!((c.confidence - 0.92).abs() < f64::EPSILON);
        assert_eq!(c.context, "Describe a Turing machine");
        assert_eq!(c.question, None);
    }

    #[test]
    fn parses_bare_object_with_prose() {
        let raw = r#"Sure! {"concepts": [{"name": "TCP"}]} That's all."#;
        let concepts = validate(raw).expect("valid");
        assert_eq!(concepts[0].name, "TCP");
        assert_eq!(concepts[0].category, "Uncategorized");
        assert!((concepts[0].confidence - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_wrong_top_level_shape() {
        for raw in [
            "no json here",
            r#"{"items": []}"#,
            r#"{"concepts": "TCP"}"#,
            r#"[{"name": "TCP"}]"#,
        ] {
            let err = validate(raw).unwrap_err();
            assert!(
                matches!(err, PaperConceptsError::MalformedResponse(_)),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn empty_concept_list_is_valid() {
        assert!(validate(r#"{"concepts": []}"#).expect("valid").is_empty());
    }

    #[test]
    fn normalizes_confidence() {
        let raw = r#"{"concepts": [
            {"name": "a", "confidence": "0.4"},
            {"name": "b", "confidence": 7},
            {"name": "c", "confidence": -1},
            {"name": "d", "confidence": "high"},
            {"name": "e", "confidence": "NaN"}
        ]}"#;
        let got: Vec<f64> = validate(raw).expect("valid").iter().map(|c| c.confidence).collect();
        assert_eq!(got, vec![0.4, 1.0, 0.0, 0.8, 0.8]);
    }

    #[test]
    fn drops_unnamed_entries() {
        let raw = r#"{"concepts": [
            {"description": "no name"},
            {"name": "   "},
            {"name": 42},
            "just a string",
            {"name": "Paging"}
        ]}"#;
        let concepts = validate(raw).expect("valid");
        assert_eq!(concepts.len(), 1);
        assert_eq!(concepts[0].name, "Paging");
    }

    #[test]
    fn related_accepts_string_or_list() {
        let raw = r#"{"concepts": [
            {"name": "Deadlock", "related_concepts": "Mutex, Semaphore, deadlock"},
            {"name": "Paging", "related_concepts": ["TLB", 3, "", "tlb", "Paging"]}
        ]}"#;
        let concepts = validate(raw).expect("valid");
        let deadlock: Vec<_> = concepts[0].related.iter().cloned().collect();
        assert_eq!(deadlock, vec!["Mutex", "Semaphore"]);
        let paging: Vec<_> = concepts[1].related.iter().cloned().collect();
        assert_eq!(paging, vec!["TLB"]);
    }

    #[test]
    fn merges_duplicates_keeping_higher_confidence() {
        let raw = r#"{"concepts": [
            {"name": "Sliding Window", "description": "weak", "confidence": 0.5, "related_concepts": ["TCP"]},
            {"name": "sliding  window", "description": "strong", "confidence": 0.9, "related_concepts": ["Flow Control"]}
        ]}"#;
        let concepts = validate(raw).expect("valid");
        assert_eq!(concepts.len(), 1);
        let c = &concepts[0];
        assert_eq!(c.description, "strong");
        assert_eq!(c.name, "sliding window");
        assert!(c.related.contains("TCP"));
        assert!(c.related.contains("Flow Control"));
    }

    #[test]
    fn mistyped_optional_fields_fall_back_to_defaults() {
        let raw = r#"{"concepts": [
            {"name": "Paging", "description": 5, "category": ["Memory"]},
            {"name": "TLB", "confidence": true, "parent_concept": {"name": "Cache"}},
            {"name": "Heap", "context": ["a"], "related_concepts": 7, "description": null}
        ]}"#;
        let concepts = validate(raw).expect("valid");
        let names: Vec<&str> = concepts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Paging", "TLB", "Heap"]);

        assert_eq!(concepts[0].description, "");
        assert_eq!(concepts[0].category, "Uncategorized");
        assert!((concepts[1].confidence - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(concepts[1].parent, None);
        assert_eq!(concepts[2].context, "");
        assert!(concepts[2].related.is_empty());
    }

    #[test]
    fn merge_winner_does_not_duplicate_related_by_case() {
        let raw = r#"{"concepts": [
            {"name": "Paging", "confidence": 0.5, "related_concepts": ["tlb", "Swap"]},
            {"name": "paging", "confidence": 0.9, "related_concepts": ["TLB", "Frame"]}
        ]}"#;
        let concepts = validate(raw).expect("valid");
        assert_eq!(concepts.len(), 1);
        let related: Vec<_> = concepts[0].related.iter().cloned().collect();
        assert_eq!(related, vec!["Frame", "Swap", "TLB"]);
    }

    #[test]
    fn self_parent_is_discarded() {
        let raw = r#"{"concepts": [{"name": "Recursion", "parent_concept": "recursion"}]}"#;
        assert_eq!(validate(raw).expect("valid")[0].parent, None);
    }
}
