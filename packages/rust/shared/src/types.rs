//! Core domain types for the concept knowledge base.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PaperConceptsError;

/// Category assigned when the model gives none.
pub const UNCATEGORIZED: &str = "Uncategorized";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }
    };
}

row_id!(
    /// Database row id of a [`Paper`].
    PaperId
);
row_id!(
    /// Database row id of a [`Concept`]. Ordering defines the canonical
    /// orientation of undirected relations.
    ConceptId
);

// ---------------------------------------------------------------------------
// Paper
// ---------------------------------------------------------------------------

/// Processing status of a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperStatus {
    Unprocessed,
    Extracted,
    Analyzed,
    Failed,
}

impl PaperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Extracted => "extracted",
            Self::Analyzed => "analyzed",
            Self::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Unprocessed => 0,
            Self::Extracted => 1,
            Self::Analyzed | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Status only moves forward (unprocessed, extracted, then analyzed or
    /// failed) unless the paper is being explicitly reprocessed.
    pub fn can_transition_to(&self, next: PaperStatus, reprocess: bool) -> bool {
        reprocess || *self == next || next.rank() > self.rank()
    }
}

impl std::fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaperStatus {
    type Err = PaperConceptsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "unprocessed" => Ok(Self::Unprocessed),
            "extracted" => Ok(Self::Extracted),
            "analyzed" => Ok(Self::Analyzed),
            "failed" => Ok(Self::Failed),
            other => Err(PaperConceptsError::validation(format!(
                "unknown paper status: {other}"
            ))),
        }
    }
}

/// Metadata for a paper about to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaper {
    pub filename: String,
    pub year: Option<i32>,
    pub course: Option<String>,
    pub paper_number: Option<i32>,
}

/// One source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub id: PaperId,
    /// Source filename, unique across the store.
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Course or subject code (`qNN` for per-question solution files).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_number: Option<i32>,
    pub status: PaperStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Reason recorded with the last `failed` status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Paper {
    /// Question label used when a mention cannot be located more precisely.
    /// Solution files name their question in the course slot (`q08`).
    pub fn default_question(&self) -> Option<&str> {
        self.course
            .as_deref()
            .filter(|c| c.len() > 1 && c.starts_with(['q', 'Q']) && c[1..].chars().all(|ch| ch.is_ascii_digit()))
    }
}

// ---------------------------------------------------------------------------
// Concept graph
// ---------------------------------------------------------------------------

/// A canonical named idea; the deduplication target for candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    /// Canonical (normalized) name, unique across the store.
    pub name: String,
    /// Name as first seen, for display.
    pub display_name: String,
    pub category: String,
    /// Best available description; may be empty.
    pub description: String,
    /// Confidence of the candidate the description came from.
    pub description_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ConceptId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a concept.
#[derive(Debug, Clone)]
pub struct NewConcept {
    pub name: String,
    pub display_name: String,
    pub category: String,
    pub description: String,
    pub description_confidence: f64,
}

/// One observed mention of a concept in a paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: i64,
    pub concept_id: ConceptId,
    pub paper_id: PaperId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub context: String,
    pub confidence: f64,
    /// Index of the segment the mention came from.
    pub segment_index: u32,
    /// Superseded by a later fresh pass; kept for history.
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for recording an occurrence.
#[derive(Debug, Clone)]
pub struct NewOccurrence {
    pub concept_id: ConceptId,
    pub paper_id: PaperId,
    pub question: Option<String>,
    pub context: String,
    pub confidence: f64,
    pub segment_index: u32,
}

/// Kind of edge between two concepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationType {
    #[serde(rename = "related")]
    Related,
    #[serde(rename = "parent-child")]
    ParentChild,
    #[serde(rename = "co-occurs")]
    CoOccurs,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Related => "related",
            Self::ParentChild => "parent-child",
            Self::CoOccurs => "co-occurs",
        }
    }

    /// Whether `(a, b)` and `(b, a)` denote the same edge.
    pub fn is_undirected(&self) -> bool {
        !matches!(self, Self::ParentChild)
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = PaperConceptsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "related" => Ok(Self::Related),
            "parent-child" => Ok(Self::ParentChild),
            "co-occurs" => Ok(Self::CoOccurs),
            other => Err(PaperConceptsError::validation(format!(
                "unknown relation type: {other}"
            ))),
        }
    }
}

/// The key of an edge between two distinct concepts.
///
/// Undirected kinds store the smaller id first; `parent-child` stores the
/// parent first. Construction fails for self-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationKey {
    concept1: ConceptId,
    concept2: ConceptId,
    relation_type: RelationType,
}

impl RelationKey {
    pub fn new(a: ConceptId, b: ConceptId, relation_type: RelationType) -> Option<Self> {
        if a == b {
            return None;
        }
        let (concept1, concept2) = if relation_type.is_undirected() && b < a {
            (b, a)
        } else {
            (a, b)
        };
        Some(Self {
            concept1,
            concept2,
            relation_type,
        })
    }

    pub fn concept1(&self) -> ConceptId {
        self.concept1
    }

    pub fn concept2(&self) -> ConceptId {
        self.concept2
    }

    pub fn relation_type(&self) -> RelationType {
        self.relation_type
    }
}

/// A persisted edge with its accumulated evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptRelation {
    pub concept1: ConceptId,
    pub concept2: ConceptId,
    pub relation_type: RelationType,
    /// Evidence count; each consolidation write adds one.
    pub strength: i64,
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A validated concept mention from one segment's model response.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Name as returned by the model, trimmed.
    pub name: String,
    pub description: String,
    pub category: String,
    pub parent: Option<String>,
    pub related: BTreeSet<String>,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub context: String,
    /// Question label, filled in from document boundaries before consolidation.
    pub question: Option<String>,
}

impl Candidate {
    /// A bare candidate with defaults for everything but the name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: UNCATEGORIZED.into(),
            parent: None,
            related: BTreeSet::new(),
            confidence: 0.8,
            context: String::new(),
            question: None,
        }
    }

    /// The deduplication key for this candidate.
    pub fn canonical_name(&self) -> String {
        canonical_name(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Collapse every whitespace run to a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form of a concept name: trimmed, lowercased, internal
/// whitespace collapsed.
pub fn canonical_name(raw: &str) -> String {
    collapse_whitespace(raw).to_lowercase()
}

/// Display form of a category; empty input becomes [`UNCATEGORIZED`].
pub fn canonical_category(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    if collapsed.is_empty() {
        UNCATEGORIZED.into()
    } else {
        collapsed
    }
}

/// Whether a category carries no information.
pub fn is_uncategorized(category: &str) -> bool {
    category.trim().is_empty() || category.trim().eq_ignore_ascii_case(UNCATEGORIZED)
}
