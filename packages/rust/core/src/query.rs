//! Cross-document queries over the consolidated concept graph.
//!
//! Counts come from live occurrences only; superseded ones are history.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use paperconcepts_shared::{Concept, ConceptId, PaperConceptsError, Result, canonical_name};
use paperconcepts_storage::{ConceptDetails, RelatedConcept, Storage, YearCount};

/// Per-year counts for one concept.
#[derive(Debug, Clone)]
pub struct ConceptTrend {
    pub concept_id: ConceptId,
    pub name: String,
    pub years: Vec<YearCount>,
}

impl ConceptTrend {
    pub fn total_occurrences(&self) -> i64 {
        self.years.iter().map(|y| y.occurrences).sum()
    }
}

/// Everything known about one concept.
#[derive(Debug, Clone)]
pub struct ConceptReport {
    pub details: ConceptDetails,
    /// Parent first, then its parent, and so on.
    pub ancestry: Vec<Concept>,
    pub related: Vec<RelatedConcept>,
    pub trend: Vec<YearCount>,
}

/// Read-only queries that combine several store lookups.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    storage: Arc<Storage>,
}

impl QueryEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Find a concept by numeric id, canonical name, or best search hit.
    pub async fn resolve_concept(&self, query: &str) -> Result<Concept> {
        let query = query.trim();
        if let Ok(id) = query.parse::<ConceptId>() {
            if let Some(concept) = self.storage.get_concept(id).await? {
                return Ok(concept);
            }
        }

        if let Some(concept) = self.storage.find_concept_by_name(&canonical_name(query)).await? {
            return Ok(concept);
        }

        let hit = self
            .storage
            .search_concepts(query, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PaperConceptsError::NotFound(format!("concept matching {query:?}")))?;
        debug!(query, concept = %hit.concept_id, "resolved concept by search");
        self.storage
            .get_concept(hit.concept_id)
            .await?
            .ok_or_else(|| PaperConceptsError::NotFound(format!("concept {}", hit.concept_id)))
    }

    /// Yearly trends for the given concepts, or for the `top` most frequent
    /// ones when none are given.
    #[instrument(skip_all, fields(concepts = concepts.len(), top))]
    pub async fn trends(&self, concepts: &[ConceptId], top: u32) -> Result<Vec<ConceptTrend>> {
        let targets: Vec<(ConceptId, String)> = if concepts.is_empty() {
            self.storage
                .concept_frequency(top)
                .await?
                .into_iter()
                .map(|f| (f.concept_id, f.name))
                .collect()
        } else {
            let mut targets = Vec::with_capacity(concepts.len());
            for &id in concepts {
                let concept = self
                    .storage
                    .get_concept(id)
                    .await?
                    .ok_or_else(|| PaperConceptsError::NotFound(format!("concept {id}")))?;
                targets.push((id, concept.display_name));
            }
            targets
        };

        let mut trends = Vec::with_capacity(targets.len());
        for (concept_id, name) in targets {
            let years = self.storage.yearly_trend(concept_id).await?;
            trends.push(ConceptTrend {
                concept_id,
                name,
                years,
            });
        }
        Ok(trends)
    }

    /// Parent chain of a concept, nearest first. Stops at the first concept
    /// already seen, so cyclic parent links terminate.
    pub async fn ancestry(&self, concept: &Concept) -> Result<Vec<Concept>> {
        let mut visited = HashSet::from([concept.id]);
        let mut chain = Vec::new();
        let mut next = concept.parent_id;

        while let Some(id) = next {
            if !visited.insert(id) {
                debug!(concept = %concept.id, at = %id, "parent cycle, stopping ancestry walk");
                break;
            }
            let Some(parent) = self.storage.get_concept(id).await? else {
                break;
            };
            next = parent.parent_id;
            chain.push(parent);
        }
        Ok(chain)
    }

    /// Details, ancestry, relations and trend for one concept.
    pub async fn concept_report(&self, id: ConceptId) -> Result<ConceptReport> {
        let details = self
            .storage
            .concept_details(id)
            .await?
            .ok_or_else(|| PaperConceptsError::NotFound(format!("concept {id}")))?;
        let ancestry = self.ancestry(&details.concept).await?;
        let related = self.storage.related_concepts(id).await?;
        let trend = self.storage.yearly_trend(id).await?;

        Ok(ConceptReport {
            details,
            ancestry,
            related,
            trend,
        })
    }
}
