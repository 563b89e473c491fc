//! Read path: lookups and cross-paper aggregate queries.
//!
//! Every aggregate counts live (non-superseded) occurrences only.

use libsql::params;
use paperconcepts_shared::{
    Concept, ConceptId, ConceptRelation, Occurrence, PaperId, RelationType, Result,
};

use crate::{CONCEPT_COLUMNS, OCCURRENCE_COLUMNS, Storage, db_err, row_to_concept, row_to_occurrence};

/// A concept with its live occurrence and paper counts.
#[derive(Debug, Clone)]
pub struct ConceptFrequency {
    pub concept_id: ConceptId,
    pub name: String,
    pub category: String,
    pub occurrences: i64,
    pub papers: i64,
}

/// Per-category totals.
#[derive(Debug, Clone)]
pub struct CategorySummary {
    pub category: String,
    pub concepts: i64,
    pub occurrences: i64,
}

/// A concept mentioned in one paper.
#[derive(Debug, Clone)]
pub struct PaperMention {
    pub concept_id: ConceptId,
    pub name: String,
    pub category: String,
    pub question: Option<String>,
    pub context: String,
    pub confidence: f64,
}

/// A neighbour of a concept in the relation graph.
#[derive(Debug, Clone)]
pub struct RelatedConcept {
    pub concept_id: ConceptId,
    pub name: String,
    pub relation_type: RelationType,
    pub strength: i64,
    /// The queried concept is the first end of the edge (the parent, for
    /// `parent-child`).
    pub outgoing: bool,
}

/// A full-text search hit.
#[derive(Debug, Clone)]
pub struct ConceptHit {
    pub concept_id: ConceptId,
    pub name: String,
    pub category: String,
    pub description: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

/// Occurrences of a concept in one year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearCount {
    pub year: i32,
    pub occurrences: i64,
    pub papers: i64,
}

/// A concept sharing papers with another.
#[derive(Debug, Clone)]
pub struct CoOccurrence {
    pub concept_id: ConceptId,
    pub name: String,
    pub shared_papers: i64,
}

/// Everything known about one concept.
#[derive(Debug, Clone)]
pub struct ConceptDetails {
    pub concept: Concept,
    pub occurrences: i64,
    pub papers: i64,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
    pub parent: Option<Concept>,
}

/// Row counts across the store.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub papers: i64,
    pub analyzed_papers: i64,
    pub concepts: i64,
    pub occurrences: i64,
    pub relations: i64,
}

impl Storage {
    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Get a concept by ID.
    pub async fn get_concept(&self, id: ConceptId) -> Result<Option<Concept>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CONCEPT_COLUMNS} FROM concepts WHERE id = ?1"),
                params![id.0],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_concept(&row, 0)?)),
            None => Ok(None),
        }
    }

    /// Get a concept by canonical name.
    pub async fn find_concept_by_name(&self, canonical_name: &str) -> Result<Option<Concept>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CONCEPT_COLUMNS} FROM concepts WHERE name = ?1"),
                params![canonical_name],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_concept(&row, 0)?)),
            None => Ok(None),
        }
    }

    /// All concepts, by name.
    pub async fn list_concepts(&self) -> Result<Vec<Concept>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CONCEPT_COLUMNS} FROM concepts ORDER BY name"),
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut concepts = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            concepts.push(row_to_concept(&row, 0)?);
        }
        Ok(concepts)
    }

    /// All relations, strongest first.
    pub async fn list_relations(&self) -> Result<Vec<ConceptRelation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT concept1_id, concept2_id, relation_type, strength
                 FROM concept_relations
                 ORDER BY strength DESC, concept1_id, concept2_id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut relations = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let relation_type: String = row.get(2).map_err(db_err)?;
            relations.push(ConceptRelation {
                concept1: ConceptId(row.get::<i64>(0).map_err(db_err)?),
                concept2: ConceptId(row.get::<i64>(1).map_err(db_err)?),
                relation_type: relation_type.parse()?,
                strength: row.get::<i64>(3).map_err(db_err)?,
            });
        }
        Ok(relations)
    }

    /// Occurrences recorded for a paper, oldest first.
    pub async fn occurrences_for_paper(
        &self,
        paper: PaperId,
        include_superseded: bool,
    ) -> Result<Vec<Occurrence>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {OCCURRENCE_COLUMNS} FROM occurrences
                     WHERE paper_id = ?1 AND (?2 OR superseded = 0)
                     ORDER BY id"
                ),
                params![paper.0, include_superseded as i64],
            )
            .await
            .map_err(db_err)?;

        let mut occurrences = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            occurrences.push(row_to_occurrence(&row)?);
        }
        Ok(occurrences)
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// The `limit` most frequently mentioned concepts.
    pub async fn concept_frequency(&self, limit: u32) -> Result<Vec<ConceptFrequency>> {
        let rows = self
            .conn
            .query(
                "SELECT c.id, c.display_name, c.category, COUNT(o.id), COUNT(DISTINCT o.paper_id)
                 FROM concepts c
                 JOIN occurrences o ON o.concept_id = c.id AND o.superseded = 0
                 GROUP BY c.id
                 ORDER BY COUNT(o.id) DESC, c.name
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(db_err)?;
        collect_frequencies(rows).await
    }

    /// Concept and occurrence totals per category.
    pub async fn category_summary(&self) -> Result<Vec<CategorySummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.category, COUNT(DISTINCT c.id), COUNT(o.id)
                 FROM concepts c
                 LEFT JOIN occurrences o ON o.concept_id = c.id AND o.superseded = 0
                 GROUP BY lower(c.category)
                 ORDER BY COUNT(o.id) DESC, c.category",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            summaries.push(CategorySummary {
                category: row.get::<String>(0).map_err(db_err)?,
                concepts: row.get::<i64>(1).map_err(db_err)?,
                occurrences: row.get::<i64>(2).map_err(db_err)?,
            });
        }
        Ok(summaries)
    }

    /// Concepts in a category (case-insensitive), most mentioned first.
    pub async fn category_concepts(&self, category: &str) -> Result<Vec<ConceptFrequency>> {
        let rows = self
            .conn
            .query(
                "SELECT c.id, c.display_name, c.category, COUNT(o.id), COUNT(DISTINCT o.paper_id)
                 FROM concepts c
                 LEFT JOIN occurrences o ON o.concept_id = c.id AND o.superseded = 0
                 WHERE lower(c.category) = lower(?1)
                 GROUP BY c.id
                 ORDER BY COUNT(o.id) DESC, c.name",
                params![category.trim()],
            )
            .await
            .map_err(db_err)?;
        collect_frequencies(rows).await
    }

    /// Concepts mentioned in papers from `year`.
    pub async fn concepts_by_year(&self, year: i32) -> Result<Vec<ConceptFrequency>> {
        let rows = self
            .conn
            .query(
                "SELECT c.id, c.display_name, c.category, COUNT(o.id), COUNT(DISTINCT o.paper_id)
                 FROM concepts c
                 JOIN occurrences o ON o.concept_id = c.id AND o.superseded = 0
                 JOIN papers p ON p.id = o.paper_id
                 WHERE p.year = ?1
                 GROUP BY c.id
                 ORDER BY COUNT(o.id) DESC, c.name",
                params![i64::from(year)],
            )
            .await
            .map_err(db_err)?;
        collect_frequencies(rows).await
    }

    /// Concepts mentioned in one paper, with question, context and confidence.
    pub async fn paper_concepts(&self, paper: PaperId) -> Result<Vec<PaperMention>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.display_name, c.category, o.question, o.context, o.confidence
                 FROM occurrences o
                 JOIN concepts c ON c.id = o.concept_id
                 WHERE o.paper_id = ?1 AND o.superseded = 0
                 ORDER BY o.question, o.confidence DESC, c.name",
                params![paper.0],
            )
            .await
            .map_err(db_err)?;

        let mut mentions = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            mentions.push(PaperMention {
                concept_id: ConceptId(row.get::<i64>(0).map_err(db_err)?),
                name: row.get::<String>(1).map_err(db_err)?,
                category: row.get::<String>(2).map_err(db_err)?,
                question: row.get::<String>(3).ok(),
                context: row.get::<String>(4).unwrap_or_default(),
                confidence: row.get::<f64>(5).map_err(db_err)?,
            });
        }
        Ok(mentions)
    }

    /// Relations touching a concept, in either direction, strongest first.
    pub async fn related_concepts(&self, concept: ConceptId) -> Result<Vec<RelatedConcept>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.display_name, r.relation_type, r.strength, r.concept1_id = ?1
                 FROM concept_relations r
                 JOIN concepts c ON c.id = CASE WHEN r.concept1_id = ?1
                                                THEN r.concept2_id ELSE r.concept1_id END
                 WHERE r.concept1_id = ?1 OR r.concept2_id = ?1
                 ORDER BY r.strength DESC, c.name",
                params![concept.0],
            )
            .await
            .map_err(db_err)?;

        let mut related = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let relation_type: String = row.get(2).map_err(db_err)?;
            related.push(RelatedConcept {
                concept_id: ConceptId(row.get::<i64>(0).map_err(db_err)?),
                name: row.get::<String>(1).map_err(db_err)?,
                relation_type: relation_type.parse()?,
                strength: row.get::<i64>(3).map_err(db_err)?,
                outgoing: row.get::<i64>(4).map_err(db_err)? != 0,
            });
        }
        Ok(related)
    }

    /// Full-text search over concept name, category and description.
    /// Every word must match, as a prefix.
    pub async fn search_concepts(&self, query: &str, limit: u32) -> Result<Vec<ConceptHit>> {
        let Some(expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.display_name, c.category, c.description, fts.rank
                 FROM concepts_fts fts
                 JOIN concepts c ON c.id = fts.rowid
                 WHERE concepts_fts MATCH ?1
                 ORDER BY fts.rank
                 LIMIT ?2",
                params![expr.as_str(), limit],
            )
            .await
            .map_err(db_err)?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            hits.push(ConceptHit {
                concept_id: ConceptId(row.get::<i64>(0).map_err(db_err)?),
                name: row.get::<String>(1).map_err(db_err)?,
                category: row.get::<String>(2).map_err(db_err)?,
                description: row.get::<String>(3).unwrap_or_default(),
                score: row.get::<f64>(4).unwrap_or(0.0),
            });
        }
        Ok(hits)
    }

    /// Per-year mention counts for one concept, ascending by year.
    pub async fn yearly_trend(&self, concept: ConceptId) -> Result<Vec<YearCount>> {
        let mut rows = self
            .conn
            .query(
                "SELECT p.year, COUNT(o.id), COUNT(DISTINCT p.id)
                 FROM occurrences o
                 JOIN papers p ON p.id = o.paper_id
                 WHERE o.concept_id = ?1 AND o.superseded = 0 AND p.year IS NOT NULL
                 GROUP BY p.year
                 ORDER BY p.year",
                params![concept.0],
            )
            .await
            .map_err(db_err)?;

        let mut years = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            years.push(YearCount {
                year: row.get::<i64>(0).map_err(db_err)? as i32,
                occurrences: row.get::<i64>(1).map_err(db_err)?,
                papers: row.get::<i64>(2).map_err(db_err)?,
            });
        }
        Ok(years)
    }

    /// Concepts that share papers with `concept`, by number of shared papers.
    pub async fn cooccurring_concepts(
        &self,
        concept: ConceptId,
        limit: u32,
    ) -> Result<Vec<CoOccurrence>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.display_name, COUNT(DISTINCT o2.paper_id) AS shared
                 FROM occurrences o1
                 JOIN occurrences o2 ON o2.paper_id = o1.paper_id
                                    AND o2.concept_id <> o1.concept_id
                                    AND o2.superseded = 0
                 JOIN concepts c ON c.id = o2.concept_id
                 WHERE o1.concept_id = ?1 AND o1.superseded = 0
                 GROUP BY c.id
                 ORDER BY shared DESC, c.name
                 LIMIT ?2",
                params![concept.0, limit],
            )
            .await
            .map_err(db_err)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            result.push(CoOccurrence {
                concept_id: ConceptId(row.get::<i64>(0).map_err(db_err)?),
                name: row.get::<String>(1).map_err(db_err)?,
                shared_papers: row.get::<i64>(2).map_err(db_err)?,
            });
        }
        Ok(result)
    }

    /// Counts, year span and parent of one concept.
    pub async fn concept_details(&self, concept: ConceptId) -> Result<Option<ConceptDetails>> {
        let Some(found) = self.get_concept(concept).await? else {
            return Ok(None);
        };

        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(o.id), COUNT(DISTINCT o.paper_id), MIN(p.year), MAX(p.year)
                 FROM occurrences o
                 JOIN papers p ON p.id = o.paper_id
                 WHERE o.concept_id = ?1 AND o.superseded = 0",
                params![concept.0],
            )
            .await
            .map_err(db_err)?;

        let (occurrences, papers, first_year, last_year) = match rows.next().await.map_err(db_err)? {
            Some(row) => (
                row.get::<i64>(0).unwrap_or(0),
                row.get::<i64>(1).unwrap_or(0),
                row.get::<i64>(2).ok().map(|y| y as i32),
                row.get::<i64>(3).ok().map(|y| y as i32),
            ),
            None => (0, 0, None, None),
        };

        let parent = match found.parent_id {
            Some(parent_id) => self.get_concept(parent_id).await?,
            None => None,
        };

        Ok(Some(ConceptDetails {
            concept: found,
            occurrences,
            papers,
            first_year,
            last_year,
            parent,
        }))
    }

    /// Row counts across the store.
    pub async fn stats(&self) -> Result<StoreStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT (SELECT COUNT(*) FROM papers),
                        (SELECT COUNT(*) FROM papers WHERE status = 'analyzed'),
                        (SELECT COUNT(*) FROM concepts),
                        (SELECT COUNT(*) FROM occurrences WHERE superseded = 0),
                        (SELECT COUNT(*) FROM concept_relations)",
                params![],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(StoreStats {
                papers: row.get::<i64>(0).map_err(db_err)?,
                analyzed_papers: row.get::<i64>(1).map_err(db_err)?,
                concepts: row.get::<i64>(2).map_err(db_err)?,
                occurrences: row.get::<i64>(3).map_err(db_err)?,
                relations: row.get::<i64>(4).map_err(db_err)?,
            }),
            None => Ok(StoreStats::default()),
        }
    }
}

async fn collect_frequencies(mut rows: libsql::Rows) -> Result<Vec<ConceptFrequency>> {
    let mut result = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        result.push(ConceptFrequency {
            concept_id: ConceptId(row.get::<i64>(0).map_err(db_err)?),
            name: row.get::<String>(1).map_err(db_err)?,
            category: row.get::<String>(2).map_err(db_err)?,
            occurrences: row.get::<i64>(3).map_err(db_err)?,
            papers: row.get::<i64>(4).map_err(db_err)?,
        });
    }
    Ok(result)
}

/// Quote each word as an FTS5 prefix term so user input cannot inject
/// query syntax. Returns `None` when nothing searchable remains.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|w| w.replace('"', ""))
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .map(|w| format!("\"{w}\"*"))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

#[cfg(test)]
mod tests {
    use paperconcepts_shared::{NewConcept, NewOccurrence, RelationKey};

    use super::*;
    use crate::KnowledgeStore;
    use crate::test_support::{new_paper, test_storage};

    struct Fixture {
        storage: Storage,
        p2019: PaperId,
        p2020: PaperId,
        tcp: ConceptId,
        congestion: ConceptId,
        heap: ConceptId,
    }

    /// Two papers: TCP and congestion control in both, heap only in 2020.
    async fn fixture() -> Fixture {
        let storage = test_storage().await;
        let p2019 = storage.insert_paper(&new_paper("a.pdf", 2019)).await.unwrap().unwrap().id;
        let p2020 = storage.insert_paper(&new_paper("b.pdf", 2020)).await.unwrap().unwrap().id;

        let tx = storage.begin_write().await.unwrap();
        let mut ids = Vec::new();
        for (name, category, description) in [
            ("TCP", "Networking", "Reliable transport protocol"),
            ("Congestion Control", "Networking", "Sender rate adaptation"),
            ("Binary Heap", "Data Structures", "Priority queue on an array"),
        ] {
            let c = tx
                .insert_concept(&NewConcept {
                    name: name.to_lowercase(),
                    display_name: name.into(),
                    category: category.into(),
                    description: description.into(),
                    description_confidence: 0.9,
                })
                .await
                .unwrap();
            ids.push(c.id);
        }
        let (tcp, congestion, heap) = (ids[0], ids[1], ids[2]);

        for (concept, paper, context) in [
            (tcp, p2019, "handshake"),
            (tcp, p2020, "window"),
            (tcp, p2020, "retransmit"),
            (congestion, p2019, "slow start"),
            (congestion, p2020, "AIMD"),
            (heap, p2020, "sift down"),
        ] {
            tx.insert_occurrence(&NewOccurrence {
                concept_id: concept,
                paper_id: paper,
                question: Some("q01".into()),
                context: context.into(),
                confidence: 0.8,
                segment_index: 0,
            })
            .await
            .unwrap();
        }

        tx.bump_relation(RelationKey::new(tcp, congestion, RelationType::CoOccurs).unwrap())
            .await
            .unwrap();
        tx.bump_relation(RelationKey::new(congestion, tcp, RelationType::CoOccurs).unwrap())
            .await
            .unwrap();
        tx.bump_relation(RelationKey::new(tcp, heap, RelationType::ParentChild).unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        Fixture {
            storage,
            p2019,
            p2020,
            tcp,
            congestion,
            heap,
        }
    }

    #[tokio::test]
    async fn frequency_and_categories() {
        let f = fixture().await;

        let top = f.storage.concept_frequency(2).await.expect("frequency");
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].concept_id, f.tcp);
        assert_eq!(top[0].occurrences, 3);
        assert_eq!(top[0].papers, 2);

        let categories = f.storage.category_summary().await.expect("categories");
        assert_eq!(categories[0].category, "Networking");
        assert_eq!(categories[0].concepts, 2);
        assert_eq!(categories[0].occurrences, 5);

        let networking = f.storage.category_concepts("networking").await.unwrap();
        assert_eq!(networking.len(), 2);
    }

    #[tokio::test]
    async fn year_and_paper_views() {
        let f = fixture().await;

        let in_2019 = f.storage.concepts_by_year(2019).await.unwrap();
        let names: Vec<_> = in_2019.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Congestion Control", "TCP"]);

        let mentions = f.storage.paper_concepts(f.p2020).await.unwrap();
        assert_eq!(mentions.len(), 4);
        assert!(mentions.iter().all(|m| m.question.as_deref() == Some("q01")));

        let trend = f.storage.yearly_trend(f.tcp).await.unwrap();
        assert_eq!(
            trend,
            vec![
                YearCount { year: 2019, occurrences: 1, papers: 1 },
                YearCount { year: 2020, occurrences: 2, papers: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn related_in_both_directions() {
        let f = fixture().await;

        let from_tcp = f.storage.related_concepts(f.tcp).await.unwrap();
        assert_eq!(from_tcp.len(), 2);
        assert_eq!(from_tcp[0].concept_id, f.congestion);
        assert_eq!(from_tcp[0].strength, 2);

        let from_heap = f.storage.related_concepts(f.heap).await.unwrap();
        assert_eq!(from_heap.len(), 1);
        assert_eq!(from_heap[0].concept_id, f.tcp);
        assert_eq!(from_heap[0].relation_type, RelationType::ParentChild);
        assert!(!from_heap[0].outgoing);
    }

    #[tokio::test]
    async fn cooccurrence_by_shared_papers() {
        let f = fixture().await;
        let co = f.storage.cooccurring_concepts(f.heap, 10).await.unwrap();
        assert_eq!(co.len(), 2);
        assert!(co.iter().all(|c| c.shared_papers == 1));

        let co = f.storage.cooccurring_concepts(f.tcp, 10).await.unwrap();
        assert_eq!(co[0].concept_id, f.congestion);
        assert_eq!(co[0].shared_papers, 2);
    }

    #[tokio::test]
    async fn fts_search() {
        let f = fixture().await;

        let hits = f.storage.search_concepts("congest", 10).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].concept_id, f.congestion);

        let hits = f.storage.search_concepts("priority queue", 10).await.unwrap();
        assert_eq!(hits[0].concept_id, f.heap);

        let hits = f.storage.search_concepts("\"  *", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn details_and_supersession() {
        let f = fixture().await;

        let details = f.storage.concept_details(f.tcp).await.unwrap().unwrap();
        assert_eq!(details.occurrences, 3);
        assert_eq!(details.papers, 2);
        assert_eq!(details.first_year, Some(2019));
        assert_eq!(details.last_year, Some(2020));
        assert!(details.parent.is_none());

        let tx = f.storage.begin_write().await.unwrap();
        tx.supersede_occurrences(f.p2019).await.unwrap();
        tx.commit().await.unwrap();

        let details = f.storage.concept_details(f.tcp).await.unwrap().unwrap();
        assert_eq!(details.occurrences, 2);
        assert_eq!(details.first_year, Some(2020));

        let all = f.storage.occurrences_for_paper(f.p2019, true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|o| o.superseded));
        assert!(f.storage.occurrences_for_paper(f.p2019, false).await.unwrap().is_empty());

        let stats = f.storage.stats().await.unwrap();
        assert_eq!(stats.papers, 2);
        assert_eq!(stats.concepts, 3);
        assert_eq!(stats.occurrences, 4);
        assert_eq!(stats.relations, 2);
    }

    #[test]
    fn match_expression_quotes_terms() {
        assert_eq!(fts_match_expression("tcp  window"), Some("\"tcp\"* \"window\"*".into()));
        assert_eq!(fts_match_expression("\"  *"), None);
    }
}
