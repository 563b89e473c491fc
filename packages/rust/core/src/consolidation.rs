//! Consolidation of extracted candidates into the knowledge store.
//!
//! Candidates are merged segment by segment, in segment order, inside one
//! write transaction per paper. Each segment runs under its own savepoint: a
//! segment that fails to apply is rolled back and recorded as a gap, while
//! the rest of the paper is kept.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use paperconcepts_shared::{
    Candidate, Concept, ConceptId, ConsolidationConfig, NewConcept, NewOccurrence, PaperId,
    RelationKey, RelationType, Result, canonical_category, canonical_name, collapse_whitespace,
    is_uncategorized,
};
use paperconcepts_storage::{KnowledgeStore, OccurrenceKey, Storage};

use crate::SegmentGap;
use crate::similarity::{NameSimilarity, similarity_for};

/// Wait before retrying a paper whose transaction hit lock contention.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(250);

/// How a paper's earlier occurrences are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsolidationMode {
    /// Keep live occurrences; skip candidates identical to one that was
    /// live before the pass began.
    #[default]
    Incremental,
    /// Supersede the paper's live occurrences before writing.
    Fresh,
}

/// Validated candidates of one segment.
#[derive(Debug, Clone, Default)]
pub struct SegmentCandidates {
    pub index: u32,
    pub candidates: Vec<Candidate>,
}

/// Counts from consolidating one paper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationSummary {
    pub new_concepts: usize,
    /// Pre-existing concepts whose description, category or parent changed.
    pub updated_concepts: usize,
    pub occurrences_written: usize,
    /// Candidates matching a live occurrence exactly.
    pub occurrences_skipped: usize,
    /// Relation upserts, counting repeated bumps of one edge.
    pub relations_touched: usize,
}

/// Result of consolidating one paper.
#[derive(Debug, Clone, Default)]
pub struct PaperConsolidation {
    pub summary: ConsolidationSummary,
    /// Occurrences marked superseded by a fresh pass.
    pub superseded: u64,
    /// Segments rolled back.
    pub gaps: Vec<SegmentGap>,
}

/// Writes accumulated while applying candidates, kept per segment so a
/// rolled-back segment leaves no trace in the totals.
#[derive(Debug, Default)]
struct Tally {
    created: BTreeSet<ConceptId>,
    updated: BTreeSet<ConceptId>,
    written: usize,
    skipped: usize,
    relations: usize,
}

impl Tally {
    fn absorb(&mut self, other: Tally) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.written += other.written;
        self.skipped += other.skipped;
        self.relations += other.relations;
    }

    fn summary(&self) -> ConsolidationSummary {
        ConsolidationSummary {
            new_concepts: self.created.len(),
            updated_concepts: self.updated.difference(&self.created).count(),
            occurrences_written: self.written,
            occurrences_skipped: self.skipped,
            relations_touched: self.relations,
        }
    }
}

/// Merges candidates into concepts, occurrences and relations.
#[derive(Debug, Clone)]
pub struct ConsolidationEngine {
    similarity: Arc<dyn NameSimilarity>,
    threshold: f64,
}

impl ConsolidationEngine {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self::with_similarity(similarity_for(config.similarity), config.fuzzy_threshold)
    }

    pub fn with_similarity(similarity: Arc<dyn NameSimilarity>, threshold: f64) -> Self {
        Self {
            similarity,
            threshold,
        }
    }

    /// Consolidate a whole paper in one transaction.
    ///
    /// Segments are applied in the order given. Lock contention aborts the
    /// transaction and the paper is retried once.
    #[instrument(skip_all, fields(paper = %paper, segments = segments.len(), ?mode))]
    pub async fn consolidate_paper(
        &self,
        storage: &Storage,
        paper: PaperId,
        segments: &[SegmentCandidates],
        mode: ConsolidationMode,
    ) -> Result<PaperConsolidation> {
        match self.try_consolidate(storage, paper, segments, mode).await {
            Err(e) if e.is_storage_busy() => {
                warn!(error = %e, "store busy, retrying paper once");
                tokio::time::sleep(BUSY_RETRY_DELAY).await;
                self.try_consolidate(storage, paper, segments, mode).await
            }
            other => other,
        }
    }

    async fn try_consolidate(
        &self,
        storage: &Storage,
        paper: PaperId,
        segments: &[SegmentCandidates],
        mode: ConsolidationMode,
    ) -> Result<PaperConsolidation> {
        let tx = storage.begin_write().await?;
        match self.write_paper(&tx, paper, segments, mode).await {
            Ok(outcome) => {
                tx.commit().await?;
                info!(
                    new_concepts = outcome.summary.new_concepts,
                    occurrences = outcome.summary.occurrences_written,
                    gaps = outcome.gaps.len(),
                    "paper consolidated"
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Apply every segment under its own savepoint. Errors other than lock
    /// contention roll back only the failing segment.
    pub async fn write_paper<S: KnowledgeStore + ?Sized>(
        &self,
        store: &S,
        paper: PaperId,
        segments: &[SegmentCandidates],
        mode: ConsolidationMode,
    ) -> Result<PaperConsolidation> {
        let superseded = match mode {
            ConsolidationMode::Fresh => store.supersede_occurrences(paper).await?,
            ConsolidationMode::Incremental => 0,
        };
        if superseded > 0 {
            debug!(superseded, "superseded earlier occurrences");
        }

        // Only occurrences live before this pass count as duplicates.
        let prior = store.live_occurrence_keys(paper).await?;
        let mut tally = Tally::default();
        let mut gaps = Vec::new();

        for segment in segments {
            let savepoint = format!("segment_{}", segment.index);
            store.savepoint(&savepoint).await?;

            let mut segment_tally = Tally::default();
            match self.apply_segment(store, paper, segment, &prior, &mut segment_tally).await {
                Ok(()) => {
                    store.release(&savepoint).await?;
                    tally.absorb(segment_tally);
                }
                Err(e) if e.is_storage_busy() => return Err(e),
                Err(e) => {
                    store.rollback_to(&savepoint).await?;
                    warn!(segment = segment.index, error = %e, "segment rolled back, gap recorded");
                    gaps.push(SegmentGap {
                        index: segment.index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(PaperConsolidation {
            summary: tally.summary(),
            superseded,
            gaps,
        })
    }

    async fn apply_segment<S: KnowledgeStore + ?Sized>(
        &self,
        store: &S,
        paper: PaperId,
        segment: &SegmentCandidates,
        prior: &HashSet<OccurrenceKey>,
        tally: &mut Tally,
    ) -> Result<()> {
        let mut mentioned: BTreeSet<ConceptId> = BTreeSet::new();

        for candidate in &segment.candidates {
            let category = canonical_category(&candidate.category);
            let mut concept = self
                .resolve(store, &candidate.name, &category, tally)
                .await?;
            let mut changed = merge_candidate(&mut concept, candidate, &category);

            let occurrence = NewOccurrence {
                concept_id: concept.id,
                paper_id: paper,
                question: candidate.question.clone(),
                context: candidate.context.clone(),
                confidence: candidate.confidence.clamp(0.0, 1.0),
                segment_index: segment.index,
            };
            if prior.contains(&OccurrenceKey::from(&occurrence)) {
                tally.skipped += 1;
                if changed {
                    store.update_concept(&concept).await?;
                    tally.updated.insert(concept.id);
                }
                continue;
            }
            store.insert_occurrence(&occurrence).await?;
            tally.written += 1;
            mentioned.insert(concept.id);

            if let Some(parent_name) = &candidate.parent {
                let parent = self.resolve(store, parent_name, &category, tally).await?;
                if let Some(key) = RelationKey::new(parent.id, concept.id, RelationType::ParentChild)
                {
                    if concept.parent_id.is_none() {
                        concept.parent_id = Some(parent.id);
                        changed = true;
                    }
                    store.bump_relation(key).await?;
                    tally.relations += 1;
                }
            }

            if changed {
                store.update_concept(&concept).await?;
                tally.updated.insert(concept.id);
            }

            for related_name in &candidate.related {
                let related = self.resolve(store, related_name, &category, tally).await?;
                if let Some(key) = RelationKey::new(concept.id, related.id, RelationType::Related) {
                    store.bump_relation(key).await?;
                    tally.relations += 1;
                }
            }
        }

        let mentioned: Vec<ConceptId> = mentioned.into_iter().collect();
        for (i, &a) in mentioned.iter().enumerate() {
            for &b in &mentioned[i + 1..] {
                if let Some(key) = RelationKey::new(a, b, RelationType::CoOccurs) {
                    store.bump_relation(key).await?;
                    tally.relations += 1;
                }
            }
        }

        debug!(
            segment = segment.index,
            candidates = segment.candidates.len(),
            mentioned = mentioned.len(),
            "segment applied"
        );
        Ok(())
    }

    /// Resolve a raw name to a concept: exact canonical match anywhere, then
    /// the best fuzzy match within `category`, else a new concept.
    async fn resolve<S: KnowledgeStore + ?Sized>(
        &self,
        store: &S,
        raw_name: &str,
        category: &str,
        tally: &mut Tally,
    ) -> Result<Concept> {
        let key = canonical_name(raw_name);

        if let Some(concept) = store.find_concept(&key).await? {
            return Ok(concept);
        }

        if let Some(concept) = self.fuzzy_match(store, &key, category).await? {
            return Ok(concept);
        }

        let concept = store
            .insert_concept(&NewConcept {
                name: key,
                display_name: collapse_whitespace(raw_name),
                category: category.to_string(),
                description: String::new(),
                description_confidence: 0.0,
            })
            .await?;
        tally.created.insert(concept.id);
        Ok(concept)
    }

    async fn fuzzy_match<S: KnowledgeStore + ?Sized>(
        &self,
        store: &S,
        key: &str,
        category: &str,
    ) -> Result<Option<Concept>> {
        let members = store.category_members(category).await?;

        let best = members
            .into_iter()
            .map(|m| (self.similarity.similarity(key, &m.concept.name), m))
            .filter(|(score, _)| *score >= self.threshold)
            .max_by(|(sa, ma), (sb, mb)| {
                sa.total_cmp(sb)
                    .then(ma.occurrences.cmp(&mb.occurrences))
                    .then(mb.concept.id.cmp(&ma.concept.id))
            });

        Ok(best.map(|(score, member)| {
            debug!(
                candidate = key,
                matched = %member.concept.name,
                score,
                "fuzzy concept match"
            );
            member.concept
        }))
    }
}

/// Fold a candidate's evidence into a concept. Returns whether it changed.
fn merge_candidate(concept: &mut Concept, candidate: &Candidate, category: &str) -> bool {
    let mut changed = false;

    let description = candidate.description.trim();
    if !description.is_empty()
        && (concept.description.is_empty()
            || candidate.confidence > concept.description_confidence)
        && concept.description != description
    {
        concept.description = description.to_string();
        concept.description_confidence = candidate.confidence.clamp(0.0, 1.0);
        changed = true;
    }

    if is_uncategorized(&concept.category) && !is_uncategorized(category) {
        concept.category = category.to_string();
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use paperconcepts_shared::{NewPaper, PaperConceptsError};
    use paperconcepts_storage::{CategoryMember, StoreTx};
    use uuid::Uuid;

    use super::*;

    async fn test_storage() -> Storage {
        let path = std::env::temp_dir().join(format!("pc_core_{}.db", Uuid::now_v7()));
        Storage::open(&path).await.expect("open storage")
    }

    async fn paper(storage: &Storage, filename: &str) -> PaperId {
        storage
            .insert_paper(&NewPaper {
                filename: filename.into(),
                year: Some(2021),
                course: Some("q01".into()),
                paper_number: Some(7),
            })
            .await
            .expect("insert")
            .expect("new paper")
            .id
    }

    fn engine() -> ConsolidationEngine {
        ConsolidationEngine::new(ConsolidationConfig::default())
    }

    fn candidate(name: &str, category: &str, confidence: f64, context: &str) -> Candidate {
        Candidate {
            category: category.into(),
            confidence,
            context: context.into(),
            question: Some("q01".into()),
            ..Candidate::named(name)
        }
    }

    fn segment(index: u32, candidates: Vec<Candidate>) -> SegmentCandidates {
        SegmentCandidates { index, candidates }
    }

    #[tokio::test]
    async fn single_concept_single_occurrence() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q01.pdf").await;

        let outcome = engine()
            .consolidate_paper(
                &storage,
                p,
                &[segment(0, vec![candidate("Turing Machine", "Theory", 0.9, "Describe a Turing machine")])],
                ConsolidationMode::Incremental,
            )
            .await
            .expect("consolidate");

        assert_eq!(outcome.summary.new_concepts, 1);
        assert_eq!(outcome.summary.occurrences_written, 1);
        assert_eq!(outcome.summary.relations_touched, 0);
        assert!(outcome.gaps.is_empty());

        let concepts = storage.list_concepts().await.unwrap();
        assert_eq!(concepts.len(), 1);
        assert_eq!(concepts[0].name, "turing machine");
        assert_eq!(concepts[0].display_name, "Turing Machine");
        assert_eq!(storage.occurrences_for_paper(p, false).await.unwrap().len(), 1);
        assert!(storage.list_relations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn co_occurrence_counts_segments() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q02.pdf").await;

        let segments = [
            segment(0, vec![
                candidate("TCP", "Networks", 0.9, "TCP in part one"),
                candidate("Congestion Control", "Networks", 0.8, "congestion in part one"),
            ]),
            segment(1, vec![
                candidate("tcp", "Networks", 0.9, "TCP in part two"),
                candidate("Congestion  control", "Networks", 0.7, "congestion in part two"),
            ]),
        ];
        engine()
            .consolidate_paper(&storage, p, &segments, ConsolidationMode::Incremental)
            .await
            .expect("consolidate");

        assert_eq!(storage.list_concepts().await.unwrap().len(), 2);
        let relations = storage.list_relations().await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, RelationType::CoOccurs);
        assert_eq!(relations[0].strength, 2);
        assert!(relations[0].concept1 < relations[0].concept2);
    }

    #[tokio::test]
    async fn repeated_mentions_across_segments_are_all_recorded() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q04.pdf").await;

        let both = || vec![
            candidate("TCP", "Networks", 0.9, ""),
            candidate("Congestion Control", "Networks", 0.8, ""),
        ];
        let segments = [segment(0, both()), segment(1, both())];

        let first = engine()
            .consolidate_paper(&storage, p, &segments, ConsolidationMode::Incremental)
            .await
            .expect("consolidate");
        assert_eq!(first.summary.occurrences_written, 4);
        assert_eq!(first.summary.occurrences_skipped, 0);

        let relations = storage.list_relations().await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].strength, 2);

        // A second incremental pass sees all four as already recorded.
        let again = engine()
            .consolidate_paper(&storage, p, &segments, ConsolidationMode::Incremental)
            .await
            .expect("consolidate again");
        assert_eq!(again.summary.occurrences_written, 0);
        assert_eq!(again.summary.occurrences_skipped, 4);
        assert_eq!(storage.occurrences_for_paper(p, false).await.unwrap().len(), 4);
        assert_eq!(storage.list_relations().await.unwrap()[0].strength, 2);
    }

    #[tokio::test]
    async fn reprocessing_is_idempotent() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q03.pdf").await;
        let segments = [segment(0, vec![
            Candidate {
                parent: Some("Memory Management".into()),
                related: ["TLB".to_string()].into(),
                ..candidate("Paging", "Operating Systems", 0.9, "explain paging")
            },
            candidate("Segmentation", "Operating Systems", 0.8, "explain segmentation"),
        ])];

        let e = engine();
        e.consolidate_paper(&storage, p, &segments, ConsolidationMode::Incremental).await.unwrap();
        let concepts_before: Vec<String> =
            storage.list_concepts().await.unwrap().into_iter().map(|c| c.name).collect();

        let again = e
            .consolidate_paper(&storage, p, &segments, ConsolidationMode::Incremental)
            .await
            .unwrap();
        assert_eq!(again.summary.occurrences_written, 0);
        assert_eq!(again.summary.occurrences_skipped, 2);
        assert_eq!(again.summary.new_concepts, 0);

        let fresh = e
            .consolidate_paper(&storage, p, &segments, ConsolidationMode::Fresh)
            .await
            .unwrap();
        assert_eq!(fresh.superseded, 2);
        assert_eq!(fresh.summary.occurrences_written, 2);

        let concepts_after: Vec<String> =
            storage.list_concepts().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(concepts_before, concepts_after);
        assert_eq!(storage.occurrences_for_paper(p, false).await.unwrap().len(), 2);
        assert_eq!(storage.occurrences_for_paper(p, true).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn fuzzy_match_stays_within_category() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q04.pdf").await;
        let e = engine();

        e.consolidate_paper(
            &storage,
            p,
            &[segment(0, vec![candidate("Dijkstra's Algorithm", "Algorithms", 0.9, "a")])],
            ConsolidationMode::Incremental,
        )
        .await
        .unwrap();

        let same_category = e
            .consolidate_paper(
                &storage,
                p,
                &[segment(1, vec![candidate("Dijkstras Algorithm", "algorithms", 0.9, "b")])],
                ConsolidationMode::Incremental,
            )
            .await
            .unwrap();
        assert_eq!(same_category.summary.new_concepts, 0);
        assert_eq!(same_category.summary.occurrences_written, 1);
        assert_eq!(storage.list_concepts().await.unwrap().len(), 1);

        let other_category = e
            .consolidate_paper(
                &storage,
                p,
                &[segment(2, vec![candidate("Dijkstras Algorithm", "Graph Theory", 0.9, "c")])],
                ConsolidationMode::Incremental,
            )
            .await
            .unwrap();
        assert_eq!(other_category.summary.new_concepts, 1, "no fuzzy merge across categories");
        assert_eq!(storage.list_concepts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fuzzy_ties_prefer_richer_evidence() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q05.pdf").await;
        let e = engine();

        // Each is one edit from "merge sorts" but two edits from the other.
        e.consolidate_paper(
            &storage,
            p,
            &[segment(0, vec![
                candidate("merge sortz", "Algorithms", 0.9, "x"),
                candidate("nerge sorts", "Algorithms", 0.9, "y"),
                candidate("nerge sorts", "Algorithms", 0.9, "z"),
            ])],
            ConsolidationMode::Incremental,
        )
        .await
        .unwrap();

        let sparse = storage.find_concept_by_name("merge sortz").await.unwrap().unwrap();
        let rich = storage.find_concept_by_name("nerge sorts").await.unwrap().unwrap();

        let outcome = e
            .consolidate_paper(
                &storage,
                p,
                &[segment(1, vec![candidate("merge sorts", "Algorithms", 0.9, "w")])],
                ConsolidationMode::Incremental,
            )
            .await
            .unwrap();
        assert_eq!(outcome.summary.new_concepts, 0);

        let occ = storage.occurrences_for_paper(p, false).await.unwrap();
        assert_eq!(occ.iter().filter(|o| o.concept_id == rich.id).count(), 3);
        assert_eq!(occ.iter().filter(|o| o.concept_id == sparse.id).count(), 1);
    }

    #[tokio::test]
    async fn description_and_category_evolve_with_evidence() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q06.pdf").await;
        let e = engine();

        let first = Candidate {
            description: "weak description".into(),
            ..candidate("Deadlock", "Uncategorized", 0.5, "a")
        };
        let better = Candidate {
            description: "strong description".into(),
            ..candidate("deadlock", "Operating Systems", 0.9, "b")
        };
        let worse = Candidate {
            description: "worse description".into(),
            ..candidate("Deadlock", "Concurrency", 0.6, "c")
        };

        e.consolidate_paper(&storage, p, &[segment(0, vec![first])], ConsolidationMode::Incremental)
            .await
            .unwrap();
        let outcome = e
            .consolidate_paper(&storage, p, &[segment(1, vec![better])], ConsolidationMode::Incremental)
            .await
            .unwrap();
        assert_eq!(outcome.summary.updated_concepts, 1);
        e.consolidate_paper(&storage, p, &[segment(2, vec![worse])], ConsolidationMode::Incremental)
            .await
            .unwrap();

        let concept = storage.find_concept_by_name("deadlock").await.unwrap().unwrap();
        assert_eq!(concept.description, "strong description");
        assert!((concept.description_confidence - 0.9).abs() < 1e-9);
        assert_eq!(concept.category, "Operating Systems");
    }

    #[tokio::test]
    async fn parent_and_related_relations() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q07.pdf").await;

        let outcome = engine()
            .consolidate_paper(
                &storage,
                p,
                &[segment(0, vec![Candidate {
                    parent: Some("Automata Theory".into()),
                    related: ["Halting Problem".to_string(), "turing machine".to_string()].into(),
                    ..candidate("Turing Machine", "Theory", 0.9, "ctx")
                }])],
                ConsolidationMode::Incremental,
            )
            .await
            .unwrap();
        assert_eq!(outcome.summary.new_concepts, 3);

        let tm = storage.find_concept_by_name("turing machine").await.unwrap().unwrap();
        let parent = storage.find_concept_by_name("automata theory").await.unwrap().unwrap();
        assert_eq!(tm.parent_id, Some(parent.id));

        let relations = storage.list_relations().await.unwrap();
        assert!(relations.iter().all(|r| r.concept1 != r.concept2));
        let pc = relations
            .iter()
            .find(|r| r.relation_type == RelationType::ParentChild)
            .expect("parent-child edge");
        assert_eq!((pc.concept1, pc.concept2), (parent.id, tm.id));
        assert_eq!(
            relations.iter().filter(|r| r.relation_type == RelationType::Related).count(),
            1
        );
    }

    /// Delegates to a real transaction but fails occurrence writes whose
    /// context is `"boom"`.
    struct FailingStore {
        inner: StoreTx,
    }

    #[async_trait]
    impl KnowledgeStore for FailingStore {
        async fn find_concept(&self, name: &str) -> Result<Option<Concept>> {
            self.inner.find_concept(name).await
        }
        async fn category_members(&self, category: &str) -> Result<Vec<CategoryMember>> {
            self.inner.category_members(category).await
        }
        async fn insert_concept(&self, concept: &NewConcept) -> Result<Concept> {
            self.inner.insert_concept(concept).await
        }
        async fn update_concept(&self, concept: &Concept) -> Result<()> {
            self.inner.update_concept(concept).await
        }
        async fn live_occurrence_keys(&self, paper: PaperId) -> Result<HashSet<OccurrenceKey>> {
            self.inner.live_occurrence_keys(paper).await
        }
        async fn insert_occurrence(&self, occurrence: &NewOccurrence) -> Result<i64> {
            if occurrence.context == "boom" {
                return Err(PaperConceptsError::Storage("disk I/O error".into()));
            }
            self.inner.insert_occurrence(occurrence).await
        }
        async fn bump_relation(&self, key: RelationKey) -> Result<i64> {
            self.inner.bump_relation(key).await
        }
        async fn savepoint(&self, name: &str) -> Result<()> {
            self.inner.savepoint(name).await
        }
        async fn release(&self, name: &str) -> Result<()> {
            self.inner.release(name).await
        }
        async fn rollback_to(&self, name: &str) -> Result<()> {
            self.inner.rollback_to(name).await
        }
        async fn supersede_occurrences(&self, paper: PaperId) -> Result<u64> {
            self.inner.supersede_occurrences(paper).await
        }
    }

    #[tokio::test]
    async fn failed_segment_is_rolled_back_alone() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q08.pdf").await;
        let store = FailingStore {
            inner: storage.begin_write().await.unwrap(),
        };

        let outcome = engine()
            .write_paper(
                &store,
                p,
                &[
                    segment(0, vec![candidate("Paging", "OS", 0.9, "ok")]),
                    segment(1, vec![
                        candidate("Thrashing", "OS", 0.9, "fine"),
                        candidate("Working Set", "OS", 0.9, "boom"),
                    ]),
                    segment(2, vec![candidate("TLB", "OS", 0.9, "ok")]),
                ],
                ConsolidationMode::Incremental,
            )
            .await
            .expect("paper survives a segment failure");
        store.inner.commit().await.unwrap();

        assert_eq!(outcome.gaps.len(), 1);
        assert_eq!(outcome.gaps[0].index, 1);
        assert_eq!(outcome.summary.new_concepts, 2);
        assert_eq!(outcome.summary.occurrences_written, 2);

        assert!(storage.find_concept_by_name("thrashing").await.unwrap().is_none());
        assert!(storage.find_concept_by_name("working set").await.unwrap().is_none());
        assert!(storage.find_concept_by_name("tlb").await.unwrap().is_some());
        assert_eq!(storage.occurrences_for_paper(p, false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn identical_names_resolve_to_one_concept() {
        let storage = test_storage().await;
        let p = paper(&storage, "2021-p07-q09.pdf").await;
        engine()
            .consolidate_paper(
                &storage,
                p,
                &[
                    segment(0, vec![candidate("Binary  Search", "Algorithms", 0.9, "one")]),
                    segment(1, vec![candidate(" binary search", "Algorithms", 0.8, "two")]),
                ],
                ConsolidationMode::Incremental,
            )
            .await
            .unwrap();
        let concepts = storage.list_concepts().await.unwrap();
        assert_eq!(concepts.len(), 1);
        assert_eq!(storage.occurrences_for_paper(p, false).await.unwrap().len(), 2);
    }
}
