//! Write path of the knowledge store.
//!
//! [`KnowledgeStore`] is the read/write contract consolidation runs against;
//! [`StoreTx`] implements it on a dedicated connection holding the write lock.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, params};
use paperconcepts_shared::{
    Concept, ConceptId, NewConcept, NewOccurrence, PaperConceptsError, PaperId, RelationKey,
    Result,
};

use crate::{CONCEPT_COLUMNS, db_err, row_to_concept};

/// A concept in a category together with its live occurrence count.
#[derive(Debug, Clone)]
pub struct CategoryMember {
    pub concept: Concept,
    pub occurrences: i64,
}

/// Identity of an occurrence for duplicate detection: concept, question
/// label and context within one paper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OccurrenceKey {
    pub concept_id: ConceptId,
    pub question: Option<String>,
    pub context: String,
}

impl From<&NewOccurrence> for OccurrenceKey {
    fn from(occurrence: &NewOccurrence) -> Self {
        Self {
            concept_id: occurrence.concept_id,
            question: occurrence.question.clone(),
            context: occurrence.context.clone(),
        }
    }
}

/// Read/write operations consolidation needs from the store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Look up a concept by canonical name (global scope).
    async fn find_concept(&self, canonical_name: &str) -> Result<Option<Concept>>;

    /// Concepts whose category matches `category` case-insensitively.
    async fn category_members(&self, category: &str) -> Result<Vec<CategoryMember>>;

    /// Create a concept. Fails if the canonical name is taken.
    async fn insert_concept(&self, concept: &NewConcept) -> Result<Concept>;

    /// Persist the mutable fields of a concept (description, category, parent).
    async fn update_concept(&self, concept: &Concept) -> Result<()>;

    /// Keys of the paper's live occurrences.
    async fn live_occurrence_keys(&self, paper: PaperId) -> Result<HashSet<OccurrenceKey>>;

    /// Record an occurrence. Returns its row id.
    async fn insert_occurrence(&self, occurrence: &NewOccurrence) -> Result<i64>;

    /// Create the relation with strength 1, or add 1 to its strength.
    /// Returns the resulting strength.
    async fn bump_relation(&self, key: RelationKey) -> Result<i64>;

    /// Open a nested savepoint.
    async fn savepoint(&self, name: &str) -> Result<()>;

    /// Keep the savepoint's writes as part of the enclosing transaction.
    async fn release(&self, name: &str) -> Result<()>;

    /// Undo the savepoint's writes and close it.
    async fn rollback_to(&self, name: &str) -> Result<()>;

    /// Mark every live occurrence of a paper superseded. Returns how many.
    async fn supersede_occurrences(&self, paper: PaperId) -> Result<u64>;
}

/// An open write transaction.
///
/// Dropping it without [`commit`](Self::commit) closes the connection, which
/// discards every uncommitted write.
pub struct StoreTx {
    conn: Connection,
}

impl StoreTx {
    pub(crate) async fn begin(conn: Connection) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE").await.map_err(db_err)?;
        Ok(Self { conn })
    }

    /// Commit everything written through this transaction.
    pub async fn commit(self) -> Result<()> {
        self.conn.execute_batch("COMMIT").await.map_err(db_err)?;
        Ok(())
    }

    /// Discard everything written through this transaction.
    pub async fn rollback(self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").await.map_err(db_err)?;
        Ok(())
    }
}

fn savepoint_ident(name: &str) -> Result<&str> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(PaperConceptsError::validation(format!(
            "invalid savepoint name: {name:?}"
        )))
    }
}

#[async_trait]
impl KnowledgeStore for StoreTx {
    async fn find_concept(&self, canonical_name: &str) -> Result<Option<Concept>> {
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

    async fn category_members(&self, category: &str) -> Result<Vec<CategoryMember>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.name, c.display_name, c.category, c.description,
                        c.description_confidence, c.parent_id, c.created_at, c.updated_at,
                        (SELECT COUNT(*) FROM occurrences o
                          WHERE o.concept_id = c.id AND o.superseded = 0)
                 FROM concepts c
                 WHERE lower(c.category) = lower(?1)
                 ORDER BY c.id",
                params![category.trim()],
            )
            .await
            .map_err(db_err)?;

        let mut members = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            members.push(CategoryMember {
                concept: row_to_concept(&row, 0)?,
                occurrences: row.get::<i64>(9).map_err(db_err)?,
            });
        }
        Ok(members)
    }

    async fn insert_concept(&self, concept: &NewConcept) -> Result<Concept> {
        let now = Utc::now();
        let ts = now.to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO concepts (name, display_name, category, description,
                                       description_confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    concept.name.as_str(),
                    concept.display_name.as_str(),
                    concept.category.as_str(),
                    concept.description.as_str(),
                    concept.description_confidence,
                    ts.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        Ok(Concept {
            id: ConceptId(self.conn.last_insert_rowid()),
            name: concept.name.clone(),
            display_name: concept.display_name.clone(),
            category: concept.category.clone(),
            description: concept.description.clone(),
            description_confidence: concept.description_confidence,
            parent_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_concept(&self, concept: &Concept) -> Result<()> {
        if concept.parent_id == Some(concept.id) {
            return Err(PaperConceptsError::validation(format!(
                "concept {} cannot be its own parent",
                concept.id
            )));
        }
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE concepts SET category = ?1, description = ?2, description_confidence = ?3,
                                     parent_id = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    concept.category.as_str(),
                    concept.description.as_str(),
                    concept.description_confidence,
                    concept.parent_id.map(|p| p.0),
                    now.as_str(),
                    concept.id.0,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn live_occurrence_keys(&self, paper: PaperId) -> Result<HashSet<OccurrenceKey>> {
        let mut rows = self
            .conn
            .query(
                "SELECT concept_id, question, context FROM occurrences
                 WHERE paper_id = ?1 AND superseded = 0",
                params![paper.0],
            )
            .await
            .map_err(db_err)?;

        let mut keys = HashSet::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            keys.insert(OccurrenceKey {
                concept_id: ConceptId(row.get::<i64>(0).map_err(db_err)?),
                question: row.get::<String>(1).ok(),
                context: row.get::<String>(2).unwrap_or_default(),
            });
        }
        Ok(keys)
    }

    async fn insert_occurrence(&self, occurrence: &NewOccurrence) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO occurrences (concept_id, paper_id, question, context, confidence,
                                          segment_index, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    occurrence.concept_id.0,
                    occurrence.paper_id.0,
                    occurrence.question.as_deref(),
                    occurrence.context.as_str(),
                    occurrence.confidence.clamp(0.0, 1.0),
                    i64::from(occurrence.segment_index),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn savepoint(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", savepoint_ident(name)?))
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn release(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {}", savepoint_ident(name)?))
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn rollback_to(&self, name: &str) -> Result<()> {
        let name = savepoint_ident(name)?;
        self.conn
            .execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};"
            ))
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn supersede_occurrences(&self, paper: PaperId) -> Result<u64> {
        self.conn
            .execute(
                "UPDATE occurrences SET superseded = 1 WHERE paper_id = ?1 AND superseded = 0",
                params![paper.0],
            )
            .await
            .map_err(db_err)
    }

    async fn bump_relation(&self, key: RelationKey) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO concept_relations (concept1_id, concept2_id, relation_type, strength, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(concept1_id, concept2_id, relation_type) DO UPDATE SET
                   strength = strength + 1,
                   updated_at = excluded.updated_at",
                params![
                    key.concept1().0,
                    key.concept2().0,
                    key.relation_type().as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        let mut rows = self
            .conn
            .query(
                "SELECT strength FROM concept_relations
                 WHERE concept1_id = ?1 AND concept2_id = ?2 AND relation_type = ?3",
                params![
                    key.concept1().0,
                    key.concept2().0,
                    key.relation_type().as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<i64>(0).map_err(db_err),
            None => Err(PaperConceptsError::Storage(
                "relation missing after upsert".into(),
            )),
        }
    }
}
