//! libSQL storage layer for the concept knowledge base (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding papers, concepts,
//! occurrences, concept relations, the extraction response cache, and a
//! full-text index over concepts.
//!
//! **Access rules:**
//! - Consolidation writes only through [`StoreTx`], one write transaction per
//!   paper with a savepoint per segment
//! - Queries read through [`Storage`] directly, or via [`Storage::open_readonly`]

mod knowledge;
mod migrations;
mod queries;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use paperconcepts_shared::{
    Concept, ConceptId, NewPaper, Occurrence, Paper, PaperConceptsError, PaperId, PaperStatus,
    Result,
};

pub use knowledge::{CategoryMember, KnowledgeStore, OccurrenceKey, StoreTx};
pub use queries::{
    CategorySummary, ConceptDetails, ConceptFrequency, ConceptHit, CoOccurrence, PaperMention,
    RelatedConcept, StoreStats, YearCount,
};

/// How long a connection waits on another writer's lock before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("readonly", &self.readonly)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PaperConceptsError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .await
            .map_err(db_err)?;
        configure_connection(&conn).await?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PaperConceptsError::NotFound(format!(
                "database {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        configure_connection(&conn).await?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PaperConceptsError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PaperConceptsError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Open a write transaction on a dedicated connection.
    ///
    /// The transaction takes the write lock immediately, so concurrent papers
    /// queue on the lock instead of interleaving their writes.
    pub async fn begin_write(&self) -> Result<StoreTx> {
        self.check_writable()?;
        let conn = self.db.connect().map_err(db_err)?;
        configure_connection(&conn).await?;
        StoreTx::begin(conn).await
    }

    // -----------------------------------------------------------------------
    // Paper operations
    // -----------------------------------------------------------------------

    /// Register a paper. Returns `None` if the filename is already registered.
    pub async fn insert_paper(&self, paper: &NewPaper) -> Result<Option<Paper>> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO papers (filename, year, course, paper_number, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'unprocessed', ?5)
                 ON CONFLICT(filename) DO NOTHING",
                params![
                    paper.filename.as_str(),
                    paper.year.map(i64::from),
                    paper.course.as_deref(),
                    paper.paper_number.map(i64::from),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        if inserted == 0 {
            return Ok(None);
        }
        self.get_paper_by_filename(&paper.filename).await
    }

    /// Get a paper by ID.
    pub async fn get_paper(&self, id: PaperId) -> Result<Option<Paper>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PAPER_COLUMNS} FROM papers WHERE id = ?1"),
                params![id.0],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_paper(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a paper by its source filename.
    pub async fn get_paper_by_filename(&self, filename: &str) -> Result<Option<Paper>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PAPER_COLUMNS} FROM papers WHERE filename = ?1"),
                params![filename],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_paper(&row)?)),
            None => Ok(None),
        }
    }

    /// All registered filenames.
    pub async fn paper_filenames(&self) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query("SELECT filename FROM papers", params![])
            .await
            .map_err(db_err)?;

        let mut names = HashSet::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            names.insert(row.get::<String>(0).map_err(db_err)?);
        }
        Ok(names)
    }

    /// Papers waiting for analysis (`unprocessed`, or `extracted` by an
    /// interrupted run), oldest first.
    pub async fn pending_papers(&self, limit: Option<usize>) -> Result<Vec<Paper>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PAPER_COLUMNS} FROM papers
                     WHERE status IN ('unprocessed', 'extracted')
                     ORDER BY id LIMIT ?1"
                ),
                params![limit],
            )
            .await
            .map_err(db_err)?;

        let mut papers = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            papers.push(row_to_paper(&row)?);
        }
        Ok(papers)
    }

    /// List papers, optionally filtered by year and course.
    pub async fn list_papers(&self, year: Option<i32>, course: Option<&str>) -> Result<Vec<Paper>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PAPER_COLUMNS} FROM papers
                     WHERE (?1 IS NULL OR year = ?1) AND (?2 IS NULL OR course = ?2)
                     ORDER BY year, paper_number, course, filename"
                ),
                params![year.map(i64::from), course],
            )
            .await
            .map_err(db_err)?;

        let mut papers = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            papers.push(row_to_paper(&row)?);
        }
        Ok(papers)
    }

    /// Move a paper to `status`, enforcing forward-only transitions unless
    /// `reprocess` is set. `reason` is recorded for `failed` and cleared otherwise.
    pub async fn set_paper_status(
        &self,
        id: PaperId,
        status: PaperStatus,
        reason: Option<&str>,
        reprocess: bool,
    ) -> Result<()> {
        self.check_writable()?;
        let current = self
            .get_paper(id)
            .await?
            .ok_or_else(|| PaperConceptsError::NotFound(format!("paper {id}")))?;

        if !current.status.can_transition_to(status, reprocess) {
            return Err(PaperConceptsError::validation(format!(
                "paper {id}: cannot move from {} to {status}",
                current.status
            )));
        }

        let now = Utc::now().to_rfc3339();
        let reason = if status == PaperStatus::Failed {
            reason
        } else {
            None
        };
        self.conn
            .execute(
                "UPDATE papers SET status = ?1, processed_at = ?2, failure_reason = ?3 WHERE id = ?4",
                params![status.as_str(), now.as_str(), reason, id.0],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Extraction cache operations
    // -----------------------------------------------------------------------

    /// Get a cached model response.
    pub async fn get_cached_response(
        &self,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT response FROM extraction_cache WHERE prompt_hash = ?1 AND model_id = ?2",
                params![prompt_hash, model_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// Store a validated model response in the cache (upserts).
    pub async fn put_cached_response(
        &self,
        prompt_hash: &str,
        model_id: &str,
        response: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO extraction_cache (prompt_hash, model_id, response, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(prompt_hash, model_id) DO UPDATE SET
                   response = excluded.response,
                   created_at = excluded.created_at",
                params![prompt_hash, model_id, response, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Drop every cached response.
    pub async fn clear_cache(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM extraction_cache", params![])
            .await
            .map_err(db_err)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub(crate) const PAPER_COLUMNS: &str =
    "id, filename, year, course, paper_number, status, processed_at, failure_reason, created_at";

pub(crate) const CONCEPT_COLUMNS: &str = "id, name, display_name, category, description, \
     description_confidence, parent_id, created_at, updated_at";

pub(crate) const OCCURRENCE_COLUMNS: &str = "id, concept_id, paper_id, question, context, \
     confidence, segment_index, superseded, created_at";

/// Apply per-connection settings.
async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}; PRAGMA foreign_keys = ON;"
    ))
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Map a libSQL error, separating lock contention from other failures.
pub(crate) fn db_err(e: libsql::Error) -> PaperConceptsError {
    let msg = e.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("database is locked") || lower.contains("busy") {
        PaperConceptsError::StorageBusy(msg)
    } else {
        PaperConceptsError::Storage(msg)
    }
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PaperConceptsError::Storage(format!("invalid date {s:?}: {e}")))
}

/// Convert a database row (selected with [`PAPER_COLUMNS`]) to a [`Paper`].
pub(crate) fn row_to_paper(row: &libsql::Row) -> Result<Paper> {
    let status: String = row.get(5).map_err(db_err)?;
    Ok(Paper {
        id: PaperId(row.get::<i64>(0).map_err(db_err)?),
        filename: row.get::<String>(1).map_err(db_err)?,
        year: row.get::<i64>(2).ok().map(|v| v as i32),
        course: row.get::<String>(3).ok(),
        paper_number: row.get::<i64>(4).ok().map(|v| v as i32),
        status: status.parse()?,
        processed_at: match row.get::<String>(6).ok() {
            Some(s) => Some(parse_ts(&s)?),
            None => None,
        },
        failure_reason: row.get::<String>(7).ok(),
        created_at: parse_ts(&row.get::<String>(8).map_err(db_err)?)?,
    })
}

/// Convert a database row (selected with [`CONCEPT_COLUMNS`], starting at
/// `offset`) to a [`Concept`].
pub(crate) fn row_to_concept(row: &libsql::Row, offset: i32) -> Result<Concept> {
    Ok(Concept {
        id: ConceptId(row.get::<i64>(offset).map_err(db_err)?),
        name: row.get::<String>(offset + 1).map_err(db_err)?,
        display_name: row.get::<String>(offset + 2).map_err(db_err)?,
        category: row.get::<String>(offset + 3).map_err(db_err)?,
        description: row.get::<String>(offset + 4).unwrap_or_default(),
        description_confidence: row.get::<f64>(offset + 5).unwrap_or(0.0),
        parent_id: row.get::<i64>(offset + 6).ok().map(ConceptId),
        created_at: parse_ts(&row.get::<String>(offset + 7).map_err(db_err)?)?,
        updated_at: parse_ts(&row.get::<String>(offset + 8).map_err(db_err)?)?,
    })
}

/// Convert a database row (selected with [`OCCURRENCE_COLUMNS`]) to an [`Occurrence`].
pub(crate) fn row_to_occurrence(row: &libsql::Row) -> Result<Occurrence> {
    Ok(Occurrence {
        id: row.get::<i64>(0).map_err(db_err)?,
        concept_id: ConceptId(row.get::<i64>(1).map_err(db_err)?),
        paper_id: PaperId(row.get::<i64>(2).map_err(db_err)?),
        question: row.get::<String>(3).ok(),
        context: row.get::<String>(4).unwrap_or_default(),
        confidence: row.get::<f64>(5).map_err(db_err)?,
        segment_index: row.get::<i64>(6).map_err(db_err)? as u32,
        superseded: row.get::<i64>(7).map_err(db_err)? != 0,
        created_at: parse_ts(&row.get::<String>(8).map_err(db_err)?)?,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{new_paper, test_storage};
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.schema_version().await, 1);
    }

    #[tokio::test]
    async fn debug_output_shows_mode() {
        let storage = test_storage().await;
        assert_eq!(format!("{storage:?}"), "Storage { readonly: false, .. }");
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("pc_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.schema_version().await, 1);
    }

    #[tokio::test]
    async fn paper_registration_is_unique_by_filename() {
        let storage = test_storage().await;

        let paper = storage
            .insert_paper(&new_paper("2021-p07-q08-solutions.pdf", 2021))
            .await
            .expect("insert paper")
            .expect("newly registered");
        assert_eq!(paper.status, PaperStatus::Unprocessed);
        assert_eq!(paper.year, Some(2021));

        let again = storage
            .insert_paper(&new_paper("2021-p07-q08-solutions.pdf", 2021))
            .await
            .expect("insert duplicate");
        assert!(again.is_none());

        let names = storage.paper_filenames().await.expect("filenames");
        assert_eq!(names.len(), 1);
        assert!(names.contains("2021-p07-q08-solutions.pdf"));
    }

    #[tokio::test]
    async fn status_transitions_are_forward_only() {
        let storage = test_storage().await;
        let paper = storage
            .insert_paper(&new_paper("a.pdf", 2020))
            .await
            .unwrap()
            .unwrap();

        storage
            .set_paper_status(paper.id, PaperStatus::Extracted, None, false)
            .await
            .expect("to extracted");
        storage
            .set_paper_status(paper.id, PaperStatus::Analyzed, None, false)
            .await
            .expect("to analyzed");

        let back = storage
            .set_paper_status(paper.id, PaperStatus::Extracted, None, false)
            .await;
        assert!(back.is_err());

        storage
            .set_paper_status(paper.id, PaperStatus::Extracted, None, true)
            .await
            .expect("reprocess may move back");
        storage
            .set_paper_status(paper.id, PaperStatus::Failed, Some("no text"), false)
            .await
            .expect("to failed");

        let found = storage.get_paper(paper.id).await.unwrap().unwrap();
        assert_eq!(found.status, PaperStatus::Failed);
        assert_eq!(found.failure_reason.as_deref(), Some("no text"));
        assert!(found.processed_at.is_some());
    }

    #[tokio::test]
    async fn pending_and_listing() {
        let storage = test_storage().await;
        let a = storage.insert_paper(&new_paper("a.pdf", 2019)).await.unwrap().unwrap();
        let b = storage.insert_paper(&new_paper("b.pdf", 2020)).await.unwrap().unwrap();
        storage.insert_paper(&new_paper("c.pdf", 2020)).await.unwrap();

        storage
            .set_paper_status(a.id, PaperStatus::Extracted, None, false)
            .await
            .unwrap();
        storage
            .set_paper_status(b.id, PaperStatus::Failed, Some("x"), false)
            .await
            .unwrap();

        let pending = storage.pending_papers(None).await.expect("pending");
        let names: Vec<_> = pending.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "c.pdf"]);

        let limited = storage.pending_papers(Some(1)).await.expect("pending");
        assert_eq!(limited.len(), 1);

        let in_2020 = storage.list_papers(Some(2020), None).await.expect("list");
        assert_eq!(in_2020.len(), 2);
        let all = storage.list_papers(None, Some("q01")).await.expect("list");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn extraction_cache() {
        let storage = test_storage().await;

        // Miss
        let cached = storage
            .get_cached_response("hash1", "gpt-4o")
            .await
            .expect("get cache miss");
        assert!(cached.is_none());

        // Set
        storage
            .put_cached_response("hash1", "gpt-4o", r#"{"concepts": []}"#)
            .await
            .expect("set cache");

        // Hit, and keyed by model too
        let cached = storage
            .get_cached_response("hash1", "gpt-4o")
            .await
            .expect("get cache hit");
        assert!(cached.expect("cached").contains("concepts"));
        assert!(
            storage
                .get_cached_response("hash1", "other-model")
                .await
                .unwrap()
                .is_none()
        );

        assert_eq!(storage.clear_cache().await.expect("clear"), 1);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("pc_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_paper(&new_paper("a.pdf", 2020)).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.insert_paper(&new_paper("b.pdf", 2020)).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
        assert!(ro.begin_write().await.is_err());
        assert_eq!(ro.list_papers(None, None).await.unwrap().len(), 1);
    }

    #[test]
    fn lock_errors_are_busy() {
        let err = db_err(libsql::Error::ConnectionFailed("database is locked".into()));
        assert!(err.is_storage_busy());
        let err = db_err(libsql::Error::ConnectionFailed("no such table".into()));
        assert!(!err.is_storage_busy());
    }
}
