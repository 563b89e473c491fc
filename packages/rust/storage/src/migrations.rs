//! SQL migration definitions for the concept knowledge base.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: papers, concepts, occurrences, concept_relations, extraction_cache",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Source documents
CREATE TABLE IF NOT EXISTS papers (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    filename       TEXT NOT NULL UNIQUE,
    year           INTEGER,
    course         TEXT,
    paper_number   INTEGER,
    status         TEXT NOT NULL DEFAULT 'unprocessed'
                   CHECK (status IN ('unprocessed', 'extracted', 'analyzed', 'failed')),
    processed_at   TEXT,
    failure_reason TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_papers_status ON papers(status);
CREATE INDEX IF NOT EXISTS idx_papers_year ON papers(year);

-- Canonical concepts
CREATE TABLE IF NOT EXISTS concepts (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    name                   TEXT NOT NULL UNIQUE,
    display_name           TEXT NOT NULL,
    category               TEXT NOT NULL,
    description            TEXT NOT NULL DEFAULT '',
    description_confidence REAL NOT NULL DEFAULT 0.0,
    parent_id              INTEGER REFERENCES concepts(id),
    created_at             TEXT NOT NULL,
    updated_at             TEXT NOT NULL,
    CHECK (parent_id IS NULL OR parent_id <> id)
);

CREATE INDEX IF NOT EXISTS idx_concepts_category ON concepts(lower(category));

-- Mentions of a concept in a paper
CREATE TABLE IF NOT EXISTS occurrences (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    concept_id    INTEGER NOT NULL REFERENCES concepts(id),
    paper_id      INTEGER NOT NULL REFERENCES papers(id),
    question      TEXT,
    context       TEXT NOT NULL DEFAULT '',
    confidence    REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
    segment_index INTEGER NOT NULL DEFAULT 0,
    superseded    INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_occurrences_paper ON occurrences(paper_id, superseded);
CREATE INDEX IF NOT EXISTS idx_occurrences_concept ON occurrences(concept_id, superseded);

-- Edges between distinct concepts
CREATE TABLE IF NOT EXISTS concept_relations (
    concept1_id   INTEGER NOT NULL REFERENCES concepts(id),
    concept2_id   INTEGER NOT NULL REFERENCES concepts(id),
    relation_type TEXT NOT NULL CHECK (relation_type IN ('related', 'parent-child', 'co-occurs')),
    strength      INTEGER NOT NULL DEFAULT 1,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (concept1_id, concept2_id, relation_type),
    CHECK (concept1_id <> concept2_id)
);

CREATE INDEX IF NOT EXISTS idx_relations_concept2 ON concept_relations(concept2_id);

-- Validated model responses keyed by prompt hash
CREATE TABLE IF NOT EXISTS extraction_cache (
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    response    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (prompt_hash, model_id)
);

-- Full-text search on concepts
CREATE VIRTUAL TABLE IF NOT EXISTS concepts_fts USING fts5(
    display_name,
    category,
    description,
    content=concepts,
    content_rowid=id
);

-- Triggers to keep FTS in sync with concepts table
CREATE TRIGGER IF NOT EXISTS concepts_fts_insert AFTER INSERT ON concepts BEGIN
    INSERT INTO concepts_fts(rowid, display_name, category, description)
    VALUES (new.id, new.display_name, new.category, new.description);
END;

CREATE TRIGGER IF NOT EXISTS concepts_fts_delete AFTER DELETE ON concepts BEGIN
    INSERT INTO concepts_fts(concepts_fts, rowid, display_name, category, description)
    VALUES ('delete', old.id, old.display_name, old.category, old.description);
END;

CREATE TRIGGER IF NOT EXISTS concepts_fts_update AFTER UPDATE ON concepts BEGIN
    INSERT INTO concepts_fts(concepts_fts, rowid, display_name, category, description)
    VALUES ('delete', old.id, old.display_name, old.category, old.description);
    INSERT INTO concepts_fts(rowid, display_name, category, description)
    VALUES (new.id, new.display_name, new.category, new.description);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
