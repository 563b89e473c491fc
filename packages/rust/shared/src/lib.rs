//! Shared types, error model, and configuration for the paper concept analyzer.
//!
//! This crate is the foundation depended on by all other crates.
//! It provides:
//! - [`PaperConceptsError`]: the unified error type
//! - Domain types ([`Paper`], [`Concept`], [`Occurrence`], [`ConceptRelation`], [`Candidate`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClientConfig, ConsolidationConfig, ExtractionSettings, LlmConfig, PathsConfig,
    SegmenterConfig, SimilarityKind, SourceConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{PaperConceptsError, Result};
pub use types::{
    Candidate, Concept, ConceptId, ConceptRelation, NewConcept, NewOccurrence, NewPaper,
    Occurrence, Paper, PaperId, PaperStatus, RelationKey, RelationType, UNCATEGORIZED,
    canonical_category, canonical_name, collapse_whitespace, is_uncategorized,
};
