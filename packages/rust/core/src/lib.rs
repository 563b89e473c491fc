//! Pipeline orchestration and domain logic for the paper concept analyzer.
//!
//! Ties text extraction, model-backed concept extraction, and consolidation
//! into end-to-end workflows ([`PaperIngestor::ingest`],
//! [`AnalysisPipeline::analyze`]), and answers trend queries over the
//! resulting concept graph.

pub mod consolidation;
pub mod ingest;
pub mod pipeline;
pub mod query;
pub mod similarity;

pub use consolidation::{
    ConsolidationEngine, ConsolidationMode, ConsolidationSummary, PaperConsolidation,
    SegmentCandidates,
};
pub use ingest::{IngestReport, PaperIngestor, parse_filename};
pub use pipeline::{
    AnalysisPipeline, AnalyzeOptions, PaperReport, PipelineConfig, ProgressReporter, RunReport,
    SilentProgress,
};
pub use query::{ConceptReport, ConceptTrend, QueryEngine};
pub use similarity::{Levenshtein, NameSimilarity, TokenSet, similarity_for};

/// A segment that contributed nothing to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentGap {
    pub index: u32,
    pub reason: String,
}
