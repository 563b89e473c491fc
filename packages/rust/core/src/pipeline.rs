//! End-to-end analysis: paper file → text → segments → candidates → store.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use paperconcepts_extraction::{
    ExtractionClient, PromptTemplate, Segment, SegmentRequest, Segmenter, prompt_hash,
};
use paperconcepts_shared::{
    AppConfig, Candidate, Paper, PaperConceptsError, PaperId, PaperStatus, Result,
    SegmenterConfig,
};
use paperconcepts_source::{DocumentText, DocumentTextSource};
use paperconcepts_storage::Storage;

use crate::SegmentGap;
use crate::consolidation::{
    ConsolidationEngine, ConsolidationMode, ConsolidationSummary, SegmentCandidates,
};

/// Pipeline settings that are not owned by a component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory paper filenames are resolved against.
    pub pdf_dir: PathBuf,
    pub segmenter: SegmenterConfig,
    /// Papers processed concurrently.
    pub parallel_papers: usize,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            pdf_dir: PathBuf::from(&config.paths.pdf_dir),
            segmenter: SegmenterConfig::from(config),
            parallel_papers: config.extraction.parallel_papers,
        }
    }
}

/// Which papers an analysis run covers.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Maximum number of papers.
    pub limit: Option<usize>,
    /// Re-analyze papers already analyzed or failed, superseding their
    /// earlier occurrences.
    pub reprocess: bool,
    /// Restrict the run to these papers. Empty means every eligible paper.
    pub papers: Vec<PaperId>,
}

/// Outcome for one paper.
#[derive(Debug, Clone)]
pub struct PaperReport {
    pub paper_id: PaperId,
    pub filename: String,
    pub status: PaperStatus,
    pub segments: usize,
    /// Segments answered from the response cache.
    pub cached_segments: usize,
    pub summary: ConsolidationSummary,
    /// Segments that contributed nothing, with the reason.
    pub gaps: Vec<SegmentGap>,
    pub failure: Option<String>,
}

impl PaperReport {
    fn new(paper: &Paper) -> Self {
        Self {
            paper_id: paper.id,
            filename: paper.filename.clone(),
            status: paper.status,
            segments: 0,
            cached_segments: 0,
            summary: ConsolidationSummary::default(),
            gaps: Vec::new(),
            failure: None,
        }
    }

    fn failed(mut self, reason: impl Into<String>) -> Self {
        self.status = PaperStatus::Failed;
        self.failure = Some(reason.into());
        self
    }
}

/// Outcome of an analysis run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub papers: Vec<PaperReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn analyzed(&self) -> usize {
        self.count(PaperStatus::Analyzed)
    }

    pub fn failed(&self) -> usize {
        self.count(PaperStatus::Failed)
    }

    pub fn gaps(&self) -> usize {
        self.papers.iter().map(|p| p.gaps.len()).sum()
    }

    fn count(&self, status: PaperStatus) -> usize {
        self.papers.iter().filter(|p| p.status == status).count()
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a paper's processing starts.
    fn paper_started(&self, paper: &Paper, current: usize, total: usize);
    /// Called when a paper reaches its final status.
    fn paper_finished(&self, report: &PaperReport);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn paper_started(&self, _paper: &Paper, _current: usize, _total: usize) {}
    fn paper_finished(&self, _report: &PaperReport) {}
    fn done(&self, _report: &RunReport) {}
}

/// Runs papers through extraction and consolidation.
#[derive(Clone)]
pub struct AnalysisPipeline {
    storage: Arc<Storage>,
    source: Arc<dyn DocumentTextSource>,
    client: ExtractionClient,
    engine: ConsolidationEngine,
    prompt: PromptTemplate,
    segmenter: Segmenter,
    pdf_dir: PathBuf,
    parallel_papers: usize,
}

impl AnalysisPipeline {
    pub fn new(
        storage: Arc<Storage>,
        source: Arc<dyn DocumentTextSource>,
        client: ExtractionClient,
        engine: ConsolidationEngine,
        prompt: PromptTemplate,
        config: PipelineConfig,
    ) -> Self {
        Self {
            storage,
            source,
            client,
            engine,
            prompt,
            segmenter: Segmenter::new(config.segmenter),
            pdf_dir: config.pdf_dir,
            parallel_papers: config.parallel_papers.max(1),
        }
    }

    /// Papers selected by `options`.
    async fn select_papers(&self, options: &AnalyzeOptions) -> Result<Vec<Paper>> {
        let mut papers = if options.papers.is_empty() {
            if options.reprocess {
                self.storage.list_papers(None, None).await?
            } else {
                self.storage.pending_papers(None).await?
            }
        } else {
            let mut selected = Vec::with_capacity(options.papers.len());
            for id in &options.papers {
                let paper = self
                    .storage
                    .get_paper(*id)
                    .await?
                    .ok_or_else(|| PaperConceptsError::NotFound(format!("paper {id}")))?;
                let pending = matches!(paper.status, PaperStatus::Unprocessed | PaperStatus::Extracted);
                if pending || options.reprocess {
                    selected.push(paper);
                } else {
                    info!(paper = %id, status = %paper.status, "already processed, skipping (use reprocess)");
                }
            }
            selected
        };

        if let Some(limit) = options.limit {
            papers.truncate(limit);
        }
        Ok(papers)
    }

    /// Analyze the selected papers, up to `parallel_papers` at a time.
    ///
    /// A paper's failure is recorded in its report and does not stop the
    /// run. A permanent provider rejection aborts every in-flight paper,
    /// marks them failed, and is returned as the error.
    #[instrument(skip_all, fields(limit = ?options.limit, reprocess = options.reprocess))]
    pub async fn analyze(
        &self,
        options: &AnalyzeOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let start = Instant::now();
        progress.phase("Selecting papers");
        let papers = self.select_papers(options).await?;
        let total = papers.len();
        info!(papers = total, parallel = self.parallel_papers, "starting analysis");

        progress.phase("Analyzing papers");
        let mut report = RunReport::default();
        let mut queue = papers.into_iter().enumerate();
        let mut tasks: JoinSet<(PaperId, Result<PaperReport>)> = JoinSet::new();
        let mut in_flight: HashSet<PaperId> = HashSet::new();

        loop {
            while tasks.len() < self.parallel_papers {
                let Some((i, paper)) = queue.next() else {
                    break;
                };
                progress.paper_started(&paper, i + 1, total);
                in_flight.insert(paper.id);
                let this = self.clone();
                let reprocess = options.reprocess;
                tasks.spawn(async move {
                    let id = paper.id;
                    (id, this.run_paper(paper, reprocess).await)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (id, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "paper task failed");
                    continue;
                }
            };
            in_flight.remove(&id);

            match result {
                Ok(paper_report) => {
                    progress.paper_finished(&paper_report);
                    report.papers.push(paper_report);
                }
                Err(e) => {
                    error!(paper = %id, error = %e, "provider rejected request, aborting run");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    in_flight.insert(id);
                    self.fail_unfinished(&in_flight, &format!("run aborted: {e}")).await;
                    return Err(e);
                }
            }
        }

        // Tasks that panicked never reported back.
        self.fail_unfinished(&in_flight, "processing task did not complete").await;

        report.elapsed = start.elapsed();
        progress.done(&report);
        info!(
            analyzed = report.analyzed(),
            failed = report.failed(),
            gaps = report.gaps(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "analysis complete"
        );
        Ok(report)
    }

    /// Mark papers left mid-flight as failed, so no half-processed status
    /// remains.
    async fn fail_unfinished(&self, papers: &HashSet<PaperId>, reason: &str) {
        for &id in papers {
            let status = match self.storage.get_paper(id).await {
                Ok(Some(paper)) => paper.status,
                Ok(None) => continue,
                Err(e) => {
                    warn!(paper = %id, error = %e, "could not read paper status");
                    continue;
                }
            };
            if status == PaperStatus::Extracted {
                if let Err(e) = self
                    .storage
                    .set_paper_status(id, PaperStatus::Failed, Some(reason), false)
                    .await
                {
                    warn!(paper = %id, error = %e, "could not mark paper failed");
                }
            }
        }
    }

    /// Process one paper, converting every non-systemic error into a failed
    /// report.
    async fn run_paper(&self, paper: Paper, reprocess: bool) -> Result<PaperReport> {
        let base = PaperReport::new(&paper);
        let id = paper.id;
        match self.process_paper(&paper, reprocess).await {
            Ok(report) => Ok(report),
            Err(e) if e.is_systemic() => Err(e),
            Err(e) => {
                warn!(paper = %id, error = %e, "paper failed");
                let reason = e.to_string();
                if let Err(status_err) = self
                    .storage
                    .set_paper_status(id, PaperStatus::Failed, Some(&reason), true)
                    .await
                {
                    warn!(paper = %id, error = %status_err, "could not mark paper failed");
                }
                Ok(base.failed(reason))
            }
        }
    }

    #[instrument(skip_all, fields(paper = %paper.id, filename = %paper.filename))]
    async fn process_paper(&self, paper: &Paper, reprocess: bool) -> Result<PaperReport> {
        let mut report = PaperReport::new(paper);

        let path = self.pdf_dir.join(&paper.filename);
        let doc = self.source.extract(&path).await?;
        self.storage
            .set_paper_status(paper.id, PaperStatus::Extracted, None, reprocess)
            .await?;

        let segments: Vec<Segment> = self.segmenter.segments(&doc.text).collect();
        report.segments = segments.len();
        if segments.is_empty() {
            info!("document has no text, nothing to extract");
            self.storage
                .set_paper_status(paper.id, PaperStatus::Analyzed, None, reprocess)
                .await?;
            report.status = PaperStatus::Analyzed;
            return Ok(report);
        }

        let extracted = self.extract_segments(paper, &doc, &segments, &mut report).await?;
        if extracted.is_empty() {
            let reason = format!(
                "all {} segments failed: {}",
                segments.len(),
                report.gaps.first().map_or("no result", |g| g.reason.as_str())
            );
            self.storage
                .set_paper_status(paper.id, PaperStatus::Failed, Some(&reason), reprocess)
                .await?;
            return Ok(report.failed(reason));
        }

        let mode = if reprocess {
            ConsolidationMode::Fresh
        } else {
            ConsolidationMode::Incremental
        };
        let consolidated = self
            .engine
            .consolidate_paper(&self.storage, paper.id, &extracted, mode)
            .await?;
        report.summary = consolidated.summary;
        report.gaps.extend(consolidated.gaps);
        report.gaps.sort_by_key(|g| g.index);

        if report.gaps.len() >= segments.len() {
            let reason = format!("all {} segments failed", segments.len());
            self.storage
                .set_paper_status(paper.id, PaperStatus::Failed, Some(&reason), reprocess)
                .await?;
            return Ok(report.failed(reason));
        }

        self.storage
            .set_paper_status(paper.id, PaperStatus::Analyzed, None, reprocess)
            .await?;
        report.status = PaperStatus::Analyzed;
        info!(
            segments = report.segments,
            cached = report.cached_segments,
            gaps = report.gaps.len(),
            occurrences = report.summary.occurrences_written,
            "paper analyzed"
        );
        Ok(report)
    }

    /// Candidates for every segment, from cache where possible. Failed
    /// segments are recorded as gaps. Returned in segment order.
    async fn extract_segments(
        &self,
        paper: &Paper,
        doc: &DocumentText,
        segments: &[Segment],
        report: &mut PaperReport,
    ) -> Result<Vec<SegmentCandidates>> {
        let model = self.client.model_id().to_string();
        let mut extracted = Vec::with_capacity(segments.len());
        let mut requests = Vec::new();
        let mut hashes = Vec::with_capacity(segments.len());

        for segment in segments {
            let prompt = self.prompt.render(segment.index, segment.is_partial);
            let hash = prompt_hash(&prompt, &segment.text);

            let cached = match self.storage.get_cached_response(&hash, &model).await? {
                Some(raw) => match self.client.validate(&raw) {
                    Ok(candidates) => Some(candidates),
                    Err(e) => {
                        warn!(segment = segment.index, error = %e, "ignoring unusable cached response");
                        None
                    }
                },
                None => None,
            };

            match cached {
                Some(candidates) => {
                    report.cached_segments += 1;
                    extracted.push(SegmentCandidates {
                        index: segment.index,
                        candidates,
                    });
                }
                None => requests.push(SegmentRequest {
                    index: segment.index,
                    prompt,
                    payload: segment.text.clone(),
                }),
            }
            hashes.push(hash);
        }

        for outcome in self.client.extract_batch(requests).await? {
            let index = outcome.index;
            match outcome.result {
                Ok(result) => {
                    if let Some(hash) = hashes.get(index as usize) {
                        self.storage
                            .put_cached_response(hash, &model, &result.raw_response)
                            .await?;
                    }
                    extracted.push(SegmentCandidates {
                        index,
                        candidates: result.candidates,
                    });
                }
                Err(e) => {
                    warn!(segment = index, error = %e, "segment dropped, gap recorded");
                    report.gaps.push(SegmentGap {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        extracted.sort_by_key(|s| s.index);
        for segment in &mut extracted {
            if let Some(source) = segments.iter().find(|s| s.index == segment.index) {
                assign_questions(paper, doc, source, &mut segment.candidates);
            }
        }
        Ok(extracted)
    }
}

impl std::fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("client", &self.client)
            .field("pdf_dir", &self.pdf_dir)
            .field("parallel_papers", &self.parallel_papers)
            .finish_non_exhaustive()
    }
}

/// Give each candidate a question label: the paper's own question when the
/// file covers one, else the question heading around its context, else the
/// question covering most of the segment.
fn assign_questions(paper: &Paper, doc: &DocumentText, segment: &Segment, candidates: &mut [Candidate]) {
    let fallback = doc.dominant_label(segment.range.clone());

    for candidate in candidates.iter_mut().filter(|c| c.question.is_none()) {
        let located = paper.default_question().or_else(|| {
            (!candidate.context.is_empty())
                .then(|| segment.text.find(candidate.context.as_str()))
                .flatten()
                .and_then(|pos| doc.label_at(segment.range.start + pos))
        });
        candidate.question = located.or(fallback).map(str::to_string);
    }
}
