//! Paper discovery and registration.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument, warn};

use paperconcepts_shared::{NewPaper, Paper, PaperConceptsError, Result};
use paperconcepts_storage::Storage;

/// Extensions the text source can read.
const PAPER_EXTENSIONS: &[&str] = &["pdf", "txt"];

/// Outcome of one ingest pass.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub registered: Vec<Paper>,
    /// Files already in the store.
    pub already_known: usize,
    /// Files whose names carry no recognizable metadata.
    pub unparseable: Vec<String>,
}

/// Parse paper metadata from a filename.
///
/// Recognizes `2021-p07-q08-solutions.pdf` (year, paper number, and the
/// question stored as course `q08`) and `CS101-2019-p2.pdf`.
pub fn parse_filename(filename: &str) -> Option<NewPaper> {
    static QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^(\d{4})-p(\d{1,2})-q(\d{1,2})(?:-[^.]*)?\.(?:pdf|txt)$")
            .expect("valid regex")
    });
    static COURSE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^([a-z][a-z0-9_]*)-(\d{4})-p(\d{1,2})\.(?:pdf|txt)$").expect("valid regex")
    });

    if let Some(caps) = QUESTION_RE.captures(filename) {
        let question: u32 = caps[3].parse().ok()?;
        return Some(NewPaper {
            filename: filename.to_string(),
            year: caps[1].parse().ok(),
            course: Some(format!("q{question:02}")),
            paper_number: caps[2].parse().ok(),
        });
    }

    let caps = COURSE_RE.captures(filename)?;
    Some(NewPaper {
        filename: filename.to_string(),
        year: caps[2].parse().ok(),
        course: Some(caps[1].to_string()),
        paper_number: caps[3].parse().ok(),
    })
}

/// Scans a directory for paper files and registers new ones.
#[derive(Debug, Clone)]
pub struct PaperIngestor {
    dir: PathBuf,
}

impl PaperIngestor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paper files in the directory, sorted by name.
    pub async fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| PaperConceptsError::io(&self.dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PaperConceptsError::io(&self.dir, e))?
        {
            let path = entry.path();
            let is_paper = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| PAPER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_paper && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Register every paper file not yet in the store.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub async fn ingest(&self, storage: &Storage) -> Result<IngestReport> {
        let known = storage.paper_filenames().await?;
        let mut report = IngestReport::default();

        for path in self.scan().await? {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if known.contains(filename) {
                report.already_known += 1;
                continue;
            }

            let Some(new_paper) = parse_filename(filename) else {
                warn!(filename, "could not extract metadata from filename, skipping");
                report.unparseable.push(filename.to_string());
                continue;
            };

            match storage.insert_paper(&new_paper).await? {
                Some(paper) => {
                    info!(paper = %paper.id, filename, "registered paper");
                    report.registered.push(paper);
                }
                None => report.already_known += 1,
            }
        }

        info!(
            registered = report.registered.len(),
            already_known = report.already_known,
            unparseable = report.unparseable.len(),
            "ingest complete"
        );
        Ok(report)
    }
}
