//! Filesystem-backed text source for `.txt` and `.pdf` papers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use paperconcepts_shared::{PaperConceptsError, Result, SourceConfig};
use tracing::instrument;

use crate::cleanup::{clean_page, visible_chars};
use crate::{DocumentText, DocumentTextSource};

/// A PDF with fewer visible characters than this is treated as having no
/// text layer.
const MIN_TEXT_CHARS: usize = 50;

/// External OCR program, run as `<program> <args...> <pdf>`; its stdout is the
/// document text, with form feeds between pages.
#[derive(Debug, Clone)]
struct OcrCommand {
    program: String,
    args: Vec<String>,
}

impl OcrCommand {
    fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    async fn run(&self, path: &Path) -> std::result::Result<String, String> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .await
            .map_err(|e| format!("failed to run OCR command {:?}: {e}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "OCR command exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Reads papers from disk. Plain-text files are taken as-is; PDFs go through
/// `pdf-extract`, falling back to OCR when configured.
#[derive(Debug, Clone, Default)]
pub struct FileTextSource {
    ocr: Option<OcrCommand>,
}

impl FileTextSource {
    pub fn new(config: &SourceConfig) -> Self {
        let ocr = match (config.ocr_enabled, config.ocr_command.as_deref()) {
            (true, Some(cmd)) => OcrCommand::parse(cmd),
            (true, None) => {
                tracing::warn!("OCR is enabled but no OCR command is configured; OCR disabled");
                None
            }
            (false, _) => None,
        };
        Self { ocr }
    }

    /// Whether an OCR fallback is available.
    pub fn ocr_available(&self) -> bool {
        self.ocr.is_some()
    }

    async fn extract_pdf(&self, path: &Path) -> Result<DocumentText> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PaperConceptsError::extraction_unavailable(path, e.to_string()))?;

        // pdf-extract is synchronous and may panic on malformed input
        let native = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
        })
        .await
        .unwrap_or_else(|e| Err(format!("PDF parser crashed: {e}")));

        let reason = match native {
            Ok(text) if visible_chars(&text) >= MIN_TEXT_CHARS => {
                return Ok(pages_to_document(&text));
            }
            Ok(text) => format!(
                "PDF has no usable text layer ({} visible characters)",
                visible_chars(&text)
            ),
            Err(e) => e,
        };

        let Some(ocr) = &self.ocr else {
            return Err(PaperConceptsError::extraction_unavailable(path, reason));
        };

        tracing::info!(path = %path.display(), %reason, "falling back to OCR");
        match ocr.run(path).await {
            Ok(text) if visible_chars(&text) >= MIN_TEXT_CHARS => Ok(pages_to_document(&text)),
            Ok(_) => Err(PaperConceptsError::extraction_unavailable(
                path,
                format!("{reason}; OCR produced no usable text"),
            )),
            Err(e) => Err(PaperConceptsError::extraction_unavailable(
                path,
                format!("{reason}; {e}"),
            )),
        }
    }
}

/// Split raw text on form feeds, clean each page, and assemble boundaries.
fn pages_to_document(raw: &str) -> DocumentText {
    let pages: Vec<String> = raw.split('\x0c').map(clean_page).collect();
    DocumentText::from_pages(&pages)
}

#[async_trait]
impl DocumentTextSource for FileTextSource {
    #[instrument(skip_all, fields(path = %path.display()))]
    async fn extract(&self, path: &Path) -> Result<DocumentText> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let doc = match extension.as_deref() {
            Some("pdf") => self.extract_pdf(path).await?,
            Some("txt") | Some("md") => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    PaperConceptsError::extraction_unavailable(path, e.to_string())
                })?;
                pages_to_document(&raw)
            }
            other => {
                return Err(PaperConceptsError::extraction_unavailable(
                    PathBuf::from(path),
                    format!("unsupported file type: {}", other.unwrap_or("(none)")),
                ));
            }
        };

        tracing::debug!(
            chars = doc.text.len(),
            boundaries = doc.boundaries.len(),
            "extracted document text"
        );
        Ok(doc)
    }
}
