//! Application configuration for the paper concept analyzer.
//!
//! User config lives at `~/.paperconcepts/paperconcepts.toml`.
//! Environment variables override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PaperConceptsError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperconcepts.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperconcepts";

// ---------------------------------------------------------------------------
// Config structs (matching paperconcepts.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage and input locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Language-model provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Segmentation, rate limiting, and matching knobs.
    #[serde(default)]
    pub extraction: ExtractionSettings,

    /// Document text extraction settings.
    #[serde(default)]
    pub source: SourceConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// libSQL database file.
    #[serde(default = "default_database_path")]
    pub database: String,

    /// Directory scanned for new papers.
    #[serde(default = "default_pdf_dir")]
    pub pdf_dir: String,

    /// Optional directory with prompt template overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts_dir: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            pdf_dir: default_pdf_dir(),
            prompts_dir: None,
        }
    }
}

fn default_database_path() -> String {
    "db/concepts.db".into()
}
fn default_pdf_dir() -> String {
    "pdfs".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for concept extraction.
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum completion tokens per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,

    /// Per-call HTTP timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Token-budget ceiling for a single segment.
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,

    /// Overlap between consecutive windows, in estimated tokens.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap_tokens: usize,

    /// Average characters per token used by the token estimate.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,

    /// Provider calls allowed per minute across all papers.
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: u32,

    /// Segments dispatched concurrently in one batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempt ceiling for transient provider failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubled on every further attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Minimum similarity for a fuzzy concept match.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Similarity strategy: "levenshtein" or "token-set".
    #[serde(default = "default_similarity")]
    pub similarity: String,

    /// Papers processed concurrently.
    #[serde(default = "default_parallel_papers")]
    pub parallel_papers: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_chunk_tokens: default_max_chunk_tokens(),
            chunk_overlap_tokens: default_chunk_overlap(),
            chars_per_token: default_chars_per_token(),
            calls_per_minute: default_calls_per_minute(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            fuzzy_threshold: default_fuzzy_threshold(),
            similarity: default_similarity(),
            parallel_papers: default_parallel_papers(),
        }
    }
}

fn default_max_chunk_tokens() -> usize {
    4000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_chars_per_token() -> f64 {
    4.0
}
fn default_calls_per_minute() -> u32 {
    20
}
fn default_batch_size() -> usize {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_fuzzy_threshold() -> f64 {
    0.85
}
fn default_similarity() -> String {
    "levenshtein".into()
}
fn default_parallel_papers() -> usize {
    2
}

/// `[source]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Fall back to OCR when a PDF has no text layer.
    #[serde(default)]
    pub ocr_enabled: bool,

    /// External OCR program, invoked as `<cmd> <pdf>`; must print text to stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_command: Option<String>,
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DATABASE_PATH") {
            self.paths.database = v;
        }
        if let Some(v) = get("PDF_DIR") {
            self.paths.pdf_dir = v;
        }
        if let Some(v) = get("PROMPTS_DIR") {
            self.paths.prompts_dir = Some(v);
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("OPENAI_MAX_TOKENS") {
            self.llm.max_tokens = parse_var("OPENAI_MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("OPENAI_TEMPERATURE") {
            self.llm.temperature = parse_var("OPENAI_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_var("LLM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("MAX_CHUNK_SIZE") {
            self.extraction.max_chunk_tokens = parse_var("MAX_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("CHUNK_OVERLAP") {
            self.extraction.chunk_overlap_tokens = parse_var("CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("CHARS_PER_TOKEN") {
            self.extraction.chars_per_token = parse_var("CHARS_PER_TOKEN", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_CALLS") {
            self.extraction.calls_per_minute = parse_var("RATE_LIMIT_CALLS", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_BATCH_SIZE") {
            self.extraction.batch_size = parse_var("RATE_LIMIT_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.extraction.max_retries = parse_var("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_BASE_DELAY_MS") {
            self.extraction.retry_base_delay_ms = parse_var("RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = get("FUZZY_MATCH_THRESHOLD") {
            self.extraction.fuzzy_threshold = parse_var("FUZZY_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = get("SIMILARITY_STRATEGY") {
            self.extraction.similarity = v;
        }
        if let Some(v) = get("PARALLEL_PAPERS") {
            self.extraction.parallel_papers = parse_var("PARALLEL_PAPERS", &v)?;
        }
        if let Some(v) = get("OCR_ENABLED") {
            self.source.ocr_enabled = matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(v) = get("OCR_COMMAND") {
            self.source.ocr_command = Some(v);
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let x = &self.extraction;
        if x.max_chunk_tokens == 0 {
            return Err(PaperConceptsError::config("max_chunk_tokens must be > 0"));
        }
        if x.chunk_overlap_tokens >= x.max_chunk_tokens {
            return Err(PaperConceptsError::config(format!(
                "chunk_overlap_tokens ({}) must be smaller than max_chunk_tokens ({})",
                x.chunk_overlap_tokens, x.max_chunk_tokens
            )));
        }
        if !(x.chars_per_token > 0.0) {
            return Err(PaperConceptsError::config("chars_per_token must be positive"));
        }
        if x.calls_per_minute == 0 {
            return Err(PaperConceptsError::config("calls_per_minute must be > 0"));
        }
        if x.batch_size == 0 {
            return Err(PaperConceptsError::config("batch_size must be > 0"));
        }
        if x.max_retries == 0 {
            return Err(PaperConceptsError::config("max_retries must be > 0"));
        }
        if x.parallel_papers == 0 {
            return Err(PaperConceptsError::config("parallel_papers must be > 0"));
        }
        if !(x.fuzzy_threshold > 0.0 && x.fuzzy_threshold <= 1.0) {
            return Err(PaperConceptsError::config(
                "fuzzy_threshold must be in (0.0, 1.0]",
            ));
        }
        x.similarity.parse::<SimilarityKind>()?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        PaperConceptsError::config(format!("invalid value for {key} ({value:?}): {e}"))
    })
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime segmentation settings.
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// Token-budget ceiling per segment.
    pub max_tokens: usize,
    /// Overlap between windows, in estimated tokens.
    pub overlap_tokens: usize,
    /// Average characters per token.
    pub chars_per_token: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SegmenterConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_tokens: config.extraction.max_chunk_tokens,
            overlap_tokens: config.extraction.chunk_overlap_tokens,
            chars_per_token: config.extraction.chars_per_token,
        }
    }
}

/// Runtime extraction client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Provider calls per minute.
    pub calls_per_minute: u32,
    /// Segments per concurrent batch.
    pub batch_size: usize,
    /// Attempt ceiling for transient failures.
    pub max_attempts: u32,
    /// First backoff delay.
    pub retry_base_delay: Duration,
    /// Completion max tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl From<&AppConfig> for ClientConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            calls_per_minute: config.extraction.calls_per_minute,
            batch_size: config.extraction.batch_size,
            max_attempts: config.extraction.max_retries,
            retry_base_delay: Duration::from_millis(config.extraction.retry_base_delay_ms),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        }
    }
}

/// Which string-similarity function backs fuzzy concept matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityKind {
    /// Normalized Levenshtein edit distance.
    #[default]
    Levenshtein,
    /// Jaccard overlap of whitespace-separated tokens.
    TokenSet,
}

impl std::str::FromStr for SimilarityKind {
    type Err = PaperConceptsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "levenshtein" => Ok(Self::Levenshtein),
            "token-set" | "token_set" | "tokenset" => Ok(Self::TokenSet),
            other => Err(PaperConceptsError::config(format!(
                "unknown similarity strategy: {other} (expected levenshtein or token-set)"
            ))),
        }
    }
}

/// Runtime consolidation settings.
#[derive(Debug, Clone, Copy)]
pub struct ConsolidationConfig {
    /// Minimum similarity for a fuzzy match within a category.
    pub fuzzy_threshold: f64,
    /// Similarity function used for fuzzy matching.
    pub similarity: SimilarityKind,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            similarity: SimilarityKind::Levenshtein,
        }
    }
}

impl From<&AppConfig> for ConsolidationConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            fuzzy_threshold: config.extraction.fuzzy_threshold,
            // validate() has already rejected unknown names
            similarity: config.extraction.similarity.parse().unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperconcepts/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperConceptsError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperconcepts/paperconcepts.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk (defaults if the file does not
/// exist), then apply environment overrides and validate.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperConceptsError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PaperConceptsError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PaperConceptsError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PaperConceptsError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperConceptsError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the provider API key env var is set and non-empty, returning it.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PaperConceptsError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_chunk_tokens"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.extraction.max_chunk_tokens, 4000);
        assert_eq!(parsed.extraction.calls_per_minute, 20);
        assert_eq!(parsed.llm.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[extraction]
batch_size = 2

[source]
ocr_enabled = true
ocr_command = "ocr-to-text"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.extraction.batch_size, 2);
        assert_eq!(config.extraction.chunk_overlap_tokens, 200);
        assert!(config.source.ocr_enabled);
        assert_eq!(config.paths.pdf_dir, "pdfs");
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("MAX_CHUNK_SIZE", "1000"),
            ("CHUNK_OVERLAP", "50"),
            ("RATE_LIMIT_CALLS", "60"),
            ("OCR_ENABLED", "TRUE"),
            ("FUZZY_MATCH_THRESHOLD", "0.9"),
            ("OPENAI_MODEL", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .expect("apply overrides");

        assert_eq!(config.extraction.max_chunk_tokens, 1000);
        assert_eq!(config.extraction.chunk_overlap_tokens, 50);
        assert_eq!(config.extraction.calls_per_minute, 60);
        assert!(config.source.ocr_enabled);
        assert!((config.extraction.fuzzy_threshold - 0.9).abs() < f64::EPSILON);
        // Blank values are ignored.
        assert_eq!(config.llm.model, "gpt-4o");
        config.validate().expect("valid");
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides_from(|k| (k == "RATE_LIMIT_CALLS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_CALLS"));
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let mut config = AppConfig::default();
        config.extraction.chunk_overlap_tokens = config.extraction.max_chunk_tokens;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.extraction.calls_per_minute = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.extraction.fuzzy_threshold = 1.5;
        assert!(config.validate().is_err());

        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let app = AppConfig::default();
        let seg = SegmenterConfig::from(&app);
        assert_eq!(seg.max_tokens, 4000);
        assert_eq!(seg.overlap_tokens, 200);

        let consolidation = ConsolidationConfig::from(&app);
        assert_eq!(consolidation.similarity, SimilarityKind::Levenshtein);

        let client = ClientConfig::from(&app);
        assert_eq!(client.batch_size, 5);
        assert_eq!(client.max_attempts, 3);
        assert_eq!(client.retry_base_delay, Duration::from_millis(1000));
    }

    #[test]
    fn similarity_kind_parsing() {
        assert_eq!(
            "Token-Set".parse::<SimilarityKind>().expect("parse"),
            SimilarityKind::TokenSet
        );
        assert!("cosine".parse::<SimilarityKind>().is_err());

        let mut config = AppConfig::default();
        config.extraction.similarity = "cosine".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "PC_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
