//! Extraction prompt template and cache keys.

use std::path::Path;

use sha2::{Digest, Sha256};

use paperconcepts_shared::{PaperConceptsError, Result};

/// File name looked up in the prompts directory.
pub const TEMPLATE_FILE: &str = "concept_extraction.md";

const BUILTIN_TEMPLATE: &str = r#"You are analyzing a university computer science exam paper.

Identify the computer science concepts tested {text}. For each concept give:
- "name": the concept name, as it is usually written
- "description": one or two sentences explaining the concept
- "category": the broad subject area (for example "Algorithms", "Operating Systems", "Networks")
- "parent_concept": a broader concept this one belongs to, if any
- "related_concepts": names of other concepts closely related to this one
- "confidence": how certain you are that the paper tests this concept, from 0.0 to 1.0
- "context": a short verbatim quote from the text where the concept appears

Respond with JSON only, in exactly this shape:

```json
{"concepts": [{"name": "...", "description": "...", "category": "...", "parent_concept": null, "related_concepts": [], "confidence": 0.9, "context": "..."}]}
```
"#;

const STRICT_SUFFIX: &str = "\n\nIMPORTANT: your previous answer could not be parsed. \
Reply with a single JSON object of the form {\"concepts\": [...]} and nothing else: \
no prose, no markdown outside the JSON.";

/// The extraction prompt. `{text}` is replaced with a description of the
/// text being analyzed.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: BUILTIN_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Use `concept_extraction.md` from `prompts_dir` when present, otherwise
    /// the built-in template.
    pub async fn load(prompts_dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = prompts_dir else {
            return Ok(Self::default());
        };
        let path = dir.join(TEMPLATE_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(template) if !template.trim().is_empty() => {
                tracing::info!(path = %path.display(), "loaded prompt template");
                Ok(Self::new(template))
            }
            Ok(_) => Err(PaperConceptsError::config(format!(
                "prompt template {} is empty",
                path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "prompt template not found, using built-in");
                Ok(Self::default())
            }
            Err(e) => Err(PaperConceptsError::io(path, e)),
        }
    }

    /// Render the prompt for one segment.
    pub fn render(&self, index: u32, is_partial: bool) -> String {
        let description = if is_partial {
            format!(
                "in part {} of the exam paper text below (the paper is split into overlapping \
                 parts; only report concepts present in this part)",
                index + 1
            )
        } else {
            "in the exam paper text below".to_string()
        };
        self.template.replace("{text}", &description)
    }

    /// The same prompt with an instruction to answer in bare JSON, used once
    /// after an unparseable response.
    pub fn stricter(prompt: &str) -> String {
        format!("{prompt}{STRICT_SUFFIX}")
    }
}

/// Cache key for a prompt and its payload.
pub fn prompt_hash(prompt: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn renders_whole_and_partial() {
        let t = PromptTemplate::default();
        let whole = t.render(0, false);
        assert!(whole.contains("tested in the exam paper text below"));
        assert!(!whole.contains("{text}"));

        let part = t.render(2, true);
        assert!(part.contains("part 3 of the exam paper"));
    }

    #[test]
    fn stricter_appends_instruction() {
        let strict = PromptTemplate::stricter("base");
        assert!(strict.starts_with("base"));
        assert!(strict.contains("single JSON object"));
    }

    #[test]
    fn hash_is_stable_and_distinguishes_inputs() {
        let a = prompt_hash("prompt", "text");
        assert_eq!(a, prompt_hash("prompt", "text"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, prompt_hash("prompt", "text2"));
        assert_ne!(prompt_hash("ab", "c"), prompt_hash("a", "bc"));
    }

    #[tokio::test]
    async fn loads_override_or_falls_back() {
        let dir = std::env::temp_dir().join(format!("pc_prompts_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("create dir");

        let fallback = PromptTemplate::load(Some(&dir)).await.expect("fallback");
        assert!(fallback.render(0, false).contains("computer science exam paper"));

        std::fs::write(dir.join(TEMPLATE_FILE), "Find concepts {text}.").expect("write");
        let custom = PromptTemplate::load(Some(&dir)).await.expect("custom");
        assert_eq!(custom.render(0, false), "Find concepts in the exam paper text below.");

        std::fs::write(dir.join(TEMPLATE_FILE), "  \n").expect("write");
        assert!(PromptTemplate::load(Some(&dir)).await.is_err());

        assert!(PromptTemplate::load(None).await.is_ok());
    }
}
