//! Concept extraction with a language model.
//!
//! Documents are cut into token-budgeted [`Segment`]s, each sent to a
//! [`CompletionProvider`] through the [`ExtractionClient`], which enforces the
//! shared call budget, retries transient failures, and validates responses
//! into normalized [`Candidate`](paperconcepts_shared::Candidate)s.

mod client;
mod prompt;
mod provider;
mod rate_limit;
mod segmenter;
mod validator;

pub use client::{ExtractionClient, Extracted, RetryPolicy, SegmentOutcome, SegmentRequest};
pub use prompt::{PromptTemplate, TEMPLATE_FILE, prompt_hash};
pub use provider::{CompletionProvider, CompletionRequest, OpenAiProvider};
pub use rate_limit::CallRateLimiter;
pub use segmenter::{Segment, Segmenter, Segments};
pub use validator::{DEFAULT_CONFIDENCE, ResponseValidator};
