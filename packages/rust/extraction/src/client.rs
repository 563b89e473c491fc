//! Rate-limited, retrying extraction client.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::instrument;

use paperconcepts_shared::{Candidate, ClientConfig, PaperConceptsError, Result};

use crate::prompt::PromptTemplate;
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::rate_limit::CallRateLimiter;
use crate::validator::ResponseValidator;

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// One segment to extract.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub index: u32,
    pub prompt: String,
    pub payload: String,
}

/// Candidates from one successful extraction.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub candidates: Vec<Candidate>,
    /// The response that validated, for the response cache.
    pub raw_response: String,
    /// A stricter re-prompt was needed.
    pub reprompted: bool,
}

/// Result for one segment of a batch.
#[derive(Debug)]
pub struct SegmentOutcome {
    pub index: u32,
    pub result: Result<Extracted>,
}

/// Sends segments to the provider under the shared rate limit, retrying
/// transient failures and re-prompting once on unparseable output.
#[derive(Clone)]
pub struct ExtractionClient {
    provider: Arc<dyn CompletionProvider>,
    limiter: Arc<CallRateLimiter>,
    retry: RetryPolicy,
    validator: ResponseValidator,
    batch_size: usize,
    max_tokens: u32,
    temperature: f32,
}

impl ExtractionClient {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        limiter: Arc<CallRateLimiter>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                base_delay: config.retry_base_delay,
                ..RetryPolicy::default()
            },
            validator: ResponseValidator::default(),
            batch_size: config.batch_size.max(1),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    /// Validate a response outside the call path, e.g. one read from cache.
    pub fn validate(&self, raw: &str) -> Result<Vec<Candidate>> {
        self.validator.validate(raw)
    }

    /// One provider call under the rate limit, with retries.
    async fn call(&self, prompt: &str, payload: &str) -> Result<String> {
        let request = CompletionRequest {
            prompt: prompt.to_string(),
            payload: payload.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;
            match self.provider.complete(&request).await {
                Ok(text) => return Ok(text),
                Err(PaperConceptsError::ProviderUnavailable { cause, .. }) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(PaperConceptsError::ProviderUnavailable {
                            attempts: attempt,
                            cause,
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %cause,
                        "provider unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Extract candidates for one prompt and payload.
    #[instrument(skip_all, fields(model = %self.model_id(), chars = payload.len()))]
    pub async fn extract(&self, prompt: &str, payload: &str) -> Result<Extracted> {
        let raw = self.call(prompt, payload).await?;
        match self.validator.validate(&raw) {
            Ok(candidates) => Ok(Extracted {
                candidates,
                raw_response: raw,
                reprompted: false,
            }),
            Err(PaperConceptsError::MalformedResponse(reason)) => {
                tracing::warn!(%reason, "malformed response, re-prompting");
                let strict = PromptTemplate::stricter(prompt);
                let raw = self.call(&strict, payload).await?;
                let candidates = self.validator.validate(&raw)?;
                Ok(Extracted {
                    candidates,
                    raw_response: raw,
                    reprompted: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Extract many segments, `batch_size` at a time.
    ///
    /// Per-segment failures are returned in the outcomes. A permanent
    /// provider rejection cancels the remaining work and is returned as the
    /// error. Outcomes are ordered by segment index.
    pub async fn extract_batch(&self, requests: Vec<SegmentRequest>) -> Result<Vec<SegmentOutcome>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut pending = requests.into_iter().peekable();

        while pending.peek().is_some() {
            let mut set = JoinSet::new();
            let mut in_batch = BTreeSet::new();
            for request in pending.by_ref().take(self.batch_size) {
                in_batch.insert(request.index);
                let client = self.clone();
                set.spawn(async move {
                    let result = client.extract(&request.prompt, &request.payload).await;
                    SegmentOutcome {
                        index: request.index,
                        result,
                    }
                });
            }

            while let Some(joined) = set.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(error = %e, "extraction task failed");
                        continue;
                    }
                };
                in_batch.remove(&outcome.index);
                match outcome.result {
                    Err(e) if e.is_systemic() => {
                        set.abort_all();
                        return Err(e);
                    }
                    result => outcomes.push(SegmentOutcome {
                        index: outcome.index,
                        result,
                    }),
                }
            }

            // Tasks that panicked never reported back.
            for index in in_batch {
                outcomes.push(SegmentOutcome {
                    index,
                    result: Err(PaperConceptsError::provider_unavailable(
                        "extraction task did not complete",
                    )),
                });
            }
        }

        outcomes.sort_by_key(|o| o.index);
        Ok(outcomes)
    }
}

impl std::fmt::Debug for ExtractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionClient")
            .field("model", &self.model_id())
            .field("retry", &self.retry)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    type Respond = Box<dyn Fn(u32, &CompletionRequest) -> Result<String> + Send + Sync>;

    /// Provider answering from a closure of (call number, request).
    struct TestProvider {
        respond: Respond,
        calls: AtomicU32,
        prompts: Mutex<Vec<String>>,
    }

    impl TestProvider {
        fn new(respond: impl Fn(u32, &CompletionRequest) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                respond: Box::new(respond),
                calls: AtomicU32::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for TestProvider {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.prompts.lock().unwrap().push(request.prompt.clone());
            (self.respond)(n, request)
        }

        fn model_id(&self) -> &str {
            "test-model"
        }
    }

    const VALID: &str = r#"{"concepts": [{"name": "Paging", "confidence": 0.9}]}"#;

    fn client(provider: Arc<TestProvider>, batch_size: usize) -> ExtractionClient {
        let config = ClientConfig {
            calls_per_minute: 10_000,
            batch_size,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
            max_tokens: 256,
            temperature: 0.0,
        };
        let limiter = Arc::new(CallRateLimiter::per_minute(10_000).unwrap());
        ExtractionClient::new(provider, limiter, &config)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let provider = TestProvider::new(|n, _| {
            if n < 3 {
                Err(PaperConceptsError::provider_unavailable("HTTP 503"))
            } else {
                Ok(VALID.to_string())
            }
        });
        let out = client(provider.clone(), 1).extract("p", "text").await.expect("ok");
        assert_eq!(out.candidates[0].name, "Paging");
        assert!(!out.reprompted);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let provider =
            TestProvider::new(|_, _| Err(PaperConceptsError::provider_unavailable("HTTP 429")));
        let err = client(provider.clone(), 1).extract("p", "text").await.unwrap_err();
        match err {
            PaperConceptsError::ProviderUnavailable { attempts, cause } => {
                assert_eq!(attempts, 3);
                assert_eq!(cause, "HTTP 429");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let provider =
            TestProvider::new(|_, _| Err(PaperConceptsError::ProviderRejected("HTTP 401".into())));
        let err = client(provider.clone(), 1).extract("p", "text").await.unwrap_err();
        assert!(matches!(err, PaperConceptsError::ProviderRejected(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn reprompts_once_on_malformed_output() {
        let provider = TestProvider::new(|n, _| {
            Ok(if n == 1 { "I think the concepts are paging and TLBs.".into() } else { VALID.into() })
        });
        let out = client(provider.clone(), 1).extract("base prompt", "text").await.expect("ok");
        assert!(out.reprompted);
        assert_eq!(out.raw_response, VALID);

        let prompts = provider.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], "base prompt");
        assert!(prompts[1].starts_with("base prompt") && prompts[1].len() > prompts[0].len());
    }

    #[tokio::test]
    async fn malformed_twice_is_an_error() {
        let provider = TestProvider::new(|_, _| Ok("still not json".into()));
        let err = client(provider.clone(), 1).extract("p", "text").await.unwrap_err();
        assert!(matches!(err, PaperConceptsError::MalformedResponse(_)));
        assert_eq!(provider.calls(), 2);
    }

    fn requests(n: u32) -> Vec<SegmentRequest> {
        (0..n)
            .map(|index| SegmentRequest {
                index,
                prompt: "p".into(),
                payload: format!("segment {index}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn batch_reports_each_segment_in_order() {
        let provider = TestProvider::new(|_, req| {
            if req.payload == "segment 3" {
                Err(PaperConceptsError::provider_unavailable("HTTP 500"))
            } else {
                Ok(VALID.to_string())
            }
        });
        let outcomes = client(provider, 2).extract_batch(requests(5)).await.expect("batch");

        let indices: Vec<u32> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        for o in &outcomes {
            assert_eq!(o.result.is_ok(), o.index != 3, "segment {}", o.index);
        }
    }

    #[tokio::test]
    async fn rejection_aborts_the_batch() {
        let provider = TestProvider::new(|_, req| {
            if req.payload == "segment 1" {
                Err(PaperConceptsError::ProviderRejected("HTTP 403".into()))
            } else {
                Ok(VALID.to_string())
            }
        });
        let err = client(provider.clone(), 2).extract_batch(requests(6)).await.unwrap_err();
        assert!(matches!(err, PaperConceptsError::ProviderRejected(_)));
        assert!(provider.calls() <= 2, "later batches must not start");
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let provider = TestProvider::new(|_, _| Ok(VALID.to_string()));
        let outcomes = client(provider.clone(), 4).extract_batch(Vec::new()).await.expect("ok");
        assert!(outcomes.is_empty());
        assert_eq!(provider.calls(), 0);
    }
}
