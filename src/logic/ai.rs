//! AI Client Seam
//!
//! The analyzers consume a single narrow interface: `complete(prompt, opts)`.
//! Vendor adapters live outside the core and are injected at construction;
//! tests substitute scripted fakes without any global state.
//!
//! Retry policy: exponential backoff (base 500 ms, cap 5 s, jitter +-20%),
//! `retry_after` hints honored, and the record deadline observed between
//! attempts so a cancelled record never sleeps through another backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;

// ============================================================================
// ERRORS
// ============================================================================

/// Failure taxonomy for one completion call.
#[derive(Debug, Clone)]
pub enum AiError {
    /// The call exceeded its per-call timeout.
    Timeout,
    /// The provider shed load; `retry_after` is an optional server hint.
    RateLimited { retry_after: Option<Duration> },
    /// The provider answered, but not with anything parseable.
    InvalidResponse(String),
    /// The provider failed outright.
    ServiceError(String),
}

impl std::fmt::Display for AiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiError::Timeout => write!(f, "ai call timed out"),
            AiError::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "ai rate limited (retry after {:?})", d),
                None => write!(f, "ai rate limited"),
            },
            AiError::InvalidResponse(msg) => write!(f, "ai returned invalid response: {}", msg),
            AiError::ServiceError(msg) => write!(f, "ai service error: {}", msg),
        }
    }
}

impl std::error::Error for AiError {}

// ============================================================================
// CLIENT INTERFACE
// ============================================================================

/// Generation options forwarded to the adapter.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

/// The injected completion interface.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<String, AiError>;

    /// Startup probe; adapters that hold connections can override.
    async fn healthcheck(&self) -> Result<(), AiError> {
        Ok(())
    }
}

/// Wrap one call in its per-call timeout.
pub async fn complete_with_timeout(
    client: &dyn AiClient,
    prompt: &str,
    opts: &CompletionOptions,
) -> Result<String, AiError> {
    match tokio::time::timeout(opts.timeout, client.complete(prompt, opts)).await {
        Ok(result) => result,
        Err(_) => Err(AiError::Timeout),
    }
}

// ============================================================================
// RETRY
// ============================================================================

pub const BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const BACKOFF_CAP: Duration = Duration::from_secs(5);
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

/// Delay before retry number `attempt` (1-based), with jitter applied.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << (attempt - 1).min(16));
    let capped = exp.min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    capped.mul_f64(1.0 + jitter)
}

/// Run `op` until it succeeds, retries are exhausted, or the deadline would
/// be crossed by the next backoff sleep. Every `AiError` is worth another
/// attempt: transient failures clear up, and an `InvalidResponse` usually
/// parses on a fresh sample at low temperature. The attempt index is passed
/// through so callers can vary prompts or log context per attempt.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    deadline: Instant,
    mut op: F,
) -> Result<T, AiError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, AiError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    return Err(err);
                }

                let mut delay = backoff_delay(attempt);
                if let AiError::RateLimited {
                    retry_after: Some(hint),
                } = &err
                {
                    delay = delay.max(*hint).min(BACKOFF_CAP);
                }

                // Cancellation point: never start a sleep the deadline
                // cannot absorb.
                if Instant::now() + delay >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ============================================================================
// OFFLINE CLIENT
// ============================================================================

/// Heuristic client used when no vendor adapter is configured. Mirrors the
/// shape of a real completion (strict JSON) so the rest of the pipeline is
/// exercised end-to-end, while scoring with cheap text statistics instead of
/// a model. Threat judgment is left to the pre-filter by always answering
/// `none` with zero confidence.
pub struct OfflineAiClient;

#[async_trait]
impl AiClient for OfflineAiClient {
    async fn complete(&self, prompt: &str, _opts: &CompletionOptions) -> Result<String, AiError> {
        if prompt.contains("\"coherence\"") {
            let response = extract_section(prompt, "RESPONSE:").unwrap_or_default();
            let words = response.split_whitespace().count();
            let sentences = response
                .split(['.', '!', '?'])
                .filter(|s| !s.trim().is_empty())
                .count();
            let coherence = if sentences > 0 { 0.9 } else { 0.4 };
            let completeness = if response.len() < 20 {
                0.5
            } else if words >= 5 {
                0.9
            } else {
                0.7
            };
            Ok(serde_json::json!({
                "coherence": coherence,
                "relevance": 0.85,
                "completeness": completeness,
                "explanation": "offline heuristic scoring"
            })
            .to_string())
        } else {
            Ok(serde_json::json!({
                "kind": "none",
                "confidence": 0.0,
                "severity": "low",
                "indicators": []
            })
            .to_string())
        }
    }
}

fn extract_section<'a>(prompt: &'a str, header: &str) -> Option<&'a str> {
    let start = prompt.find(header)? + header.len();
    let rest = &prompt[start..];
    let end = rest.find("\n\n").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

pub type SharedAiClient = Arc<dyn AiClient>;

// ============================================================================
// TESTS
// ============================================================================
