//! Quality Classifier
//!
//! Scores a response for coherence, relevance, and completeness through the
//! AI client, returning a weighted overall score. Skips the AI entirely when
//! analysis is disabled or the response is empty.

use std::sync::Arc;

use serde::Deserialize;
use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::logic::ai::{
    complete_with_timeout, retry_with_backoff, AiError, CompletionOptions, RetryPolicy,
    SharedAiClient,
};
use crate::logic::record::{QualityScore, TelemetryRecord};

/// Rubric line required verbatim so short-response judgments reproduce
/// across runs and deployments.
pub const SHORT_RESPONSE_RUBRIC: &str =
    "If the RESPONSE is shorter than 20 bytes, COMPLETENESS must be scored at most 0.5.";

// ============================================================================
// OUTCOME
// ============================================================================

/// Result of one quality pass. `failed` marks terminal analyzer failure and
/// drives the incident's `partial` flag.
#[derive(Debug, Clone)]
pub struct QualityOutcome {
    pub score: QualityScore,
    pub failed: bool,
    /// True when the AI was actually consulted (not skipped).
    pub analyzed: bool,
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct QualityClassifier {
    cfg: Arc<PipelineConfig>,
    ai: SharedAiClient,
}

/// Strict JSON shape the AI must return.
#[derive(Debug, Deserialize)]
struct QualityReply {
    coherence: f64,
    relevance: f64,
    completeness: f64,
    #[serde(default)]
    explanation: String,
}

impl QualityClassifier {
    pub fn new(cfg: Arc<PipelineConfig>, ai: SharedAiClient) -> Self {
        Self { cfg, ai }
    }

    pub async fn analyze(&self, record: &TelemetryRecord, deadline: Instant) -> QualityOutcome {
        if !self.cfg.enable_quality_analysis || record.response.is_empty() {
            return QualityOutcome {
                score: QualityScore::skipped(),
                failed: false,
                analyzed: false,
            };
        }

        let prompt = self.build_prompt(record);
        let opts = CompletionOptions {
            // Deterministic scoring band regardless of the configured value.
            temperature: self.cfg.temperature.clamp(0.1, 0.3),
            top_p: self.cfg.top_p,
            top_k: self.cfg.top_k,
            max_output_tokens: self.cfg.max_output_tokens,
            timeout: self.cfg.per_call_timeout,
        };
        let policy = RetryPolicy {
            max_retries: self.cfg.max_retries,
        };

        let result = retry_with_backoff(policy, deadline, |_attempt| {
            let prompt = prompt.clone();
            let opts = opts.clone();
            async move {
                let raw = complete_with_timeout(self.ai.as_ref(), &prompt, &opts).await?;
                parse_reply(&raw)
            }
        })
        .await;

        match result {
            Ok(reply) => QualityOutcome {
                score: self.score_from(reply),
                failed: false,
                analyzed: true,
            },
            Err(err) => {
                tracing::warn!(trace_id = %record.trace_id, error = %err,
                    "quality analysis exhausted retries");
                QualityOutcome {
                    score: QualityScore::failed(&err.to_string()),
                    failed: true,
                    analyzed: true,
                }
            }
        }
    }

    fn build_prompt(&self, record: &TelemetryRecord) -> String {
        format!(
            "Analyze the quality of this LLM response. Provide scores from 0.0 to 1.0 \
             for each metric.\n\n\
             PROMPT: {prompt}\n\n\
             RESPONSE: {response}\n\n\
             Evaluate:\n\
             1. COHERENCE: Is the response logically consistent and well-structured?\n\
             2. RELEVANCE: Does it directly address the prompt?\n\
             3. COMPLETENESS: Does it fully answer the question?\n\
             {rubric}\n\n\
             Respond with strictly this JSON object and nothing else:\n\
             {{\n\
               \"coherence\": <float 0.0-1.0>,\n\
               \"relevance\": <float 0.0-1.0>,\n\
               \"completeness\": <float 0.0-1.0>,\n\
               \"explanation\": \"<brief explanation of the scores>\"\n\
             }}",
            prompt = record.prompt,
            response = record.response,
            rubric = SHORT_RESPONSE_RUBRIC,
        )
    }

    fn score_from(&self, reply: QualityReply) -> QualityScore {
        let coherence = reply.coherence.clamp(0.0, 1.0);
        let relevance = reply.relevance.clamp(0.0, 1.0);
        let completeness = reply.completeness.clamp(0.0, 1.0);
        let overall = self.cfg.quality_weight_coherence * coherence
            + self.cfg.quality_weight_relevance * relevance
            + self.cfg.quality_weight_completeness * completeness;
        QualityScore {
            coherence,
            relevance,
            completeness,
            overall: Some(overall),
            explanation: reply.explanation,
        }
    }
}

// ============================================================================
// PARSING
// ============================================================================

fn parse_reply(raw: &str) -> Result<QualityReply, AiError> {
    let json = strip_fences(raw);
    serde_json::from_str::<QualityReply>(json)
        .map_err(|e| AiError::InvalidResponse(format!("quality reply: {}", e)))
}

/// Tolerate a markdown-fenced JSON block around the object.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    trimmed
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::ai::AiClient;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedAi(String);

    #[async_trait]
    impl AiClient for FixedAi {
        async fn complete(&self, _p: &str, _o: &CompletionOptions) -> Result<String, AiError> {
            Ok(self.0.clone())
        }
    }

    struct DownAi;

    #[async_trait]
    impl AiClient for DownAi {
        async fn complete(&self, _p: &str, _o: &CompletionOptions) -> Result<String, AiError> {
            Err(AiError::ServiceError("unavailable".into()))
        }
    }

    fn record(response: &str) -> TelemetryRecord {
        TelemetryRecord {
            trace_id: "t1".to_string(),
            ingested_at: chrono::Utc::now(),
            model_id: "m".to_string(),
            prompt: "Capital of France?".to_string(),
            response: response.to_string(),
            input_tokens: 5,
            output_tokens: 1,
            latency_ms: 400.0,
            cost_usd: 0.0005,
            error_occurred: false,
            user_id: "anonymous".to_string(),
            session_id: None,
            tags: Default::default(),
        }
    }

    fn cfg() -> Arc<PipelineConfig> {
        let mut cfg = PipelineConfig::default();
        cfg.max_retries = 0;
        Arc::new(cfg)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_weighted_overall() {
        let ai = Arc::new(FixedAi(
            r#"{"coherence": 0.9, "relevance": 1.0, "completeness": 0.5, "explanation": "ok"}"#
                .to_string(),
        ));
        let c = QualityClassifier::new(cfg(), ai);
        let out = c.analyze(&record("Paris."), deadline()).await;
        assert!(!out.failed);
        let overall = out.score.overall.unwrap();
        assert!((overall - (0.4 * 0.9 + 0.4 * 1.0 + 0.2 * 0.5)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_out_of_range_scores_clamped() {
        let ai = Arc::new(FixedAi(
            r#"{"coherence": 1.7, "relevance": -0.2, "completeness": 0.5, "explanation": ""}"#
                .to_string(),
        ));
        let c = QualityClassifier::new(cfg(), ai);
        let out = c.analyze(&record("Paris."), deadline()).await;
        assert!((out.score.coherence - 1.0).abs() < 1e-9);
        assert!((out.score.relevance - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_response_skips_ai() {
        let ai = Arc::new(DownAi);
        let c = QualityClassifier::new(cfg(), ai);
        let out = c.analyze(&record(""), deadline()).await;
        assert!(!out.failed);
        assert!(!out.analyzed);
        assert_eq!(out.score.explanation, "skipped");
        assert_eq!(out.score.overall, Some(1.0));
    }

    #[tokio::test]
    async fn test_disabled_skips_ai() {
        let mut config = PipelineConfig::default();
        config.enable_quality_analysis = false;
        let c = QualityClassifier::new(Arc::new(config), Arc::new(DownAi));
        let out = c.analyze(&record("Paris."), deadline()).await;
        assert!(!out.analyzed);
        assert_eq!(out.score.overall, Some(1.0));
    }

    #[tokio::test]
    async fn test_terminal_failure_nulls_overall() {
        let c = QualityClassifier::new(cfg(), Arc::new(DownAi));
        let out = c.analyze(&record("Paris."), deadline()).await;
        assert!(out.failed);
        assert!(out.score.overall.is_none());
    }

    #[tokio::test]
    async fn test_fenced_json_parses() {
        let ai = Arc::new(FixedAi(
            "```json\n{\"coherence\": 0.8, \"relevance\": 0.8, \"completeness\": 0.8, \"explanation\": \"x\"}\n```"
                .to_string(),
        ));
        let c = QualityClassifier::new(cfg(), ai);
        let out = c.analyze(&record("Paris."), deadline()).await;
        assert!(!out.failed);
        assert!((out.score.overall.unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_prompt_carries_rubric_verbatim() {
        let c = QualityClassifier::new(cfg(), Arc::new(DownAi));
        let prompt = c.build_prompt(&record("Paris."));
        assert!(prompt.contains(SHORT_RESPONSE_RUBRIC));
        assert!(prompt.contains("Capital of France?"));
    }
}
