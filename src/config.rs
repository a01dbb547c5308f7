//! Configuration module
//!
//! One strongly-typed configuration record, loaded from environment variables
//! at startup and immutable for the life of the process. Every threshold has
//! an override; a variable that is present but invalid fails startup with a
//! message naming it - the pipeline never runs on a partially-valid config.

use std::env;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// ERROR
// ============================================================================

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// CONFIG
// ============================================================================

/// Process-wide pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Feature switches
    pub enable_threat_detection: bool,
    pub enable_anomaly_detection: bool,
    pub enable_quality_analysis: bool,
    pub enable_incident_emission: bool,

    // Thresholds
    pub cost_anomaly_usd_per_day: f64,
    pub cost_z_threshold: f64,
    pub latency_abs_ms: f64,
    pub latency_p95_ms: f64,
    pub quality_min_overall: f64,
    pub quality_min_coherence: f64,
    pub quality_min_relevance: f64,
    pub quality_min_completeness: f64,
    pub error_rate_max: f64,
    pub threat_min_confidence: f64,
    pub toxicity_min: f64,

    // Quality weighting (must sum to 1)
    pub quality_weight_coherence: f64,
    pub quality_weight_relevance: f64,
    pub quality_weight_completeness: f64,

    // Concurrency
    pub max_concurrent_analyses: usize,
    pub batch_size: usize,
    pub batch_timeout: Duration,

    // AI client
    pub model_name: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub max_retries: u32,
    pub per_call_timeout: Duration,

    // Rolling windows
    pub window_capacity: usize,
    pub min_samples_for_stat: usize,
    pub sample_horizon_secs: i64,

    // Normalizer
    pub max_text_bytes: usize,
    pub dedup_capacity: usize,

    // Emission & host
    pub metric_namespace: String,
    pub require_on_startup: bool,
    pub port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_threat_detection: true,
            enable_anomaly_detection: true,
            enable_quality_analysis: true,
            enable_incident_emission: true,

            cost_anomaly_usd_per_day: 400_000.0,
            cost_z_threshold: 3.0,
            latency_abs_ms: 5000.0,
            latency_p95_ms: 3000.0,
            quality_min_overall: 0.7,
            quality_min_coherence: 0.6,
            quality_min_relevance: 0.6,
            quality_min_completeness: 0.5,
            error_rate_max: 0.05,
            threat_min_confidence: 0.75,
            toxicity_min: 0.7,

            quality_weight_coherence: 0.4,
            quality_weight_relevance: 0.4,
            quality_weight_completeness: 0.2,

            max_concurrent_analyses: 10,
            batch_size: 50,
            batch_timeout: Duration::from_secs(30),

            model_name: "gemini-2.0-flash".to_string(),
            temperature: 0.2,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 2048,
            max_retries: 3,
            per_call_timeout: Duration::from_secs(30),

            window_capacity: 1000,
            min_samples_for_stat: 30,
            sample_horizon_secs: 86_400,

            max_text_bytes: 64 * 1024,
            dedup_capacity: 10_000,

            metric_namespace: "guardian".to_string(),
            require_on_startup: false,
            port: 8080,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `GUARDIAN_*` environment variables, falling
    /// back to documented defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            enable_threat_detection: parse_bool("GUARDIAN_ENABLE_THREAT_DETECTION", d.enable_threat_detection)?,
            enable_anomaly_detection: parse_bool("GUARDIAN_ENABLE_ANOMALY_DETECTION", d.enable_anomaly_detection)?,
            enable_quality_analysis: parse_bool("GUARDIAN_ENABLE_QUALITY_ANALYSIS", d.enable_quality_analysis)?,
            enable_incident_emission: parse_bool("GUARDIAN_ENABLE_INCIDENT_EMISSION", d.enable_incident_emission)?,

            cost_anomaly_usd_per_day: parse_var("GUARDIAN_COST_ANOMALY_USD_PER_DAY", d.cost_anomaly_usd_per_day)?,
            cost_z_threshold: parse_var("GUARDIAN_COST_Z_THRESHOLD", d.cost_z_threshold)?,
            latency_abs_ms: parse_var("GUARDIAN_LATENCY_ABS_MS", d.latency_abs_ms)?,
            latency_p95_ms: parse_var("GUARDIAN_LATENCY_P95_MS", d.latency_p95_ms)?,
            quality_min_overall: parse_prob("GUARDIAN_QUALITY_MIN_OVERALL", d.quality_min_overall)?,
            quality_min_coherence: parse_prob("GUARDIAN_QUALITY_MIN_COHERENCE", d.quality_min_coherence)?,
            quality_min_relevance: parse_prob("GUARDIAN_QUALITY_MIN_RELEVANCE", d.quality_min_relevance)?,
            quality_min_completeness: parse_prob("GUARDIAN_QUALITY_MIN_COMPLETENESS", d.quality_min_completeness)?,
            error_rate_max: parse_prob("GUARDIAN_ERROR_RATE_MAX", d.error_rate_max)?,
            threat_min_confidence: parse_prob("GUARDIAN_THREAT_MIN_CONFIDENCE", d.threat_min_confidence)?,
            toxicity_min: parse_prob("GUARDIAN_TOXICITY_MIN", d.toxicity_min)?,

            quality_weight_coherence: parse_prob("GUARDIAN_QUALITY_WEIGHT_COHERENCE", d.quality_weight_coherence)?,
            quality_weight_relevance: parse_prob("GUARDIAN_QUALITY_WEIGHT_RELEVANCE", d.quality_weight_relevance)?,
            quality_weight_completeness: parse_prob("GUARDIAN_QUALITY_WEIGHT_COMPLETENESS", d.quality_weight_completeness)?,

            max_concurrent_analyses: parse_var("GUARDIAN_MAX_CONCURRENT_ANALYSES", d.max_concurrent_analyses)?,
            batch_size: parse_var("GUARDIAN_BATCH_SIZE", d.batch_size)?,
            batch_timeout: Duration::from_secs(parse_var("GUARDIAN_BATCH_TIMEOUT_SECS", 30u64)?),

            model_name: env::var("GUARDIAN_MODEL_NAME").unwrap_or(d.model_name),
            temperature: parse_var("GUARDIAN_TEMPERATURE", d.temperature)?,
            top_p: parse_prob("GUARDIAN_TOP_P", d.top_p)?,
            top_k: parse_var("GUARDIAN_TOP_K", d.top_k)?,
            max_output_tokens: parse_var("GUARDIAN_MAX_OUTPUT_TOKENS", d.max_output_tokens)?,
            max_retries: parse_var("GUARDIAN_MAX_RETRIES", d.max_retries)?,
            per_call_timeout: Duration::from_secs(parse_var("GUARDIAN_PER_CALL_TIMEOUT_SECS", 30u64)?),

            window_capacity: parse_var("GUARDIAN_WINDOW_CAPACITY", d.window_capacity)?,
            min_samples_for_stat: parse_var("GUARDIAN_MIN_SAMPLES_FOR_STAT", d.min_samples_for_stat)?,
            sample_horizon_secs: parse_var("GUARDIAN_SAMPLE_HORIZON_SECS", d.sample_horizon_secs)?,

            max_text_bytes: parse_var("GUARDIAN_MAX_TEXT_BYTES", d.max_text_bytes)?,
            dedup_capacity: parse_var("GUARDIAN_DEDUP_CAPACITY", d.dedup_capacity)?,

            metric_namespace: env::var("GUARDIAN_METRIC_NAMESPACE").unwrap_or(d.metric_namespace),
            require_on_startup: parse_bool("GUARDIAN_REQUIRE_ON_STARTUP", d.require_on_startup)?,
            port: parse_var("GUARDIAN_PORT", d.port)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-field validation. Called by `from_env`; exposed for configs
    /// constructed directly in tests and embeddings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_analyses < 1 {
            return Err(ConfigError("max_concurrent_analyses must be at least 1".into()));
        }
        if self.batch_size < 1 {
            return Err(ConfigError("batch_size must be at least 1".into()));
        }
        if self.window_capacity < 1 {
            return Err(ConfigError("window_capacity must be at least 1".into()));
        }
        if self.cost_anomaly_usd_per_day <= 0.0 {
            return Err(ConfigError("cost_anomaly_usd_per_day must be positive".into()));
        }
        if self.cost_z_threshold <= 0.0 {
            return Err(ConfigError("cost_z_threshold must be positive".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError(format!(
                "temperature must be in [0, 2], got {}",
                self.temperature
            )));
        }
        let weight_sum = self.quality_weight_coherence
            + self.quality_weight_relevance
            + self.quality_weight_completeness;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError(format!(
                "quality weights must sum to 1.0, got {}",
                weight_sum
            )));
        }
        Ok(())
    }

    /// Whole-record deadline: per-call timeout across every retry of all
    /// three analyzers, plus fixed overhead.
    pub fn record_deadline(&self) -> Duration {
        self.per_call_timeout * (self.max_retries + 1) * 3 + Duration::from_secs(2)
    }

    /// Intake queue bound; a full queue is the overload signal.
    pub fn intake_capacity(&self) -> usize {
        self.batch_size * 2
    }
}

// ============================================================================
// PARSERS
// ============================================================================

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError(format!("{}: invalid value {:?} ({})", name, raw, e))),
        Err(_) => Ok(default),
    }
}

fn parse_prob(name: &str, default: f64) -> Result<f64, ConfigError> {
    let v: f64 = parse_var(name, default)?;
    if !(0.0..=1.0).contains(&v) {
        return Err(ConfigError(format!(
            "{}: expected a value in [0, 1], got {}",
            name, v
        )));
    }
    Ok(v)
}

fn parse_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ConfigError(format!(
                "{}: expected a boolean, got {:?}",
                name, other
            ))),
        },
        Err(_) => Ok(default),
    }
}

// ============================================================================
// TESTS
// ============================================================================
