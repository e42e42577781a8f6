use anyhow::{Context, Result};

use crate::errors::AppError;
use crate::llm_client::{LlmSettings, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::pipeline::extraction::DEFAULT_MIN_DESCRIPTION_CHARS;
use crate::pipeline::fingerprint::DEFAULT_HAMMING_THRESHOLD;
use crate::pipeline::matcher::MatcherConfig;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Required unless running with `--dry-run`.
    pub database_url: Option<String>,
    pub extraction: LlmSettings,
    pub scoring: LlmSettings,
    pub port: u16,
    pub rust_log: String,
}

/// Per-stage defaults. Extraction wants near-deterministic output, scoring a little
/// more room for the rationale.
struct StageDefaults {
    prefix: &'static str,
    temperature: f32,
    max_tokens: u32,
}

const EXTRACTION_DEFAULTS: StageDefaults = StageDefaults {
    prefix: "EXTRACTION",
    temperature: 0.1,
    max_tokens: 1000,
};

const SCORING_DEFAULTS: StageDefaults = StageDefaults {
    prefix: "SCORING",
    temperature: 0.3,
    max_tokens: 3000,
};

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            database_url: lookup("DATABASE_URL"),
            extraction: stage_settings(&lookup, &EXTRACTION_DEFAULTS)?,
            scoring: stage_settings(&lookup, &SCORING_DEFAULTS)?,
            port: lookup("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// `{STAGE}_*` first, then the shared `OPENAI_*` fallback.
fn stage_settings<F>(lookup: &F, defaults: &StageDefaults) -> Result<LlmSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = defaults.prefix;
    let stage_var = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));
    let shared = |suffix: &str| stage_var(suffix).or_else(|| lookup(&format!("OPENAI_{suffix}")));

    let api_key = shared("API_KEY").with_context(|| {
        format!(
            "Required environment variable '{prefix}_API_KEY' (or 'OPENAI_API_KEY') is not set"
        )
    })?;

    Ok(LlmSettings {
        api_key,
        base_url: shared("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        model: shared("MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        temperature: parse_or(stage_var("TEMPERATURE"), defaults.temperature, prefix, "TEMPERATURE")?,
        max_tokens: parse_or(stage_var("MAX_TOKENS"), defaults.max_tokens, prefix, "MAX_TOKENS")?,
        timeout_secs: parse_or(shared("TIMEOUT_SECS"), 120, prefix, "TIMEOUT_SECS")?,
        json_mode: parse_or(stage_var("JSON_MODE"), true, prefix, "JSON_MODE")?,
    })
}

fn parse_or<T>(value: Option<String>, default: T, prefix: &str, suffix: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{prefix}_{suffix} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline run configuration
// ────────────────────────────────────────────────────────────────────────────

/// Immutable knobs for one pipeline run. Validated once before any posting is touched.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// `Scored` postings below this are processed but not written to the evaluations table.
    pub min_score: u8,
    pub hamming_threshold: u32,
    pub dedup_window_days: i64,
    pub matcher: MatcherConfig,
    pub schema_retries: u32,
    /// Descriptions shorter than this skip the extraction call and get no skills.
    pub min_description_chars: usize,
    /// Re-run paid stages for postings that already reached a terminal stage.
    pub force: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            min_score: 0,
            hamming_threshold: DEFAULT_HAMMING_THRESHOLD,
            dedup_window_days: 60,
            matcher: MatcherConfig::default(),
            schema_retries: 2,
            min_description_chars: DEFAULT_MIN_DESCRIPTION_CHARS,
            force: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        let threshold = self.matcher.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::Configuration(format!(
                "heuristic threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.batch_size == 0 {
            return Err(AppError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.min_score > 10 {
            return Err(AppError::Configuration(format!(
                "min score must be within [0, 10], got {}",
                self.min_score
            )));
        }
        if self.hamming_threshold >= 64 {
            return Err(AppError::Configuration(format!(
                "hamming threshold must be below 64, got {}",
                self.hamming_threshold
            )));
        }
        if self.dedup_window_days <= 0 {
            return Err(AppError::Configuration(format!(
                "dedup window must be at least one day, got {}",
                self.dedup_window_days
            )));
        }
        Ok(())
    }
}
