//! Extraction Stage: turns a free-text job description into a structured skill record.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::StageError;
use crate::llm_client::{strip_json_fences, LlmClient};
use crate::pipeline::prompts::{PromptTemplate, EXTRACTION_SYSTEM};
use crate::pipeline::schema::complete_validated;

/// Blank descriptions never reach the model; anything longer is extracted unless a
/// higher minimum is configured.
pub const DEFAULT_MIN_DESCRIPTION_CHARS: usize = 0;

/// Larger values are treated as a malformed answer.
pub const MAX_YEARS_EXPERIENCE: u32 = 60;

/// Structured requirements pulled out of one posting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSkills {
    /// Ordered, de-duplicated (case-insensitively), never blank.
    pub required_skills: Vec<String>,
    pub seniority: Option<String>,
    pub years_experience: Option<u32>,
    pub keywords: Vec<String>,
}

/// What the model is asked to return. Only `skills` is mandatory.
#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    skills: Vec<String>,
    #[serde(default)]
    seniority: Option<String>,
    #[serde(default)]
    years_experience: Option<u32>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Trims, drops blanks, and removes case-insensitive repeats keeping first occurrence.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect()
}

/// Validates a raw model answer against the extraction schema.
pub fn parse_extraction(raw: &str) -> Result<ExtractedSkills, String> {
    let response: ExtractionResponse = serde_json::from_str(strip_json_fences(raw))
        .map_err(|e| format!("answer does not match the extraction schema: {e}"))?;

    if let Some(years) = response.years_experience {
        if years > MAX_YEARS_EXPERIENCE {
            return Err(format!(
                "years_experience {years} is above the allowed maximum {MAX_YEARS_EXPERIENCE}"
            ));
        }
    }

    Ok(ExtractedSkills {
        required_skills: clean_list(response.skills),
        seniority: response
            .seniority
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty()),
        years_experience: response.years_experience,
        keywords: clean_list(response.keywords),
    })
}

/// Capability interface for the extraction stage. Tests substitute deterministic fakes.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, description: &str) -> Result<ExtractedSkills, StageError>;
}

/// Model-backed extractor.
pub struct LlmExtractor {
    llm: LlmClient,
    template: PromptTemplate,
    schema_retries: u32,
    min_description_chars: usize,
}

impl LlmExtractor {
    pub fn new(llm: LlmClient, template: PromptTemplate, schema_retries: u32) -> Self {
        Self {
            llm,
            template,
            schema_retries,
            min_description_chars: DEFAULT_MIN_DESCRIPTION_CHARS,
        }
    }

    pub fn with_min_description_chars(mut self, min: usize) -> Self {
        self.min_description_chars = min;
        self
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, description: &str) -> Result<ExtractedSkills, StageError> {
        let length = description.trim().chars().count();
        if length == 0 || length < self.min_description_chars {
            debug!(
                "Description has {length} chars (minimum {}), skipping extraction call",
                self.min_description_chars.max(1)
            );
            return Ok(ExtractedSkills::default());
        }

        let prompt = self.template.render(&[("description", description)]);
        complete_validated(
            &self.llm,
            self.template.name(),
            &prompt,
            EXTRACTION_SYSTEM,
            self.schema_retries,
            parse_extraction,
        )
        .await
    }
}
