// Prompt constants for the extraction and scoring stages.
// Both templates can be replaced at runtime with `--extraction-prompt` / `--scoring-prompt`;
// a replacement must still contain the placeholders its stage fills in.

use crate::errors::AppError;
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, SCORE_TEXT_FORMAT};

/// System prompt for skill extraction.
pub const EXTRACTION_SYSTEM: &str = "You are an expert technical recruiter. \
    Read a job description and list the concrete skills it requires. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// Extraction prompt template. Replace `{description}` before sending.
pub const EXTRACTION_PROMPT_TEMPLATE: &str = r#"Extract the required skills from this job description.

Return a JSON object with this EXACT schema:
{
  "skills": ["python", "aws", "kubernetes"],
  "seniority": "senior",
  "years_experience": 5,
  "keywords": ["backend", "microservices"]
}

Rules:
- "skills": concrete technologies, languages, frameworks, platforms or certifications
  the candidate must have. Short lowercase names ("postgresql", not "experience with PostgreSQL databases").
- Do NOT list soft skills ("communication", "teamwork").
- "seniority": one of "intern", "junior", "mid", "senior", "staff", "principal", or null.
- "years_experience": minimum years required as an integer, or null if not stated.
- "keywords": other notable domain terms, may be empty.

JOB DESCRIPTION:
{description}"#;

/// System prompt for deep scoring.
pub const SCORING_SYSTEM: &str = "You are a candid career advisor. \
    Judge how well a candidate's resume fits a specific job. \
    Be strict: a 10 is reserved for a near-perfect match.";

/// Scoring prompt template. Replace `{resume}`, `{title}`, `{company}`, `{location}` and
/// `{description}` before sending.
pub const SCORING_PROMPT_TEMPLATE: &str = r#"Score how well this candidate fits the job on a scale of 1 to 10.

CANDIDATE RESUME:
{resume}

JOB:
Title: {title}
Company: {company}
Location: {location}

{description}

Return a JSON object with this EXACT schema:
{"score": 7, "rationale": "Two or three sentences naming the strongest overlaps and the biggest gaps."}

The score MUST be an integer between 1 and 10 inclusive."#;

/// Appended to the prompt when the previous answer failed validation.
pub const SCHEMA_RETRY_TEMPLATE: &str = r#"

Your previous answer could not be used: {error}
Previous answer:
{raw_output}

Answer again, following the schema exactly."#;

pub const EXTRACTION_PLACEHOLDERS: &[&str] = &["description"];
pub const SCORING_PLACEHOLDERS: &[&str] = &["resume", "title", "company", "description"];

/// A prompt template with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
}

impl PromptTemplate {
    /// Validates that every placeholder in `required` appears in `text`.
    pub fn new(name: &str, text: impl Into<String>, required: &[&str]) -> Result<Self, AppError> {
        let text = text.into();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| !text.contains(&format!("{{{key}}}")))
            .collect();

        if !missing.is_empty() {
            return Err(AppError::Configuration(format!(
                "prompt template '{name}' is missing placeholder(s): {}",
                missing
                    .iter()
                    .map(|k| format!("{{{k}}}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        Ok(Self {
            name: name.to_string(),
            text,
        })
    }

    pub fn extraction_default() -> Self {
        Self {
            name: "extraction".to_string(),
            text: EXTRACTION_PROMPT_TEMPLATE.to_string(),
        }
    }

    pub fn scoring_default() -> Self {
        Self {
            name: "scoring".to_string(),
            text: SCORING_PROMPT_TEMPLATE.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Substitutes `{key}` for each known key in a single pass. Unknown braces (the
    /// JSON schema examples) are left alone, and substituted values are never
    /// re-scanned, so a description containing `{resume}` stays literal.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let substituted = after.find('}').and_then(|close| {
                let key = &after[..close];
                vars.iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, value)| (*value, close))
            });
            match substituted {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Builds the retry suffix for a schema failure.
pub fn schema_retry_suffix(error: &str, raw_output: &str) -> String {
    PromptTemplate {
        name: "schema_retry".to_string(),
        text: SCHEMA_RETRY_TEMPLATE.to_string(),
    }
    .render(&[("error", error), ("raw_output", raw_output)])
}

/// System prompt for the scoring stage. Endpoints without JSON mode are also allowed
/// the `SCORE:` / `REASONING:` text format.
pub fn scoring_system(json_mode: bool) -> String {
    if json_mode {
        format!("{SCORING_SYSTEM} {JSON_ONLY_SYSTEM}")
    } else {
        format!("{SCORING_SYSTEM} {SCORE_TEXT_FORMAT}")
    }
}
