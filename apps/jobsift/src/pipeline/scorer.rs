//! Deep Scorer: the expensive, full-context model call producing a 1–10 fit score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StageError;
use crate::llm_client::{strip_json_fences, LlmClient};
use crate::models::Posting;
use crate::pipeline::prompts::{scoring_system, PromptTemplate};
use crate::pipeline::schema::complete_validated;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub score: u8,
    pub rationale: String,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
    #[serde(alias = "reasoning")]
    rationale: String,
}

fn validate(score: f64, rationale: &str) -> Result<Assessment, String> {
    if score.fract() != 0.0 {
        return Err(format!("score {score} is not an integer"));
    }
    if score < f64::from(MIN_SCORE) || score > f64::from(MAX_SCORE) {
        return Err(format!(
            "score {score} is outside the allowed range {MIN_SCORE}-{MAX_SCORE}"
        ));
    }
    let rationale = rationale.trim();
    if rationale.is_empty() {
        return Err("rationale is empty".to_string());
    }
    Ok(Assessment {
        score: score as u8,
        rationale: rationale.to_string(),
    })
}

/// Parses the `SCORE: n` / `REASONING: ...` text form. The reasoning runs to the end
/// of the answer.
fn parse_score_text(text: &str) -> Option<(f64, String)> {
    let lower = text.to_ascii_lowercase();
    let score_at = lower.find("score:")?;
    let after_score = text[score_at + "score:".len()..].trim_start();
    let digits: String = after_score
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();
    let score = digits.trim_end_matches('.').parse::<f64>().ok()?;

    let rationale = lower
        .find("reasoning:")
        .map(|at| text[at + "reasoning:".len()..].trim().to_string())
        .unwrap_or_default();

    Some((score, rationale))
}

/// Validates a raw scoring answer. Out-of-range scores are rejected, never clamped.
pub fn parse_assessment(raw: &str) -> Result<Assessment, String> {
    let body = strip_json_fences(raw);

    if let Ok(response) = serde_json::from_str::<ScoreResponse>(body) {
        return validate(response.score, &response.rationale);
    }

    match parse_score_text(body) {
        Some((score, rationale)) => validate(score, &rationale),
        None => Err("answer has neither a JSON score object nor a 'SCORE:' line".to_string()),
    }
}

/// Capability interface for the deep scoring stage. Tests substitute deterministic fakes.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, posting: &Posting, resume: &str) -> Result<Assessment, StageError>;
}

/// Model-backed scorer.
pub struct LlmScorer {
    llm: LlmClient,
    template: PromptTemplate,
    schema_retries: u32,
}

impl LlmScorer {
    pub fn new(llm: LlmClient, template: PromptTemplate, schema_retries: u32) -> Self {
        Self {
            llm,
            template,
            schema_retries,
        }
    }
}

#[async_trait]
impl Scorer for LlmScorer {
    async fn score(&self, posting: &Posting, resume: &str) -> Result<Assessment, StageError> {
        let location = posting.location.as_deref().unwrap_or("Not specified");
        let description = if posting.description.trim().is_empty() {
            "No description available"
        } else {
            posting.description.as_str()
        };

        let prompt = self.template.render(&[
            ("resume", resume),
            ("title", &posting.title),
            ("company", &posting.company),
            ("location", location),
            ("description", description),
        ]);
        let system = scoring_system(self.llm.settings().json_mode);

        complete_validated(
            &self.llm,
            self.template.name(),
            &prompt,
            &system,
            self.schema_retries,
            parse_assessment,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::{chat_body, client};
    use chrono::Utc;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_posting() -> Posting {
        Posting {
            id: "p-1".to_string(),
            title: "Backend Engineer".to_string(),
            company: "Acme".to_string(),
            location: None,
            description: "Python and AWS".to_string(),
            source: "indeed".to_string(),
            scraped_at: Utc::now(),
            url: None,
            date_posted: None,
        }
    }

    #[test]
    fn test_parse_json_assessment() {
        let a = parse_assessment(r#"{"score": 8, "rationale": "Strong Python overlap."}"#).unwrap();
        assert_eq!(a.score, 8);
        assert_eq!(a.rationale, "Strong Python overlap.");
    }

    #[test]
    fn test_parse_json_accepts_reasoning_alias() {
        let a = parse_assessment(r#"{"score": 3, "reasoning": "Mostly frontend."}"#).unwrap();
        assert_eq!(a.score, 3);
    }

    #[test]
    fn test_parse_text_assessment() {
        let raw = "SCORE: 7\nREASONING: Good backend fit.\nMissing Kubernetes.";
        let a = parse_assessment(raw).unwrap();
        assert_eq!(a.score, 7);
        assert_eq!(a.rationale, "Good backend fit.\nMissing Kubernetes.");
    }

    #[test]
    fn test_out_of_range_scores_are_not_clamped() {
        assert!(parse_assessment(r#"{"score": 11, "rationale": "x"}"#).is_err());
        assert!(parse_assessment(r#"{"score": 0, "rationale": "x"}"#).is_err());
        assert!(parse_assessment("SCORE: 11\nREASONING: great").is_err());
        assert!(parse_assessment("Score: -2\nReasoning: awful").is_err());
    }

    #[test]
    fn test_fractional_or_missing_parts_fail() {
        assert!(parse_assessment(r#"{"score": 7.5, "rationale": "x"}"#).is_err());
        assert!(parse_assessment(r#"{"score": 7, "rationale": "  "}"#).is_err());
        assert!(parse_assessment("SCORE: 7").is_err());
        assert!(parse_assessment("I would give this a seven").is_err());
    }

    #[tokio::test]
    async fn test_llm_scorer_retries_out_of_range_score() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("outside the allowed range"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                r#"{"score": 9, "rationale": "Python and AWS match."}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                r#"{"score": 11, "rationale": "Off the charts."}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let scorer = LlmScorer::new(client(&server.uri()), PromptTemplate::scoring_default(), 2);
        let assessment = scorer.score(&make_posting(), "Python, AWS").await.unwrap();
        assert_eq!(assessment.score, 9);
    }

    #[tokio::test]
    async fn test_llm_scorer_fails_when_score_stays_out_of_range() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                r#"{"score": 11, "rationale": "Off the charts."}"#,
            )))
            .expect(3)
            .mount(&server)
            .await;

        let scorer = LlmScorer::new(client(&server.uri()), PromptTemplate::scoring_default(), 2);
        let err = scorer.score(&make_posting(), "Python, AWS").await.unwrap_err();
        assert!(matches!(err, StageError::SchemaValidation { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_llm_scorer_fills_prompt_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Company: Acme"))
            .and(body_string_contains("Location: Not specified"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                "SCORE: 6\nREASONING: Reasonable overlap.",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let scorer = LlmScorer::new(client(&server.uri()), PromptTemplate::scoring_default(), 0);
        let assessment = scorer.score(&make_posting(), "Python").await.unwrap();
        assert_eq!(assessment.score, 6);
    }
}
