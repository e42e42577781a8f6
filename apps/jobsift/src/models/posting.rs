use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A scraped job advertisement. Postings are immutable: the pipeline reads them,
/// never edits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: String,
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "site")]
    pub source: String,
    #[serde(alias = "date_scraped")]
    pub scraped_at: DateTime<Utc>,
    #[serde(default, alias = "job_url")]
    pub url: Option<String>,
    #[serde(default)]
    pub date_posted: Option<NaiveDate>,
}

impl Posting {
    /// Short `title @ company` label used in log lines.
    pub fn label(&self) -> String {
        format!("{} @ {}", self.title, self.company)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posting_accepts_scraper_field_aliases() {
        let json = r#"{
            "id": "indeed-123",
            "title": "Backend Engineer",
            "company": "Acme",
            "location": "Berlin",
            "description": "Build services in Rust.",
            "site": "indeed",
            "date_scraped": "2026-10-01T08:00:00Z",
            "job_url": "https://example.com/jobs/123"
        }"#;

        let posting: Posting = serde_json::from_str(json).unwrap();
        assert_eq!(posting.source, "indeed");
        assert_eq!(posting.url.as_deref(), Some("https://example.com/jobs/123"));
        assert!(posting.date_posted.is_none());
        assert_eq!(posting.label(), "Backend Engineer @ Acme");
    }

    #[test]
    fn test_posting_missing_description_defaults_to_empty() {
        let json = r#"{
            "id": "li-9",
            "title": "Data Engineer",
            "company": "Globex",
            "source": "linkedin",
            "scraped_at": "2026-10-01T08:00:00Z"
        }"#;

        let posting: Posting = serde_json::from_str(json).unwrap();
        assert!(posting.description.is_empty());
        assert!(posting.location.is_none());
    }
}
