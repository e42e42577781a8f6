//! Input loaders for the CLI: postings, resume text, candidate skills and prompt files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::models::Posting;
use crate::pipeline::prompts::PromptTemplate;

/// Reads postings from a JSON array or a JSON-lines file. Repeated ids keep their first
/// occurrence.
pub async fn load_postings(path: &Path) -> Result<Vec<Posting>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read postings file {}", path.display()))?;

    let parsed: Vec<Posting> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a valid JSON array of postings", path.display()))?
    } else {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<Posting>(line)
                    .with_context(|| format!("{} line {}: invalid posting", path.display(), i + 1))
            })
            .collect::<Result<_>>()?
    };

    let mut seen = HashSet::new();
    let total = parsed.len();
    let postings: Vec<Posting> = parsed
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect();
    if postings.len() < total {
        warn!(
            "Dropped {} posting(s) with repeated ids from {}",
            total - postings.len(),
            path.display()
        );
    }

    info!("Loaded {} postings from {}", postings.len(), path.display());
    Ok(postings)
}

/// Keeps postings scraped within the last `hours_old` hours. A window reaching past the
/// earliest representable time keeps everything.
pub fn filter_fresh(postings: Vec<Posting>, hours_old: u32, now: DateTime<Utc>) -> Vec<Posting> {
    let Some(cutoff) = now.checked_sub_signed(Duration::hours(i64::from(hours_old))) else {
        return postings;
    };
    let total = postings.len();
    let fresh: Vec<Posting> = postings
        .into_iter()
        .filter(|p| p.scraped_at >= cutoff)
        .collect();
    if fresh.len() < total {
        info!(
            "Skipped {} posting(s) scraped more than {hours_old}h ago",
            total - fresh.len()
        );
    }
    fresh
}

/// Reads resume text from `.txt` / `.md` or extracts it from a `.pdf`.
pub async fn load_resume(path: &Path) -> Result<String> {
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("pdf"));

    let text = if is_pdf {
        let owned: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
            .await
            .context("PDF extraction task panicked")?
            .map_err(|e| anyhow!("Failed to extract text from {}: {e:?}", path.display()))?
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read resume {}", path.display()))?
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        bail!("Resume {} contains no text", path.display());
    }
    Ok(text)
}

/// One skill per line; blank lines and `#` comments are ignored.
pub async fn load_candidate_skills(path: &Path) -> Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read skills file {}", path.display()))?;

    let skills: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if skills.is_empty() {
        bail!("Skills file {} lists no skills", path.display());
    }
    Ok(skills)
}

/// Loads a replacement prompt template and checks its placeholders.
pub async fn load_prompt(path: &Path, name: &str, required: &[&str]) -> Result<PromptTemplate> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {name} prompt {}", path.display()))?;
    Ok(PromptTemplate::new(name, text, required)?)
}
