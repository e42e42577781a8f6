//! Heuristic Matcher: pure, deterministic comparison of extracted requirements against
//! the candidate's declared skills. No model call, no I/O.
//!
//! Schemes:
//! - `exact`:    score = |required ∩ candidate| / |required|
//! - `weighted`: score = (matched + 0.5 × partial) / |required|, where a partial match
//!               shares at least one meaningful token (`aws lambda` vs `aws`).

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::pipeline::extraction::ExtractedSkills;

pub const DEFAULT_HEURISTIC_THRESHOLD: f64 = 0.35;
const PARTIAL_WEIGHT: f64 = 0.5;

/// Canonical names for common aliases. Keys are already punctuation-folded.
const SYNONYMS: &[(&str, &str)] = &[
    ("k8s", "kubernetes"),
    ("kube", "kubernetes"),
    ("golang", "go"),
    ("postgres", "postgresql"),
    ("psql", "postgresql"),
    ("pg", "postgresql"),
    ("js", "javascript"),
    ("ecmascript", "javascript"),
    ("ts", "typescript"),
    ("node", "nodejs"),
    ("reactjs", "react"),
    ("vuejs", "vue"),
    ("nextjs", "next"),
    ("py", "python"),
    ("python3", "python"),
    ("mongo", "mongodb"),
    ("amazon web services", "aws"),
    ("gcp", "google cloud"),
    ("google cloud platform", "google cloud"),
    ("ms azure", "azure"),
    ("microsoft azure", "azure"),
    ("net", "dotnet"),
    ("ci cd", "cicd"),
    ("ml", "machine learning"),
    ("llms", "llm"),
    ("rest api", "rest"),
    ("restful", "rest"),
    ("tf", "terraform"),
    ("elastic search", "elasticsearch"),
];

/// Tokens too generic to count as a partial overlap.
const STOP_TOKENS: &[&str] = &[
    "and", "or", "of", "the", "with", "in", "for", "to", "experience", "skills", "development",
    "engineering", "tools", "systems",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MatchScheme {
    #[default]
    Exact,
    Weighted,
}

impl fmt::Display for MatchScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchScheme::Exact => f.write_str("exact"),
            MatchScheme::Weighted => f.write_str("weighted"),
        }
    }
}

/// What to do when extraction produced no required skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EmptySkillsPolicy {
    /// Nothing to match against means nothing to justify a paid scoring call.
    #[default]
    Reject,
    Pass,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub threshold: f64,
    pub scheme: MatchScheme,
    pub empty_skills: EmptySkillsPolicy,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_HEURISTIC_THRESHOLD,
            scheme: MatchScheme::Exact,
            empty_skills: EmptySkillsPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub score: f64,
    pub passed: bool,
    pub threshold: f64,
    pub scheme: MatchScheme,
    pub matched: Vec<String>,
    pub partial: Vec<String>,
    pub missing: Vec<String>,
}

impl MatchResult {
    pub fn total_required(&self) -> usize {
        self.matched.len() + self.partial.len() + self.missing.len()
    }

    /// One-line human-readable summary, used as the rationale of heuristic rejections.
    pub fn describe(&self) -> String {
        if self.total_required() == 0 {
            return format!(
                "No required skills extracted; empty skill sets are {}",
                if self.passed { "passed" } else { "rejected" }
            );
        }
        let list = |items: &[String]| {
            if items.is_empty() {
                "none".to_string()
            } else {
                items.join(", ")
            }
        };
        format!(
            "Heuristic score {:.2} {} threshold {:.2} ({} scheme; matched: {}; partial: {}; missing: {})",
            self.score,
            if self.passed { "meets" } else { "below" },
            self.threshold,
            self.scheme,
            list(&self.matched),
            list(&self.partial),
            list(&self.missing),
        )
    }
}

/// Lowercases, trims, folds punctuation and maps known aliases to one canonical name.
pub fn normalize_skill(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let folded: String = lowered
        .chars()
        .filter(|c| *c != '.')
        .map(|c| match c {
            '-' | '_' | '/' | ',' | '(' | ')' => ' ',
            other => other,
        })
        .collect();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");

    SYNONYMS
        .iter()
        .find(|(alias, _)| *alias == collapsed)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(collapsed)
}

fn tokens(skill: &str) -> impl Iterator<Item = String> + '_ {
    skill
        .split_whitespace()
        .filter(|t| !STOP_TOKENS.contains(t))
        .map(normalize_skill)
}

/// The candidate's declared skills, normalized once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSkills {
    skills: BTreeSet<String>,
    tokens: HashSet<String>,
}

impl CandidateSkills {
    pub fn new<I, S>(skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let skills: BTreeSet<String> = skills
            .into_iter()
            .map(|s| normalize_skill(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        let token_set = skills.iter().flat_map(|s| tokens(s)).collect();
        Self {
            skills,
            tokens: token_set,
        }
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn contains(&self, normalized: &str) -> bool {
        self.skills.contains(normalized)
    }

    fn shares_token(&self, normalized: &str) -> bool {
        tokens(normalized).any(|t| self.tokens.contains(&t))
    }
}

/// Compares extracted requirements against the candidate. Pass iff score ≥ threshold.
pub fn match_skills(
    extracted: &ExtractedSkills,
    candidate: &CandidateSkills,
    config: &MatcherConfig,
) -> MatchResult {
    let mut seen = HashSet::new();
    let required: Vec<String> = extracted
        .required_skills
        .iter()
        .map(|s| normalize_skill(s))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect();

    if required.is_empty() {
        return MatchResult {
            score: 0.0,
            passed: config.empty_skills == EmptySkillsPolicy::Pass,
            threshold: config.threshold,
            scheme: config.scheme,
            matched: vec![],
            partial: vec![],
            missing: vec![],
        };
    }

    let mut matched = Vec::new();
    let mut partial = Vec::new();
    let mut missing = Vec::new();

    for skill in required {
        if candidate.contains(&skill) {
            matched.push(skill);
        } else if candidate.shares_token(&skill) {
            partial.push(skill);
        } else {
            missing.push(skill);
        }
    }

    let total = (matched.len() + partial.len() + missing.len()) as f64;
    let credited = match config.scheme {
        MatchScheme::Exact => matched.len() as f64,
        MatchScheme::Weighted => matched.len() as f64 + PARTIAL_WEIGHT * partial.len() as f64,
    };
    let score = credited / total;

    MatchResult {
        score,
        passed: score >= config.threshold,
        threshold: config.threshold,
        scheme: config.scheme,
        matched,
        partial,
        missing,
    }
}
