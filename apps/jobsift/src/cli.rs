use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::PipelineConfig;
use crate::pipeline::extraction::DEFAULT_MIN_DESCRIPTION_CHARS;
use crate::pipeline::matcher::{
    EmptySkillsPolicy, MatchScheme, MatcherConfig, DEFAULT_HEURISTIC_THRESHOLD,
};

#[derive(Debug, Parser)]
#[command(name = "jobsift", version, about = "Dedup, match and score scraped job postings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Evaluate a postings file once and print the top matches.
    Run(RunArgs),
    /// Serve the evaluation API.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Scraped postings, as a JSON array or JSON lines.
    #[arg(long, env = "JOBSIFT_POSTINGS")]
    pub postings: PathBuf,

    /// Job boards the postings were scraped from (logged only).
    #[arg(long, value_delimiter = ',')]
    pub sites: Vec<String>,

    /// Skip postings scraped more than this many hours ago.
    #[arg(long, default_value_t = 48)]
    pub hours_old: u32,

    #[command(flatten)]
    pub profile: ProfileArgs,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Overrides `PORT`.
    #[arg(long)]
    pub port: Option<u16>,

    #[command(flatten)]
    pub profile: ProfileArgs,
}

/// Candidate inputs and pipeline knobs shared by both subcommands.
#[derive(Debug, Args)]
pub struct ProfileArgs {
    /// Resume as .txt, .md or .pdf.
    #[arg(long, env = "JOBSIFT_RESUME")]
    pub resume: PathBuf,

    /// Candidate skills, one per line.
    #[arg(long, env = "JOBSIFT_SKILLS")]
    pub skills: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub batch_size: usize,

    /// Scored postings below this are not written to the evaluations table.
    #[arg(long, default_value_t = 0)]
    pub min_score: u8,

    #[arg(long, default_value_t = DEFAULT_HEURISTIC_THRESHOLD)]
    pub heuristic_threshold: f64,

    #[arg(long, value_enum, default_value_t = EmptySkillsPolicy::Reject)]
    pub empty_skills_policy: EmptySkillsPolicy,

    #[arg(long, value_enum, default_value_t = MatchScheme::Exact)]
    pub match_scheme: MatchScheme,

    /// Descriptions shorter than this many characters skip skill extraction.
    #[arg(long, default_value_t = DEFAULT_MIN_DESCRIPTION_CHARS)]
    pub min_description_chars: usize,

    /// Re-run paid stages for postings that already finished.
    #[arg(long)]
    pub force: bool,

    /// Keep all state in memory; nothing is written to PostgreSQL.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, env = "JOBSIFT_EXTRACTION_PROMPT")]
    pub extraction_prompt: Option<PathBuf>,

    #[arg(long, env = "JOBSIFT_SCORING_PROMPT")]
    pub scoring_prompt: Option<PathBuf>,
}

impl ProfileArgs {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size,
            min_score: self.min_score,
            matcher: MatcherConfig {
                threshold: self.heuristic_threshold,
                scheme: self.match_scheme,
                empty_skills: self.empty_skills_policy,
            },
            min_description_chars: self.min_description_chars,
            force: self.force,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse_with_defaults() {
        let cli = Cli::try_parse_from([
            "jobsift",
            "run",
            "--postings",
            "jobs.jsonl",
            "--resume",
            "cv.pdf",
            "--skills",
            "skills.txt",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.hours_old, 48);
        assert!(args.sites.is_empty());
        assert_eq!(args.profile.pipeline_config(), PipelineConfig::default());
    }

    #[test]
    fn test_run_args_map_onto_pipeline_config() {
        let cli = Cli::try_parse_from([
            "jobsift",
            "run",
            "--postings",
            "jobs.json",
            "--resume",
            "cv.md",
            "--skills",
            "skills.txt",
            "--sites",
            "indeed,linkedin",
            "--batch-size",
            "4",
            "--min-score",
            "7",
            "--heuristic-threshold",
            "0.5",
            "--empty-skills-policy",
            "pass",
            "--match-scheme",
            "weighted",
            "--min-description-chars",
            "40",
            "--force",
            "--dry-run",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.sites, vec!["indeed", "linkedin"]);
        assert!(args.profile.dry_run);

        let config = args.profile.pipeline_config();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.min_score, 7);
        assert_eq!(config.min_description_chars, 40);
        assert!(config.force);
        assert_eq!(config.matcher.scheme, MatchScheme::Weighted);
        assert_eq!(config.matcher.empty_skills, EmptySkillsPolicy::Pass);
        assert!((config.matcher.threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_match_scheme_is_rejected() {
        let result = Cli::try_parse_from([
            "jobsift",
            "serve",
            "--resume",
            "cv.md",
            "--skills",
            "skills.txt",
            "--match-scheme",
            "fuzzy",
        ]);
        assert!(result.is_err());
    }
}
