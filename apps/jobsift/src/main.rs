mod cli;
mod config;
mod db;
mod errors;
mod ingest;
mod llm_client;
mod models;
mod pipeline;
mod routes;
mod state;
mod store;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Cli, Command, ProfileArgs, RunArgs, ServeArgs};
use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::llm_client::LlmClient;
use crate::pipeline::extraction::LlmExtractor;
use crate::pipeline::matcher::CandidateSkills;
use crate::pipeline::prompts::{PromptTemplate, EXTRACTION_PLACEHOLDERS, SCORING_PLACEHOLDERS};
use crate::pipeline::scorer::LlmScorer;
use crate::pipeline::Pipeline;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{MemoryStore, PipelineStore, PostgresStore};

const TOP_MATCHES: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting jobsift v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run(args) => run(&config, args).await,
        Command::Serve(args) => serve(&config, args).await,
    }
}

async fn run(config: &Config, args: RunArgs) -> Result<()> {
    let pipeline = build_pipeline(config, &args.profile).await?;

    let postings = ingest::load_postings(&args.postings).await?;
    let postings = ingest::filter_fresh(postings, args.hours_old, Utc::now());
    if !args.sites.is_empty() {
        info!("Postings scraped from: {}", args.sites.join(", "));
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight stages");
                cancel.cancel();
            }
        }
    });

    let summary = pipeline.run(postings, &cancel).await?;

    let top = summary.top_matches(TOP_MATCHES);
    if top.is_empty() {
        info!("No postings scored at or above the minimum score");
    }
    for (rank, outcome) in top.iter().enumerate() {
        info!(
            "#{} {}/10 {} [{}]",
            rank + 1,
            outcome.score.unwrap_or_default(),
            outcome.label,
            outcome.posting_id
        );
    }
    if summary.cancelled {
        warn!(
            "Run {} was cancelled; rerun to resume {} unprocessed posting(s)",
            summary.run_id, summary.unprocessed
        );
    }

    Ok(())
}

async fn serve(config: &Config, args: ServeArgs) -> Result<()> {
    let pipeline = build_pipeline(config, &args.profile).await?;
    let shutdown = CancellationToken::new();
    let state = AppState::new(pipeline, shutdown.clone());

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port = args.port.unwrap_or(config.port);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

/// Loads candidate inputs, verifies both model endpoints and opens the store. Any failure
/// here is fatal before a posting is touched.
async fn build_pipeline(config: &Config, profile: &ProfileArgs) -> Result<Pipeline> {
    let pipeline_config = profile.pipeline_config();
    pipeline_config.validate()?;

    let resume = ingest::load_resume(&profile.resume).await?;
    let skills = ingest::load_candidate_skills(&profile.skills).await?;
    let candidate = CandidateSkills::new(&skills);
    info!(
        "Candidate profile: {} resume chars, {} skills",
        resume.len(),
        candidate.len()
    );

    let extraction_template = match &profile.extraction_prompt {
        Some(path) => ingest::load_prompt(path, "extraction", EXTRACTION_PLACEHOLDERS).await?,
        None => PromptTemplate::extraction_default(),
    };
    let scoring_template = match &profile.scoring_prompt {
        Some(path) => ingest::load_prompt(path, "scoring", SCORING_PLACEHOLDERS).await?,
        None => PromptTemplate::scoring_default(),
    };

    let extraction_llm = LlmClient::new(&config.extraction)?;
    let scoring_llm = LlmClient::new(&config.scoring)?;
    for (stage, llm) in [("extraction", &extraction_llm), ("scoring", &scoring_llm)] {
        llm.check_connection().await.with_context(|| {
            format!(
                "Cannot reach the {stage} model endpoint at {}",
                llm.settings().base_url
            )
        })?;
        info!("{stage} model ready: {}", llm.settings().model);
    }

    let store: Arc<dyn PipelineStore> = if profile.dry_run {
        info!("Dry run: using the in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set unless --dry-run is given")?;
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Arc::new(PostgresStore::new(pool))
    };

    let schema_retries = pipeline_config.schema_retries;
    Ok(Pipeline::new(
        Arc::new(
            LlmExtractor::new(extraction_llm, extraction_template, schema_retries)
                .with_min_description_chars(pipeline_config.min_description_chars),
        ),
        Arc::new(LlmScorer::new(scoring_llm, scoring_template, schema_retries)),
        store,
        candidate,
        &resume,
        pipeline_config,
    ))
}
