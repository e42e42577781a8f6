use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{Evaluation, EvaluationFilter, EvaluationRow, NewEvaluation, Posting};
use crate::pipeline::fingerprint::Fingerprint;
use crate::pipeline::stage::{PostingState, Stage};
use crate::store::{PipelineStore, RunLock};

/// Session advisory lock key shared by every jobsift process on one database.
const RUN_LOCK_KEY: i64 = 0x006a_6f62_7369_6674;

const EVALUATION_COLUMNS: &str =
    "id, posting_id, run_id, version, stage, score, rationale, rejection_reason, created_at";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Writes the artifact belonging to the stage `state` has just reached.
async fn insert_stage_artifact(
    tx: &mut Transaction<'_, Postgres>,
    run_id: Uuid,
    state: &PostingState,
) -> Result<(), StoreError> {
    match state.stage {
        Stage::Fingerprinted | Stage::Duplicate => {
            let Some(fp) = state.fingerprint else {
                return Ok(());
            };
            // Fingerprints are computed once; a forced re-run never replaces one.
            sqlx::query(
                r#"
                INSERT INTO fingerprints (posting_id, fingerprint, duplicate_of)
                VALUES ($1, $2, $3)
                ON CONFLICT (posting_id) DO NOTHING
                "#,
            )
            .bind(&state.posting_id)
            .bind(fp.to_i64())
            .bind(state.duplicate_of.as_ref().map(|d| d.posting_id.as_str()))
            .execute(&mut **tx)
            .await?;
        }
        Stage::Extracted => {
            let Some(skills) = &state.extracted else {
                return Ok(());
            };
            sqlx::query(
                r#"
                INSERT INTO extracted_skills
                    (posting_id, run_id, required_skills, seniority, years_experience, keywords)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (posting_id, run_id) DO UPDATE
                SET required_skills = EXCLUDED.required_skills,
                    seniority = EXCLUDED.seniority,
                    years_experience = EXCLUDED.years_experience,
                    keywords = EXCLUDED.keywords
                "#,
            )
            .bind(&state.posting_id)
            .bind(run_id)
            .bind(&skills.required_skills)
            .bind(&skills.seniority)
            .bind(skills.years_experience.and_then(|y| i32::try_from(y).ok()))
            .bind(&skills.keywords)
            .execute(&mut **tx)
            .await?;
        }
        Stage::HeuristicPassed | Stage::HeuristicRejected => {
            let Some(result) = &state.match_result else {
                return Ok(());
            };
            sqlx::query(
                r#"
                INSERT INTO match_results
                    (posting_id, run_id, score, passed, threshold, scheme, matched, partial, missing)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (posting_id, run_id) DO UPDATE
                SET score = EXCLUDED.score,
                    passed = EXCLUDED.passed,
                    threshold = EXCLUDED.threshold,
                    scheme = EXCLUDED.scheme,
                    matched = EXCLUDED.matched,
                    partial = EXCLUDED.partial,
                    missing = EXCLUDED.missing
                "#,
            )
            .bind(&state.posting_id)
            .bind(run_id)
            .bind(result.score)
            .bind(result.passed)
            .bind(result.threshold)
            .bind(result.scheme.to_string())
            .bind(&result.matched)
            .bind(&result.partial)
            .bind(&result.missing)
            .execute(&mut **tx)
            .await?;
        }
        _ => {}
    }
    Ok(())
}

#[async_trait]
impl PipelineStore for PostgresStore {
    async fn lock_runs(&self) -> Result<RunLock, StoreError> {
        // The lock lives as long as the session, so the connection leaves the pool and
        // closing it on drop releases the lock.
        let mut conn = self.pool.acquire().await?.detach();
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut conn)
            .await?;
        if !acquired {
            info!("Another run is in progress; waiting for it to finish");
            sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(RUN_LOCK_KEY)
                .execute(&mut conn)
                .await?;
        }
        Ok(RunLock::new(conn))
    }

    async fn record_posting(&self, posting: &Posting) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO postings
                (id, title, company, location, description, source, scraped_at, url, date_posted)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&posting.id)
        .bind(&posting.title)
        .bind(&posting.company)
        .bind(&posting.location)
        .bind(&posting.description)
        .bind(&posting.source)
        .bind(posting.scraped_at)
        .bind(&posting.url)
        .bind(posting.date_posted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_fingerprints(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, Fingerprint)>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT f.posting_id, f.fingerprint
            FROM fingerprints f
            JOIN postings p ON p.id = f.posting_id
            WHERE f.duplicate_of IS NULL AND p.scraped_at >= $1
            ORDER BY f.created_at, f.posting_id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, fp)| (id, Fingerprint::from_i64(fp)))
            .collect())
    }

    async fn load_state(&self, posting_id: &str) -> Result<Option<PostingState>, StoreError> {
        let snapshot: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT snapshot FROM pipeline_states WHERE posting_id = $1")
                .bind(posting_id)
                .fetch_optional(&self.pool)
                .await?;

        snapshot
            .map(|value| serde_json::from_value::<PostingState>(value))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn commit_stage(
        &self,
        run_id: Uuid,
        state: &PostingState,
        evaluation: Option<&NewEvaluation>,
    ) -> Result<Option<Evaluation>, StoreError> {
        let snapshot = serde_json::to_value(state)?;
        let mut tx = self.pool.begin().await?;

        insert_stage_artifact(&mut tx, run_id, state).await?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_states (posting_id, run_id, stage, retained, snapshot, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (posting_id) DO UPDATE
            SET run_id = EXCLUDED.run_id,
                stage = EXCLUDED.stage,
                retained = EXCLUDED.retained,
                snapshot = EXCLUDED.snapshot,
                updated_at = NOW()
            "#,
        )
        .bind(&state.posting_id)
        .bind(run_id)
        .bind(state.stage.as_str())
        .bind(state.retained)
        .bind(&snapshot)
        .execute(&mut *tx)
        .await?;

        let written = match evaluation {
            Some(new) => {
                // Append-only: the next version is MAX + 1, earlier rows are never touched.
                // The per-posting lock keeps two writers from reading the same MAX.
                sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                    .bind(&new.posting_id)
                    .execute(&mut *tx)
                    .await?;
                let current_max: Option<i32> = sqlx::query_scalar(
                    "SELECT MAX(version) FROM evaluations WHERE posting_id = $1",
                )
                .bind(&new.posting_id)
                .fetch_one(&mut *tx)
                .await?;
                let evaluation = Evaluation::from_new(new, current_max.unwrap_or(0) + 1, Utc::now());

                sqlx::query(
                    r#"
                    INSERT INTO evaluations
                        (id, posting_id, run_id, version, stage, score, rationale, rejection_reason, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(evaluation.id)
                .bind(&evaluation.posting_id)
                .bind(evaluation.run_id)
                .bind(evaluation.version)
                .bind(evaluation.stage.as_str())
                .bind(evaluation.score.map(i16::from))
                .bind(&evaluation.rationale)
                .bind(evaluation.rejection_reason.map(|r| r.as_str()))
                .bind(evaluation.created_at)
                .execute(&mut *tx)
                .await?;

                debug!(
                    "Inserted evaluation for posting {} version {}",
                    evaluation.posting_id, evaluation.version
                );
                Some(evaluation)
            }
            None => None,
        };

        tx.commit().await?;
        Ok(written)
    }

    async fn query_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> Result<Vec<Evaluation>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {EVALUATION_COLUMNS} FROM ( \
                SELECT DISTINCT ON (posting_id) {EVALUATION_COLUMNS} \
                FROM evaluations ORDER BY posting_id, version DESC \
             ) latest WHERE TRUE"
        ));

        if let Some(min) = filter.min_score {
            builder.push(" AND score >= ").push_bind(i16::from(min));
        }
        if let Some(max) = filter.max_score {
            builder.push(" AND score <= ").push_bind(i16::from(max));
        }
        if let Some(reason) = filter.reason {
            builder
                .push(" AND rejection_reason = ")
                .push_bind(reason.as_str());
        }
        if let Some(text) = filter.text.as_deref().filter(|t| !t.trim().is_empty()) {
            builder
                .push(" AND to_tsvector('english', rationale) @@ plainto_tsquery('english', ")
                .push_bind(text.to_string())
                .push(")");
        }
        builder
            .push(" ORDER BY score DESC NULLS LAST, created_at DESC LIMIT ")
            .push_bind(filter.effective_limit());

        let rows: Vec<EvaluationRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Evaluation::try_from).collect()
    }

    async fn evaluation_history(&self, posting_id: &str) -> Result<Vec<Evaluation>, StoreError> {
        let rows: Vec<EvaluationRow> = sqlx::query_as(&format!(
            "SELECT {EVALUATION_COLUMNS} FROM evaluations WHERE posting_id = $1 ORDER BY version ASC"
        ))
        .bind(posting_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Evaluation::try_from).collect()
    }
}
