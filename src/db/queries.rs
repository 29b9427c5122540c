use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobInput, JobStatus};

const JOB_COLUMNS: &str = "job_id, status, progress, audio_url, lyrics_text, reference_track, \
     hit_factor, audio_score, lyrics_score, brand_score, market_score, \
     recommendations, similar_hits, full_report, model_version, processing_time, \
     completed_at, error_message, claim_id, attempts, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        status,
        progress: row.try_get("progress")?,
        audio_url: row.try_get("audio_url")?,
        lyrics_text: row.try_get("lyrics_text")?,
        reference_track: row.try_get("reference_track")?,
        hit_factor: row.try_get("hit_factor")?,
        audio_score: row.try_get("audio_score")?,
        lyrics_score: row.try_get("lyrics_score")?,
        brand_score: row.try_get("brand_score")?,
        market_score: row.try_get("market_score")?,
        recommendations: row.try_get("recommendations")?,
        similar_hits: row.try_get("similar_hits")?,
        full_report: row.try_get("full_report")?,
        model_version: row.try_get("model_version")?,
        processing_time: row.try_get("processing_time")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        claim_id: row.try_get("claim_id")?,
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new queued job
pub async fn insert_job(pool: &PgPool, input: &JobInput) -> Result<Job, sqlx::Error> {
    let sql = format!(
        "INSERT INTO analysis_jobs (job_id, status, progress, audio_url, lyrics_text, reference_track)
         VALUES ($1, 'queued', 0, $2, $3, $4)
         RETURNING {JOB_COLUMNS}"
    );

    let row = sqlx::query(&sql)
        .bind(&input.job_id)
        .bind(&input.audio_url)
        .bind(&input.lyrics_text)
        .bind(&input.reference_track)
        .fetch_one(pool)
        .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: &str) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE job_id = $1");

    let row = sqlx::query(&sql).bind(job_id).fetch_optional(pool).await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Claim the oldest queued job.
///
/// The inner `FOR UPDATE SKIP LOCKED` makes concurrent callers pass over a row
/// another transaction is already claiming instead of waiting on it, and the
/// status flip commits in the same statement.
pub async fn claim_oldest_queued(pool: &PgPool, claim_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!(
        "UPDATE analysis_jobs
         SET status = 'processing', progress = 0, claim_id = $1,
             attempts = attempts + 1, updated_at = NOW()
         WHERE job_id = (
             SELECT job_id FROM analysis_jobs
             WHERE status = 'queued'
             ORDER BY created_at ASC, job_id ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING {JOB_COLUMNS}"
    );

    let row = sqlx::query(&sql).bind(claim_id).fetch_optional(pool).await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Lock a job row for the rest of the enclosing transaction
pub async fn lock_job(conn: &mut PgConnection, job_id: &str) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE job_id = $1 FOR UPDATE");

    let row = sqlx::query(&sql).bind(job_id).fetch_optional(conn).await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Write back every mutable column of a job
pub async fn save_job(conn: &mut PgConnection, job: &Job) -> Result<Job, sqlx::Error> {
    let sql = format!(
        "UPDATE analysis_jobs
         SET status = $2, progress = $3,
             hit_factor = $4, audio_score = $5, lyrics_score = $6,
             brand_score = $7, market_score = $8,
             recommendations = $9, similar_hits = $10, full_report = $11,
             model_version = $12, processing_time = $13, completed_at = $14,
             error_message = $15, claim_id = $16,
             updated_at = NOW()
         WHERE job_id = $1
         RETURNING {JOB_COLUMNS}"
    );

    let row = sqlx::query(&sql)
        .bind(&job.job_id)
        .bind(job.status.to_string())
        .bind(job.progress)
        .bind(job.hit_factor)
        .bind(job.audio_score)
        .bind(job.lyrics_score)
        .bind(job.brand_score)
        .bind(job.market_score)
        .bind(&job.recommendations)
        .bind(&job.similar_hits)
        .bind(&job.full_report)
        .bind(&job.model_version)
        .bind(job.processing_time)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(job.claim_id)
        .fetch_one(conn)
        .await?;

    job_from_row(&row)
}

/// Return `processing` jobs whose last write is older than `lease` to the queue
pub async fn requeue_stale(pool: &PgPool, lease: Duration) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'queued', progress = 0, claim_id = NULL, updated_at = NOW()
        WHERE status = 'processing'
          AND updated_at < NOW() - make_interval(secs => $1)
        "#,
    )
    .bind(lease.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Number of queued jobs
pub async fn count_queued(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM analysis_jobs WHERE status = 'queued'")
        .fetch_one(pool)
        .await
}
