//! The `jobs` table: the data model, the job-type tag, and the queue
//! gateway (`spec.md` §3, §4.1).
//!
//! Grounded on `original_source/asdb_jobs/models/job.py` (the `Job`
//! dataclass and `JobQueue.get_next`'s `SELECT ... FOR UPDATE SKIP LOCKED`)
//! and the teacher's `kernel/jobs/job.rs::claim_jobs` /
//! `kernel/jobs/queue.rs` shape, with the upsert branch of `commit` removed
//! per the Design Note in `spec.md` §9: a row that vanishes under the core
//! is always a hard error, never an insert.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

use crate::error::AsdbJobsError;

/// The closed set of job types this runner knows how to execute.
///
/// Stored as plain `TEXT` in the `jobtype` column; `spec.md` §9's Design
/// Note models job-type dispatch as a closed tagged variant rather than a
/// chain of string branches, so parsing happens once, at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Comparippson,
    ClusterBlast,
}

impl JobType {
    pub fn parse(raw: &str) -> Result<Self, AsdbJobsError> {
        match raw {
            "comparippson" => Ok(Self::Comparippson),
            "clusterblast" => Ok(Self::ClusterBlast),
            other => Err(AsdbJobsError::InvalidJobType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comparippson => "comparippson",
            Self::ClusterBlast => "clusterblast",
        }
    }
}

/// The `data` payload every job carries: at minimum a name and a sequence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobData {
    pub name: String,
    pub sequence: String,
}

/// A row of the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: String,
    pub jobtype: String,
    pub status: String,
    pub runner: String,
    pub submitted_date: NaiveDate,
    pub data: Value,
    pub results: Value,
    pub version: i32,
}

impl Job {
    /// Parse this job's `jobtype` column into the closed [`JobType`] set.
    pub fn job_type(&self) -> Result<JobType, AsdbJobsError> {
        JobType::parse(&self.jobtype)
    }

    /// Parse this job's `data` payload into a [`JobData`].
    pub fn job_data(&self) -> Result<JobData, AsdbJobsError> {
        serde_json::from_value(self.data.clone())
            .map_err(|err| AsdbJobsError::InvalidJobData(err.to_string()))
    }

    /// The container runtime identifier this job's sandbox is launched and
    /// killed under. Per `spec.md` §3/§9, it is always the job id itself.
    pub fn container_name(&self) -> &str {
        &self.id
    }

    /// Validate that this job's id is a legal container runtime identifier.
    ///
    /// Per the Design Note in `spec.md` §9: since the container name *is*
    /// the job id, an illegal id must be rejected before it is ever handed
    /// to the sandbox, rather than surfacing as an opaque `podman` failure.
    pub fn validate_container_name(&self) -> Result<(), AsdbJobsError> {
        if is_valid_container_name(&self.id) {
            Ok(())
        } else {
            Err(AsdbJobsError::InvalidContainerName(self.id.clone()))
        }
    }

    pub fn mark_done(&mut self, hits: Vec<Value>) {
        self.status = "done".to_string();
        self.results = serde_json::json!({ "hits": hits });
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = "failed".to_string();
        self.results = serde_json::json!({ "status": "failed", "error": error.into() });
    }
}

/// A legal container runtime identifier starts with an alphanumeric and
/// contains only alphanumerics, `_`, `.`, and `-` thereafter (the grammar
/// `podman`/`docker` enforce for `--name`).
fn is_valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// The queue gateway: atomic claim of the next pending job, and the
/// optimistic-locking commit of a claimed job's terminal state.
pub struct JobQueue {
    pool: PgPool,
}

#[derive(FromRow)]
struct PendingCandidate {
    id: String,
    version: i32,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically claim the next pending job for `runner_name`.
    ///
    /// Selects at most one `pending` row with `FOR UPDATE SKIP LOCKED` so
    /// concurrent claimants never observe the same row, then updates it to
    /// `running` gated on the version just observed, within one
    /// transaction. Returns `None` if no pending job is available.
    pub async fn claim_next(&self, runner_name: &str) -> Result<Option<Job>, AsdbJobsError> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, PendingCandidate>(
            r#"
            SELECT id, version
            FROM asdb_jobs.jobs
            WHERE status = 'pending'
            ORDER BY submitted_date
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE asdb_jobs.jobs
            SET status = 'running', runner = $1, version = version + 1
            WHERE id = $2 AND version = $3
            RETURNING id, jobtype, status, runner, submitted_date, data, results, version
            "#,
        )
        .bind(runner_name)
        .bind(&candidate.id)
        .bind(candidate.version)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    /// Optimistic-locking commit of `job`'s current in-memory state.
    ///
    /// Re-reads the row's version; a vanished row is a hard
    /// [`AsdbJobsError::JobVanished`] (the upsert branch of the original's
    /// `Job.commit` is deliberately not reimplemented, per `spec.md` §9). A
    /// version mismatch is [`AsdbJobsError::JobConflict`] -- the core never
    /// retries this, since two runners holding one job in `running`
    /// violates invariant (iv) and is a programming error, not a
    /// transient condition.
    pub async fn commit(&self, job: &mut Job) -> Result<(), AsdbJobsError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM asdb_jobs.jobs WHERE id = $1")
            .bind(&job.id)
            .fetch_optional(&self.pool)
            .await?;

        let Some((db_version,)) = row else {
            return Err(AsdbJobsError::JobVanished(job.id.clone()));
        };

        if db_version != job.version {
            return Err(AsdbJobsError::JobConflict {
                id: job.id.clone(),
                db_version,
                local_version: job.version,
            });
        }

        let next_version = job.version + 1;
        sqlx::query(
            r#"
            UPDATE asdb_jobs.jobs
            SET status = $1, runner = $2, data = $3, results = $4, version = $5
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(&job.status)
        .bind(&job.runner)
        .bind(&job.data)
        .bind(&job.results)
        .bind(next_version)
        .bind(&job.id)
        .bind(db_version)
        .execute(&self.pool)
        .await?;

        job.version = next_version;
        Ok(())
    }
}
