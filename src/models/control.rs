//! The `controls` table: one row per runner name carrying the drain flag.
//!
//! Grounded on `original_source/asdb_jobs/models/control.py`'s `Control`
//! dataclass and `get_control` helper, reshaped to drop the
//! `aiopg.sa`-style connection-acquire dance in favor of a `PgPool`-backed
//! gateway, matching the teacher's `Record`-ish CRUD methods in
//! `kernel/jobs/job.rs`.

use sqlx::{FromRow, PgPool};

use crate::error::AsdbJobsError;

/// A row of the `controls` table.
#[derive(Debug, Clone, FromRow)]
pub struct Control {
    pub name: String,
    pub status: String,
    pub stop_scheduled: bool,
    pub version: String,
}

/// The control gateway: upsert at startup, re-fetch on every supervisory
/// tick, delete on clean exit.
pub struct ControlGateway {
    pool: PgPool,
}

impl ControlGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update this runner's control row.
    ///
    /// Used once at supervisor startup (`spec.md` §4.3); unlike
    /// [`crate::models::job::JobQueue::commit`], an upsert here is correct
    /// and expected, since the control row's lifecycle is owned entirely by
    /// this process, not shared with a producer.
    pub async fn upsert(&self, control: &Control) -> Result<(), AsdbJobsError> {
        sqlx::query(
            r#"
            INSERT INTO asdb_jobs.controls (name, status, stop_scheduled, version)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET status = EXCLUDED.status,
                stop_scheduled = EXCLUDED.stop_scheduled,
                version = EXCLUDED.version
            "#,
        )
        .bind(&control.name)
        .bind(&control.status)
        .bind(control.stop_scheduled)
        .bind(&control.version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the control row for `name`.
    ///
    /// A missing row is [`AsdbJobsError::MissingControl`] -- per `spec.md`
    /// §7, this only ever signals "no control row exists yet", which the
    /// supervisor only ever observes as a bug (it always upserts its own
    /// row before the first fetch).
    pub async fn fetch(&self, name: &str) -> Result<Control, AsdbJobsError> {
        sqlx::query_as::<_, Control>(
            "SELECT name, status, stop_scheduled, version FROM asdb_jobs.controls WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AsdbJobsError::MissingControl(name.to_string()))
    }

    /// Delete this runner's control row. Called once, on clean supervisor
    /// exit (`spec.md` §4.3).
    pub async fn delete(&self, name: &str) -> Result<(), AsdbJobsError> {
        sqlx::query("DELETE FROM asdb_jobs.controls WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
