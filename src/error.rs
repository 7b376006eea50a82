//! Error taxonomy for the job runner.
//!
//! Mirrors the class hierarchy in the original implementation
//! (`ASDBJobsError` / `JobError` / `ControlError`) but flattened into one
//! enum, the way the rest of this codebase expresses fallible domains.

use thiserror::Error;

/// Errors the core job-dispatch pipeline can produce.
#[derive(Debug, Error)]
pub enum AsdbJobsError {
    /// A job's `jobtype` column did not match a registered handler.
    #[error("unknown job type: {0}")]
    InvalidJobType(String),

    /// A job's `data` payload was missing a required field or had the wrong shape.
    #[error("invalid job data: {0}")]
    InvalidJobData(String),

    /// A comparippson hit's subject accession had no matching static metadata entry.
    #[error("no metadata entry for {0}")]
    MissingMetadataEntry(String),

    /// A tab-separated result line did not have the expected column count, or a
    /// numeric field failed to parse, or `q_len` was zero.
    #[error("malformed result line: {0}")]
    MalformedResultLine(String),

    /// A job id is not a legal container identifier, so it cannot safely be used
    /// to name (and later kill) the sandbox container.
    #[error("job id {0} is not a valid container name")]
    InvalidContainerName(String),

    /// The in-memory `version` did not match the row's `version` on commit.
    ///
    /// This is a programming error inside the core: a job is only ever
    /// written by the runner that is currently holding it in `running`.
    #[error("job {id} changed in database ({db_version} vs. local {local_version})")]
    JobConflict {
        id: String,
        db_version: i32,
        local_version: i32,
    },

    /// A row that the core expected to still exist (it was just claimed, or
    /// just upserted) vanished underneath it. Per the Design Note in
    /// `SPEC_FULL.md` §4.1, this is always a hard error in the core path.
    #[error("job {0} vanished from the database")]
    JobVanished(String),

    /// The control row for this runner's name does not exist yet.
    #[error("no control row named {0}")]
    MissingControl(String),

    /// A database round-trip failed for transport reasons (connection reset,
    /// pool exhaustion, etc). The caller sleeps and retries.
    #[error("database transport error: {0}")]
    Transport(#[from] sqlx::Error),

    /// The static comparippson metadata file could not be read or parsed at
    /// startup. Fatal: there is no sensible way to run comparippson jobs
    /// without it, so this aborts the process before the supervisor starts.
    #[error("failed to load static metadata: {0}")]
    Metadata(String),
}

impl AsdbJobsError {
    /// Whether this error should be committed to a job as a terminal `failed`
    /// status, as opposed to propagated up to abort the dispatcher.
    ///
    /// Per `spec.md` §4.2/§7: job-class errors are caught at the dispatcher
    /// boundary; conflicts, vanished rows, and transport errors are not.
    pub fn is_job_class(&self) -> bool {
        matches!(
            self,
            AsdbJobsError::InvalidJobType(_)
                | AsdbJobsError::InvalidJobData(_)
                | AsdbJobsError::MissingMetadataEntry(_)
                | AsdbJobsError::MalformedResultLine(_)
                | AsdbJobsError::InvalidContainerName(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_class_errors_are_recoverable_at_dispatcher() {
        assert!(AsdbJobsError::InvalidJobType("mystery".into()).is_job_class());
        assert!(AsdbJobsError::MalformedResultLine("bad row".into()).is_job_class());
    }

    #[test]
    fn conflict_and_vanished_are_not_job_class() {
        assert!(!AsdbJobsError::JobConflict {
            id: "j1".into(),
            db_version: 2,
            local_version: 1,
        }
        .is_job_class());
        assert!(!AsdbJobsError::JobVanished("j1".into()).is_job_class());
    }
}
