//! Running a single claimed job to completion (`spec.md` §4.2/§6).
//!
//! Grounded on `original_source/asdb_jobs/core.py`'s `handle_job` /
//! `handle_comparippson` / `handle_clusterblast`, with the container
//! command lines copied verbatim from there. The sandbox-outcome branches
//! commit the job directly, the way the original always does; anything
//! classified job-class (see [`AsdbJobsError::is_job_class`]) is instead
//! propagated uncommitted, for `dispatcher.rs` to catch and commit
//! uniformly -- see `spec.md` §9's Design Note on the error boundary.

use std::sync::Arc;

use tracing::debug;

use crate::config::RunConfig;
use crate::error::AsdbJobsError;
use crate::metadata::StaticMetadata;
use crate::models::job::{Job, JobQueue, JobType};
use crate::results::{parse_blast_lines, sort_comparippson_descending, ClusterBlastResult, ComparippsonResult};
use crate::sandbox::{ProcessRunner, SandboxOutcome, SandboxOutput};

const COMPARIPPSON_IMAGE: &str = "docker.io/antismash/asdb-jobs:latest";

/// Everything a handler needs besides the job itself.
pub struct HandlerDeps {
    pub config: Arc<RunConfig>,
    pub metadata: Arc<StaticMetadata>,
    pub sandbox: Arc<dyn ProcessRunner>,
}

/// Run `job` to completion and commit its terminal state.
///
/// Job-class errors (unknown job type, bad job data, bad container name,
/// malformed result lines, missing metadata entries) are returned
/// uncommitted for the caller to handle; all other outcomes are committed
/// here, matching exactly one commit per dispatched job either way.
pub async fn dispatch(job: &mut Job, deps: &HandlerDeps, queue: &JobQueue) -> Result<(), AsdbJobsError> {
    debug!(job_id = %job.id, jobtype = %job.jobtype, "handling job");

    job.validate_container_name()?;
    let job_type = job.job_type()?;

    match job_type {
        JobType::Comparippson => handle_comparippson(job, deps, queue).await,
        JobType::ClusterBlast => handle_clusterblast(job, deps, queue).await,
    }
}

fn fasta_stdin(name: &str, sequence: &str) -> String {
    format!(">{name}\n{sequence}")
}

/// Apply a sandbox outcome to the in-memory job state. Split out from
/// [`commit_outcome`] so the marking logic can be tested without a database.
fn apply_outcome(job: &mut Job, outcome: &SandboxOutput, hits: Option<Vec<serde_json::Value>>) {
    match outcome.outcome {
        SandboxOutcome::Timeout => job.mark_failed("timeout exceeded"),
        SandboxOutcome::Failure => job.mark_failed(outcome.stderr.join("\n")),
        SandboxOutcome::Success => job.mark_done(hits.unwrap_or_default()),
        SandboxOutcome::InternalError => job.mark_failed("internal error running sandbox"),
    }
}

async fn commit_outcome(
    job: &mut Job,
    queue: &JobQueue,
    outcome: &SandboxOutput,
    hits: Option<Vec<serde_json::Value>>,
) -> Result<(), AsdbJobsError> {
    apply_outcome(job, outcome, hits);
    queue.commit(job).await
}

async fn handle_comparippson(job: &mut Job, deps: &HandlerDeps, queue: &JobQueue) -> Result<(), AsdbJobsError> {
    let data = job.job_data()?;
    let db_dir = deps.config.db_dir();

    let cmdline: Vec<String> = vec![
        "podman".into(),
        "run".into(),
        "--detach=false".into(),
        "--rm".into(),
        "--interactive".into(),
        "--volume".into(),
        format!("{}:/databases:ro", db_dir.display()),
        "--name".into(),
        job.id.clone(),
        COMPARIPPSON_IMAGE.into(),
        "blastp".into(),
        "-num_threads".into(),
        "4".into(),
        "-db".into(),
        "/databases/comparippson/asdb/3.9/cores.fa".into(),
        "-outfmt".into(),
        "6 qacc sacc nident qseq qstart qend qlen sseq sstart send slen".into(),
    ];

    let stdin = fasta_stdin(&data.name, &data.sequence);
    let outcome = deps.sandbox.run(&job.id, &cmdline, &stdin).await?;

    if outcome.outcome != SandboxOutcome::Success {
        return commit_outcome(job, queue, &outcome, None).await;
    }

    let blast_results = parse_blast_lines(&outcome.stdout)?;
    let mut enriched: Vec<ComparippsonResult> = blast_results
        .into_iter()
        .map(|b| ComparippsonResult::from_blast(b, &deps.metadata))
        .collect::<Result<_, _>>()?;
    sort_comparippson_descending(&mut enriched);

    let hits = enriched
        .into_iter()
        .map(|r| serde_json::to_value(r).expect("ComparippsonResult serializes"))
        .collect();

    commit_outcome(job, queue, &outcome, Some(hits)).await
}

async fn handle_clusterblast(job: &mut Job, deps: &HandlerDeps, queue: &JobQueue) -> Result<(), AsdbJobsError> {
    let data = job.job_data()?;
    let db_dir = deps.config.db_dir();

    let cmdline: Vec<String> = vec![
        "podman".into(),
        "run".into(),
        "--detach=false".into(),
        "--rm".into(),
        "--interactive".into(),
        "--volume".into(),
        format!("{}:/databases:ro", db_dir.display()),
        "--name".into(),
        job.id.clone(),
        COMPARIPPSON_IMAGE.into(),
        "diamond".into(),
        "blastp".into(),
        "--db".into(),
        "/databases/clusterblast/proteins".into(),
        "--compress".into(),
        "0".into(),
        "--max-target-seqs".into(),
        "50".into(),
        "--evalue".into(),
        "1e-05".into(),
        "--outfmt".into(),
        "6".into(),
        "qseqid".into(),
        "sseqid".into(),
        "nident".into(),
        "qseq".into(),
        "qstart".into(),
        "qend".into(),
        "qlen".into(),
        "sseq".into(),
        "sstart".into(),
        "send".into(),
        "slen".into(),
    ];

    let stdin = fasta_stdin(&data.name, &data.sequence);
    let outcome = deps.sandbox.run(&job.id, &cmdline, &stdin).await?;

    if outcome.outcome != SandboxOutcome::Success {
        return commit_outcome(job, queue, &outcome, None).await;
    }

    let blast_results = parse_blast_lines(&outcome.stdout)?;
    let hits = blast_results
        .into_iter()
        .map(|b| {
            let projected: ClusterBlastResult = b.into();
            serde_json::to_value(projected).expect("ClusterBlastResult serializes")
        })
        .collect();

    commit_outcome(job, queue, &outcome, Some(hits)).await
}
