//! End-to-end scenarios against a real Postgres container, covering the six
//! scenarios in `spec.md` §8. The analysis tool itself is faked (a
//! [`FakeRunner`]) so these tests never shell out to `podman`/`blastp`.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use asdb_jobs::dispatcher::Dispatcher;
use asdb_jobs::error::AsdbJobsError;
use asdb_jobs::handler::{self, HandlerDeps};
use asdb_jobs::metadata::{MetadataEntry, StaticMetadata};
use asdb_jobs::models::control::ControlGateway;
use asdb_jobs::models::job::JobQueue;
use asdb_jobs::sandbox::{ProcessRunner, SandboxOutcome, SandboxOutput};
use asdb_jobs::supervisor::Supervisor;
use chrono::Utc;
use serde_json::{json, Value};

struct FakeRunner {
    outcome: SandboxOutcome,
    stdout: Vec<String>,
    stderr: Vec<String>,
    calls: AtomicUsize,
}

impl FakeRunner {
    fn new(outcome: SandboxOutcome, stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self {
            outcome,
            stdout,
            stderr,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        _container_name: &str,
        _cmdline: &[String],
        _stdin: &str,
    ) -> Result<SandboxOutput, AsdbJobsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxOutput {
            outcome: self.outcome,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }
}

fn metadata_with(entry_id: &str, entry: MetadataEntry) -> Arc<StaticMetadata> {
    let mut entries = HashMap::new();
    entries.insert(entry_id.to_string(), entry);
    Arc::new(StaticMetadata::from_entries(entries))
}

#[tokio::test]
async fn s1_happy_path_comparippson() {
    let pool = common::test_pool().await;
    let queue = JobQueue::new(pool.clone());

    sqlx::query(
        "INSERT INTO asdb_jobs.jobs (id, jobtype, status, runner, submitted_date, data, results, version)
         VALUES ('j1', 'comparippson', 'pending', '', $1, $2, '{}'::jsonb, 0)",
    )
    .bind(Utc::now().date_naive())
    .bind(json!({"name": "q1", "sequence": "MAGIC"}))
    .execute(&pool)
    .await
    .unwrap();

    let mut job = queue.claim_next("runner-1").await.unwrap().unwrap();
    assert_eq!(job.version, 1);

    let metadata = metadata_with(
        "ENT1",
        MetadataEntry {
            locus: "L".into(),
            kind: "T".into(),
            accession: "A".into(),
            start: Value::from(1),
            end: Value::from(99),
        },
    );
    let sandbox = Arc::new(FakeRunner::new(
        SandboxOutcome::Success,
        vec!["q1\tENT1|x\t4\tMAGI\t1\t4\t5\tMAGX\t10\t13\t20".to_string()],
        vec![],
    ));
    let deps = HandlerDeps {
        config: common::test_run_config("runner-1", 1),
        metadata,
        sandbox,
    };

    handler::dispatch(&mut job, &deps, &queue).await.unwrap();

    assert_eq!(job.status, "done");
    assert_eq!(job.version, 2);
    let hits = job.results["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["q_acc"], "q1");
    assert_eq!(hits[0]["s_locus"], "L");
    assert_eq!(hits[0]["identity"], 80);
    assert_eq!(hits[0]["s_rec_start"], 1);
    assert_eq!(hits[0]["s_rec_end"], 99);
}

#[tokio::test]
async fn s2_child_failure_marks_job_failed_with_stderr() {
    let pool = common::test_pool().await;
    let queue = JobQueue::new(pool.clone());

    sqlx::query(
        "INSERT INTO asdb_jobs.jobs (id, jobtype, status, runner, submitted_date, data, results, version)
         VALUES ('j2', 'comparippson', 'pending', '', $1, $2, '{}'::jsonb, 0)",
    )
    .bind(Utc::now().date_naive())
    .bind(json!({"name": "q1", "sequence": "MAGIC"}))
    .execute(&pool)
    .await
    .unwrap();

    let mut job = queue.claim_next("runner-1").await.unwrap().unwrap();
    let deps = HandlerDeps {
        config: common::test_run_config("runner-1", 1),
        metadata: metadata_with("X", MetadataEntry {
            locus: "L".into(), kind: "T".into(), accession: "A".into(),
            start: Value::from(1), end: Value::from(1),
        }),
        sandbox: Arc::new(FakeRunner::new(SandboxOutcome::Failure, vec![], vec!["bad input".into()])),
    };

    handler::dispatch(&mut job, &deps, &queue).await.unwrap();

    assert_eq!(job.status, "failed");
    assert_eq!(job.results, json!({"status": "failed", "error": "bad input"}));
}

#[tokio::test]
async fn s3_timeout_marks_job_failed_with_literal_message() {
    let pool = common::test_pool().await;
    let queue = JobQueue::new(pool.clone());

    sqlx::query(
        "INSERT INTO asdb_jobs.jobs (id, jobtype, status, runner, submitted_date, data, results, version)
         VALUES ('j3', 'clusterblast', 'pending', '', $1, $2, '{}'::jsonb, 0)",
    )
    .bind(Utc::now().date_naive())
    .bind(json!({"name": "q1", "sequence": "MAGIC"}))
    .execute(&pool)
    .await
    .unwrap();

    let mut job = queue.claim_next("runner-1").await.unwrap().unwrap();
    let deps = HandlerDeps {
        config: common::test_run_config("runner-1", 1),
        metadata: metadata_with("X", MetadataEntry {
            locus: "L".into(), kind: "T".into(), accession: "A".into(),
            start: Value::from(1), end: Value::from(1),
        }),
        sandbox: Arc::new(FakeRunner::new(SandboxOutcome::Timeout, vec![], vec![])),
    };

    handler::dispatch(&mut job, &deps, &queue).await.unwrap();

    assert_eq!(job.status, "failed");
    assert_eq!(job.results["error"], "timeout exceeded");
}

#[tokio::test]
async fn s4_unknown_jobtype_is_recovered_by_the_dispatcher() {
    let pool = common::test_pool().await;
    let queue = Arc::new(JobQueue::new(pool.clone()));

    sqlx::query(
        "INSERT INTO asdb_jobs.jobs (id, jobtype, status, runner, submitted_date, data, results, version)
         VALUES ('j4', 'mystery', 'pending', '', $1, $2, '{}'::jsonb, 0)",
    )
    .bind(Utc::now().date_naive())
    .bind(json!({"name": "q1", "sequence": "MAGIC"}))
    .execute(&pool)
    .await
    .unwrap();

    let config = common::test_run_config("runner-1", 1);
    let deps = Arc::new(HandlerDeps {
        config: config.clone(),
        metadata: metadata_with("X", MetadataEntry {
            locus: "L".into(), kind: "T".into(), accession: "A".into(),
            start: Value::from(1), end: Value::from(1),
        }),
        sandbox: Arc::new(FakeRunner::new(SandboxOutcome::Success, vec![], vec![])),
    });

    let dispatcher = Dispatcher::new(config.clone(), queue.clone(), deps);
    // The dispatcher never exits on its own with max_jobs=1 and an empty
    // queue (it sleeps and retries), so bound it: one job-class error plus
    // one empty-queue sleep is well under the control tick used below.
    let _ = tokio::time::timeout(Duration::from_secs(2), dispatcher.run()).await;

    let row: (String,) = sqlx::query_as("SELECT status FROM asdb_jobs.jobs WHERE id = 'j4'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.0, "failed");

    let row: (Value,) = sqlx::query_as("SELECT results FROM asdb_jobs.jobs WHERE id = 'j4'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(row.0["error"].as_str().unwrap().contains("mystery"));
}

#[tokio::test]
async fn s5_stop_scheduled_drains_the_pool_and_deletes_the_control_row() {
    let pool = common::test_pool().await;
    let queue = Arc::new(JobQueue::new(pool.clone()));
    let control = Arc::new(ControlGateway::new(pool.clone()));
    let config = common::test_run_config("runner-s5", 4);
    let deps = Arc::new(HandlerDeps {
        config: config.clone(),
        metadata: metadata_with("X", MetadataEntry {
            locus: "L".into(), kind: "T".into(), accession: "A".into(),
            start: Value::from(1), end: Value::from(1),
        }),
        sandbox: Arc::new(FakeRunner::new(SandboxOutcome::Success, vec![], vec![])),
    });

    let supervisor = Supervisor::new(config.clone(), control.clone(), queue.clone(), deps);
    let handle = tokio::spawn(async move { supervisor.run().await });

    // Give the supervisor a couple of ticks to spin the pool up to max_jobs.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(config.running_jobs(), 4);

    let mut row = control.fetch("runner-s5").await.unwrap();
    row.stop_scheduled = true;
    control.upsert(&row).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(20), handle).await;
    assert!(result.is_ok(), "supervisor did not drain within two control ticks");
    assert_eq!(config.running_jobs(), 0);

    let missing = control.fetch("runner-s5").await;
    assert!(missing.is_err(), "control row should be deleted on clean exit");
}

#[tokio::test]
async fn s6_malformed_result_line_fails_the_job_with_no_partial_hits() {
    let pool = common::test_pool().await;
    let queue = JobQueue::new(pool.clone());

    sqlx::query(
        "INSERT INTO asdb_jobs.jobs (id, jobtype, status, runner, submitted_date, data, results, version)
         VALUES ('j6', 'clusterblast', 'pending', '', $1, $2, '{}'::jsonb, 0)",
    )
    .bind(Utc::now().date_naive())
    .bind(json!({"name": "q1", "sequence": "MAGIC"}))
    .execute(&pool)
    .await
    .unwrap();

    let mut job = queue.claim_next("runner-1").await.unwrap().unwrap();
    let deps = HandlerDeps {
        config: common::test_run_config("runner-1", 1),
        metadata: metadata_with("X", MetadataEntry {
            locus: "L".into(), kind: "T".into(), accession: "A".into(),
            start: Value::from(1), end: Value::from(1),
        }),
        sandbox: Arc::new(FakeRunner::new(
            SandboxOutcome::Success,
            vec!["q1\tENT1|x\t4\tMAGI\t1\t4\t5\tMAGX\t10\t13".to_string()],
            vec![],
        )),
    };

    handler::dispatch(&mut job, &deps, &queue).await.unwrap();

    assert_eq!(job.status, "failed");
    assert!(job.results["hits"].is_null());
    assert!(job.results["error"].as_str().unwrap().contains("column"));
}
