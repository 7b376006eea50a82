//! Entry point: wires the CLI flags, config, database pool, static
//! metadata, and sandbox together, then runs the supervisor until drain
//! (`spec.md` §6).
//!
//! Grounded on the teacher's `bin/server.rs` bootstrap shape (logging init,
//! pool connect, `sqlx::migrate!`) reworked for a CLI-driven background
//! process instead of an HTTP server: there is no listener to bind, so
//! `main` ends when `Supervisor::run` returns.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use asdb_jobs::config::{Cli, RunConfig};
use asdb_jobs::handler::HandlerDeps;
use asdb_jobs::metadata::StaticMetadata;
use asdb_jobs::models::control::ControlGateway;
use asdb_jobs::models::job::JobQueue;
use asdb_jobs::sandbox::PodmanSandbox;
use asdb_jobs::supervisor::Supervisor;
use asdb_jobs::version;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("asdb-jobs {}", version::full_version());
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "asdb-jobs exiting on error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,asdb_jobs=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = %version::full_version(), "starting asdb-jobs");

    let config = Arc::new(RunConfig::bootstrap(&cli));

    let pool = PgPoolOptions::new()
        .max_connections(config.max_jobs().max(1) as u32 + 1)
        .connect(&config.startup.database.connection_string())
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    let metadata = Arc::new(
        StaticMetadata::load(&config.startup.db_dir)
            .context("failed to load static comparippson metadata")?,
    );

    let queue = Arc::new(JobQueue::new(pool.clone()));
    let control = Arc::new(ControlGateway::new(pool));
    let deps = Arc::new(HandlerDeps {
        config: config.clone(),
        metadata,
        sandbox: Arc::new(PodmanSandbox::new()),
    });

    let supervisor = Supervisor::new(config, control, queue, deps);
    supervisor.run().await?;

    Ok(())
}
